use crate::providers::error::{PaymentError, PaymentResult};
use bigdecimal::{BigDecimal, ToPrimitive};

/// Currencies with no minor unit. Their amounts are passed to minor-unit
/// APIs as-is, never multiplied by 100.
const ZERO_DECIMAL_CURRENCIES: &[&str] = &[
    "BIF", "CLP", "DJF", "GNF", "JPY", "KMF", "KRW", "MGA", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];

/// Currencies with three-decimal minor units (fils/baisa).
const THREE_DECIMAL_CURRENCIES: &[&str] = &["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

pub fn currency_exponent(currency: &str) -> u32 {
    let code = currency.trim().to_uppercase();
    if ZERO_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        0
    } else if THREE_DECIMAL_CURRENCIES.contains(&code.as_str()) {
        3
    } else {
        2
    }
}

/// Convert a price into the minor-unit integer expected by Stripe, Paystack
/// and Razorpay. Rejects prices with sub-minor-unit precision rather than
/// rounding them.
pub fn to_minor_units(price: &BigDecimal, currency: &str) -> PaymentResult<i64> {
    let exponent = currency_exponent(currency);
    let scaled = price * BigDecimal::from(10_u64.pow(exponent));
    if !scaled.is_integer() {
        return Err(PaymentError::ValidationError {
            message: format!(
                "price {} has more precision than {} supports",
                price, currency
            ),
            field: Some("price".to_string()),
        });
    }
    scaled
        .to_i64()
        .filter(|v| *v > 0)
        .ok_or(PaymentError::ValidationError {
            message: format!("price {} is out of range for {}", price, currency),
            field: Some("price".to_string()),
        })
}

/// Major-unit decimal string, used by Flutterwave which takes amounts in
/// whole currency units.
pub fn to_major_string(price: &BigDecimal) -> String {
    price.normalized().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(value: &str) -> BigDecimal {
        BigDecimal::from_str(value).unwrap()
    }

    #[test]
    fn two_decimal_currency_is_converted_to_minor_units() {
        assert_eq!(to_minor_units(&dec("10.00"), "USD").unwrap(), 1000);
        assert_eq!(to_minor_units(&dec("9.99"), "usd").unwrap(), 999);
        assert_eq!(to_minor_units(&dec("25"), "NGN").unwrap(), 2500);
    }

    #[test]
    fn zero_decimal_currency_is_not_multiplied() {
        assert_eq!(to_minor_units(&dec("1000"), "JPY").unwrap(), 1000);
        assert_eq!(to_minor_units(&dec("500"), "KRW").unwrap(), 500);
    }

    #[test]
    fn three_decimal_currency_uses_thousandths() {
        assert_eq!(to_minor_units(&dec("1.500"), "KWD").unwrap(), 1500);
    }

    #[test]
    fn sub_minor_unit_precision_is_rejected() {
        assert!(to_minor_units(&dec("10.005"), "USD").is_err());
        assert!(to_minor_units(&dec("1000.5"), "JPY").is_err());
    }

    #[test]
    fn non_positive_amounts_are_rejected() {
        assert!(to_minor_units(&dec("0"), "USD").is_err());
        assert!(to_minor_units(&dec("-5"), "USD").is_err());
    }

    #[test]
    fn major_string_is_normalized() {
        assert_eq!(to_major_string(&dec("10.00")), "10");
        assert_eq!(to_major_string(&dec("9.99")), "9.99");
    }
}
