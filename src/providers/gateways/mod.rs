pub mod flutterwave;
pub mod paystack;
pub mod razorpay;
pub mod stripe;

pub use flutterwave::{FlutterwaveConfig, FlutterwaveGateway};
pub use paystack::{PaystackConfig, PaystackGateway};
pub use razorpay::{RazorpayConfig, RazorpayGateway};
pub use stripe::{StripeConfig, StripeGateway};
