pub mod amount;
pub mod dispatcher;
pub mod flow;
pub mod fulfillment;
pub mod ledger;

pub use dispatcher::{DispatchOutcome, FulfillmentDispatcher};
pub use flow::{CheckoutFlow, CheckoutOutcome, FlowConfig, NewCheckout};
pub use fulfillment::{FulfillmentHandler, FulfillmentRegistry};
pub use ledger::{BillingInterval, CheckoutLedger, CheckoutState, FulfillmentOp, PaymentKind};
