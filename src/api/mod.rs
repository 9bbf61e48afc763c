pub mod checkout;
pub mod verify;
pub mod webhooks;
