//! Services module for business logic around the checkout lifecycle

pub mod webhook_processor;

pub use webhook_processor::{WebhookDisposition, WebhookProcessor, WebhookProcessorError};
