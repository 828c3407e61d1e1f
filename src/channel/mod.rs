pub mod delivery;
pub mod integration;

pub use delivery::{Button, DeliveryError, MessageDelivery, OutboundMessage, retry_with_backoff};
pub use integration::{HttpIntegrationClient, IntegrationClient, IntegrationError};
