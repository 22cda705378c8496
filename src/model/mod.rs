pub mod domain;
pub mod message;
pub mod queue;

pub use domain::{Domain, FieldType, Schema, SchemaField};
pub use message::Message;
pub use queue::{CircuitBreakerPolicy, DeliveryMode, QueueConfig, RetryPolicy};
