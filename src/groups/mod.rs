pub mod registry;

pub use registry::{ConsumerGroupDetails, ConsumerGroupRegistry, GroupError};
