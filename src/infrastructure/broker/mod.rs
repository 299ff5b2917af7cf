pub mod mock;
pub mod rest_client;

pub use mock::{FillMode, MockBroker};
pub use rest_client::PaperBrokerClient;
