pub mod gateway;
pub mod measure;
pub mod power_server;
pub mod service;
pub mod transaction;

pub use gateway::Gateway;
pub use measure::ActiveMeasure;
pub use power_server::{PowerServer, ServerStatus, StatusListener};
pub use service::Service;
pub use transaction::Transaction;
