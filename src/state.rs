use std::sync::Arc;

use crate::server::{Gateway, PowerServer};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<PowerServer>,
    pub gateway: Gateway,
}

impl AppState {
    pub fn new(server: Arc<PowerServer>) -> Self {
        Self {
            gateway: Gateway::new(server.clone()),
            server,
        }
    }
}
