use std::sync::Arc;

use crate::{
    error::{AppError, AppResult},
    models::Privileges,
    server::{power_server::PowerServer, service::Service},
};

/// Authenticated entry point handing out the server or its service
#[derive(Clone)]
pub struct Gateway {
    server: Arc<PowerServer>,
}

impl Gateway {
    pub fn new(server: Arc<PowerServer>) -> Self {
        Self { server }
    }

    /// Administrative server reference; requires admin privileges
    pub async fn remote_server(&self, account: &str, password: &str) -> AppResult<Arc<PowerServer>> {
        if !self
            .server
            .validate_account(account, password, Privileges::ADMIN)
            .await
        {
            tracing::warn!(account = %account, "Rejected server access");
            return Err(AppError::Unauthorized);
        }
        Ok(self.server.clone())
    }

    /// Live service reference; requires access privileges and a running server
    pub async fn remote_service(&self, account: &str, password: &str) -> AppResult<Arc<Service>> {
        if !self
            .server
            .validate_account(account, password, Privileges::ACCESS)
            .await
        {
            tracing::warn!(account = %account, "Rejected service access");
            return Err(AppError::Unauthorized);
        }
        if !self.server.is_running().await {
            return Err(AppError::Unavailable("Server is not running".into()));
        }
        Ok(self.server.service().clone())
    }
}
