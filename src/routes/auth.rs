use std::sync::Arc;

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::{
    error::AppError,
    server::{PowerServer, Service},
    state::AppState,
};

pub const ACCOUNT_HEADER: &str = "x-account";
pub const PASSWORD_HEADER: &str = "x-password";

/// Account name and password sent with every RPC call
#[derive(Debug, Clone)]
pub struct Credentials {
    pub account: String,
    pub password: String,
}

fn header(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl<S: Send + Sync> FromRequestParts<S> for Credentials {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        match (header(parts, ACCOUNT_HEADER), header(parts, PASSWORD_HEADER)) {
            (Some(account), Some(password)) if !account.is_empty() => Ok(Credentials { account, password }),
            _ => Err(AppError::Unauthorized),
        }
    }
}

/// The live service, issued by the gateway to accounts with access privileges
pub struct AccessService(pub Arc<Service>);

#[async_trait::async_trait]
impl FromRequestParts<AppState> for AccessService {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credentials = Credentials::from_request_parts(parts, state).await?;
        let service = state
            .gateway
            .remote_service(&credentials.account, &credentials.password)
            .await?;
        Ok(AccessService(service))
    }
}

/// The administrative server, issued by the gateway to admin accounts
pub struct AdminServer(pub Arc<PowerServer>);

#[async_trait::async_trait]
impl FromRequestParts<AppState> for AdminServer {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let credentials = Credentials::from_request_parts(parts, state).await?;
        let server = state
            .gateway
            .remote_server(&credentials.account, &credentials.password)
            .await?;
        Ok(AdminServer(server))
    }
}
