pub mod config;
pub mod dataset;
pub mod db;
pub mod error;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod server;
pub mod services;
pub mod state;
