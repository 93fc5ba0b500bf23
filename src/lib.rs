pub mod app;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod events;
pub mod jwt;
pub mod models;
pub mod routes;
pub mod services;
pub mod utils;

// Re-export commonly used items for tests
pub use app::{create_app, router, AppState};
