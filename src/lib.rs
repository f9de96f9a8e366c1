pub mod app;
pub mod audit;
pub mod auth;
pub mod authz;
pub mod config;
pub mod db;
pub mod docs;
pub mod errors;
pub mod providers;
pub mod routes;
pub mod store;

// Re-export commonly used items for tests
pub use app::{build_router, create_app, AppState};
