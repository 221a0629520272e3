pub mod agents;
pub mod api;
pub mod audit;
pub mod auth;
pub mod authorization;
pub mod config;
pub mod error;
pub mod extractor;
pub mod job_queue;
pub mod lifecycle;
pub mod models;
pub mod pool;
pub mod routes;
pub mod schema;
pub mod vault;
pub mod workers;

pub use models::Job;
