pub mod api;
pub mod cache;
pub mod catalog;
pub mod client;
pub mod config;
pub mod engine;
pub mod errors;
pub mod health;
pub mod prober;
pub mod rate;
pub mod repository;
pub mod retry;
pub mod strategy;
pub mod types;

pub use engine::RouterEngine;
pub use errors::{ProviderError, RouterError};
pub use types::{RouteOptions, RoutingDecision, RunOutcome, Strategy};
