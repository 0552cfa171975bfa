// Aux Battle: a single-elimination music tournament service.

pub mod api;
pub mod auth;
pub mod ballot;
pub mod config;
pub mod db;
pub mod engine;
pub mod events;
pub mod links;
pub mod metrics;
pub mod notifier;
pub mod scheduler;
pub mod service;
pub mod tournament;
