//! Provider Waterfall Library
//!
//! This library decides which external data providers may serve an enrichment
//! request, in what order, and runs the fallback waterfall across them while
//! enforcing hourly quotas shared by every worker process.
//!
//! # Modules
//!
//! - `api`: HTTP surface.
//! - `core`: Selection and execution logic.
//! - `integrations`: Provider adapters and the shared rate-limit backend.
//! - `adapters`: Provider adapter contract and HTTP JSON adapter.
//! - `circuit_breaker`: Circuit breaker for the shared rate-limit backend.
//! - `clock`: Injectable time source.
//! - `config`: Configuration management.
//! - `errors`: Error handling types.
//! - `filters`: Eligibility filters.
//! - `handlers`: HTTP request handlers and router.
//! - `local_store`: In-process sliding-window store.
//! - `models`: Core data models.
//! - `quota`: Provider-to-key binding over the rate-limit store.
//! - `rate_limit_store`: Store contract and factory.
//! - `redis_store`: Redis sliding-window store.
//! - `registry`: Provider configuration registry.
//! - `selection`: Selection pipeline and priority sorter.
//! - `waterfall`: Waterfall executor.

pub mod api;
pub mod core;
pub mod integrations;

// Re-export primary modules for shared use in tests and other binaries
pub mod adapters;
pub mod circuit_breaker;
pub mod clock;
pub mod config;
pub mod errors;
pub mod filters;
pub mod handlers;
pub mod local_store;
pub mod models;
pub mod quota;
pub mod rate_limit_store;
pub mod redis_store;
pub mod registry;
pub mod selection;
pub mod waterfall;
