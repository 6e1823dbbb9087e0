//! Amora matching engine
//!
//! Proposes one compatible candidate at a time to each user: spatial
//! candidate retrieval, two-directional preference matching,
//! compatibility scoring, and the persisted match lifecycle that turns
//! two acceptances into exactly one durable mutual match. Batched
//! queue consumption absorbs load spikes on the same code paths the
//! synchronous API uses.

pub mod cache;
pub mod config;
pub mod error;
pub mod finder;
pub mod geo;
pub mod lifecycle;
pub mod matcher;
pub mod metrics;
pub mod models;
pub mod queue;
pub mod rate_limiter;
pub mod routes;
pub mod scoring;
pub mod state;
pub mod store;
