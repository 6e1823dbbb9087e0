//! Common library for the Amora matching platform
//!
//! This crate provides the shared infrastructure used by the Amora
//! services: PostgreSQL connection pooling, the Redis client wrapper
//! used as a cache tier, and the database error types.

pub mod cache;
pub mod database;
pub mod error;
