//! Gatekeeper - Sliding Window Rate Limiting
//!
//! This crate implements a request rate limiting engine. Each request is
//! resolved to a per-caller, per-policy identifier and checked against a
//! trailing time window held either in process or in a shared store, so that
//! limits can hold across many instances of the same service.

pub mod config;
pub mod error;
pub mod gate;
pub mod identity;
pub mod ratelimit;
pub mod server;
