//! Octolink - a deterministic URL shortener service
//!
//! Short codes are derived from a hash of the target URL, so generating the
//! same URL twice returns the same code. Collisions are resolved by probing
//! further hash offsets and finally longer codes.
//!
//! # Architecture
//! - `encoder`: Base62 short code encoding
//! - `storage`: Authoritative link store (SeaORM)
//! - `cache`: Key-value cache (Redis or in-memory)
//! - `index`: Probabilistic code membership index (Bloom filter)
//! - `services`: Link generation, resolution and visit statistics
//! - `analytics`: Asynchronous visit recording and access log sinks
//! - `api`: HTTP services and middleware
//! - `config`: Configuration management
//! - `runtime`: Application lifecycle and execution modes
//! - `system`: Logging setup

pub mod analytics;
pub mod api;
pub mod cache;
pub mod cli;
pub mod config;
pub mod encoder;
pub mod errors;
pub mod index;
pub mod runtime;
pub mod services;
pub mod storage;
pub mod system;
pub mod utils;
