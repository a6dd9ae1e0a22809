//! Node daemon for the hive build accelerator.
//!
//! A node owns a blob [`Store`](blobs_store::Store) and an
//! [`AttributeCache`](common::attr::AttributeCache) over its source tree,
//! and serves both to peers over TCP. The `hive` binary wraps this library
//! with a small CLI.

pub mod config;
pub mod logging;
pub mod replay;
pub mod server;

pub use config::{Config, ConfigError};
pub use server::{connect, Hello, Service, ServiceSetupError};
