//! Application configuration
//!
//! `AppConfig` is read from a TOML file; every section falls back to its
//! defaults when absent.

mod schema;
mod store;

pub use schema::*;
pub use store::{parse, ConfigStore};
