/*!
 * Core Module
 * Fundamental datapath types, limits, configuration and error handling
 */

pub mod config;
pub mod errors;
pub mod limits;
pub mod types;

// Re-export for convenience
pub use config::{BurstPreference, DatapathConfig, OverRequestPolicy};
pub use errors::{HqmError, HqmResult};
pub use types::*;
