//! Configuration management subsystem.
//!
//! # Data Flow
//! ```text
//! config file (TOML)
//!     → loader.rs (parse & deserialize)
//!     → validation.rs (semantic checks)
//!     → ResilienceConfig (validated)
//!     → QueryClient::new / QueryClient::apply_config
//!
//! On file change:
//!     watcher.rs detects change
//!     → loader.rs loads and validates
//!     → mpsc channel
//!     → QueryClient::apply_config (arc-swap of defaults, breaker configs updated in place)
//! ```
//!
//! # Design Decisions
//! - All fields have defaults to allow minimal configs
//! - Durations are stored as integer milliseconds with `Duration` accessors
//! - Validation separates syntactic (serde) from semantic checks

pub mod loader;
pub mod schema;
pub mod validation;
pub mod watcher;

pub use loader::{load_config, parse_config, ConfigError};
pub use schema::{
    BreakerConfig, FailureDecay, FallbackStrategy, ObservabilityConfig, QueryConfig,
    ResilienceConfig, TripWindow,
};
pub use validation::{validate_config, ValidationError};
