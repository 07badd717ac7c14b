//! Health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active checks (active.rs):
//!     Periodic timer
//!     → BreakerRegistry::check_recovery
//!     → CircuitBreaker::try_recover (Open → Half-Open once recovery_timeout elapsed)
//!
//! Passive checks:
//!     Every guarded call records its outcome in the breaker itself
//! ```
//!
//! # Design Decisions
//! - The monitor only opens the door for probes; closing still requires
//!   real successful calls
//! - It takes the breaker's own lock, so it never races `reset` or `force_open`

pub mod active;

pub use active::{HealthMonitor, MonitorHandle};
