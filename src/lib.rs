// Library interface for liftrs modules
// This allows integration tests and the binary to share the engine

pub mod auth;
pub mod clock;
pub mod config;
pub mod database;
pub mod defaults;
pub mod error;
pub mod fatigue;
pub mod logging;
pub mod mesocycle;
pub mod models;
pub mod one_rep_max;
pub mod plateau;
pub mod readiness;
pub mod recommendation;
pub mod rir_bias;
pub mod rounding;
pub mod routes;
pub mod set_logging;

// Re-export commonly used types for convenience
pub use clock::{Clock, FixedClock, SystemClock};
pub use config::{AppConfig, EngineSettings};
pub use database::{Database, DatabaseError};
pub use error::{LiftError, Result};
pub use logging::{LogConfig, LogFormat, LogLevel};
pub use models::*;
pub use recommendation::{PreviousSetMetrics, Recommendation};
pub use set_logging::{LogSetRequest, LoggedSet};
