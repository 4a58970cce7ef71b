//! Observability utilities.

mod logging;

pub use logging::{init_tracing, parse_level, LOG_ENV_VAR};
