//! Cooperative cancellation for pipeline runs.
//!
//! A fired token stops the scheduler from starting further steps; in-flight
//! steps finish naturally and the pipeline state is persisted for resume.

mod token;

pub use token::CancellationToken;
