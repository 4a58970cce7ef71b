//! Core domain model types for syncflow.
//!
//! This module contains the status vocabulary shared by pipelines and steps.

mod status;

pub use status::PipelineStatus;
