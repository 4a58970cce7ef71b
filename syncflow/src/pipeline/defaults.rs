//! The standard catalog migration pipeline.

use super::runner::Pipeline;
use super::step::{step_id_from_name, Step};
use crate::errors::SyncflowError;
use crate::executors::ExecutorRegistry;
use serde_json::{json, Map, Value};

/// Step names of the default pipeline, in registration order.
pub const DEFAULT_STEP_NAMES: [&str; 6] = [
    "Test Connections",
    "Sync Categories",
    "Sync Products",
    "Sync Customers",
    "Process DLQ",
    "Generate Report",
];

struct StepTemplate {
    name: &'static str,
    timeout_secs: u64,
    params: Value,
    depends_on: &'static [&'static str],
}

fn templates() -> [StepTemplate; 6] {
    [
        StepTemplate {
            name: "Test Connections",
            timeout_secs: 30,
            params: json!({}),
            depends_on: &[],
        },
        StepTemplate {
            name: "Sync Categories",
            timeout_secs: 600,
            params: json!({"batch_size": 100}),
            depends_on: &["Test Connections"],
        },
        StepTemplate {
            name: "Sync Products",
            timeout_secs: 3600,
            params: json!({"batch_size": 50, "max_pages": null}),
            depends_on: &["Sync Categories"],
        },
        StepTemplate {
            name: "Sync Customers",
            timeout_secs: 1800,
            params: json!({"batch_size": 100}),
            depends_on: &["Test Connections"],
        },
        StepTemplate {
            name: "Process DLQ",
            timeout_secs: 300,
            params: json!({}),
            depends_on: &["Sync Categories", "Sync Products", "Sync Customers"],
        },
        StepTemplate {
            name: "Generate Report",
            timeout_secs: 60,
            params: json!({}),
            depends_on: &["Process DLQ"],
        },
    ]
}

/// Adds the six migration steps to `pipeline`.
///
/// Executors are looked up in `registry` by step name. Nothing is added
/// unless every executor is registered.
pub fn build_default_pipeline(
    pipeline: &mut Pipeline,
    registry: &ExecutorRegistry,
) -> Result<(), SyncflowError> {
    let mut steps = Vec::with_capacity(DEFAULT_STEP_NAMES.len());
    for template in templates() {
        let executor = registry
            .get(template.name)
            .ok_or_else(|| SyncflowError::MissingExecutor(template.name.to_string()))?;

        let params: Map<String, Value> = match template.params {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        steps.push(
            Step::new(template.name, executor)
                .with_timeout_secs(template.timeout_secs)
                .with_params(params)
                .with_dependencies(template.depends_on.iter().map(|name| step_id_from_name(name))),
        );
    }

    pipeline.add_steps(steps)?;
    tracing::info!(pipeline_id = %pipeline.id(), steps = pipeline.len(), "Default pipeline built");
    Ok(())
}
