//! CreateTask payload validation.
//!
//! Schema-level shape is guaranteed by deserialization; the checks here are
//! the cross-field TES rules a schema cannot express.

use crate::errors::{PoiesisError, Result};
use crate::transfer::wildcard::has_wildcards;

use super::task::Task;

fn invalid(message: impl Into<String>) -> PoiesisError {
    PoiesisError::Validation(message.into())
}

/// Validate a task submitted to `CreateTask`.
pub fn validate_create(task: &Task) -> Result<()> {
    if task.executors.is_empty() {
        return Err(invalid("task must declare at least one executor"));
    }

    for (i, executor) in task.executors.iter().enumerate() {
        if executor.image.trim().is_empty() {
            return Err(invalid(format!("executors[{i}].image must not be empty")));
        }
        if executor.command.is_empty() {
            return Err(invalid(format!("executors[{i}].command must not be empty")));
        }
        if let Some(workdir) = &executor.workdir {
            if !workdir.starts_with('/') {
                return Err(invalid(format!("executors[{i}].workdir must be absolute")));
            }
        }
    }

    for (i, input) in task.inputs.iter().enumerate() {
        match (&input.url, &input.content) {
            (Some(_), Some(_)) => {
                return Err(invalid(format!(
                    "inputs[{i}] must set exactly one of url and content, got both"
                )))
            }
            (None, None) => {
                return Err(invalid(format!(
                    "inputs[{i}] must set exactly one of url and content, got neither"
                )))
            }
            _ => {}
        }
        if !input.path.starts_with('/') {
            return Err(invalid(format!("inputs[{i}].path must be absolute")));
        }
    }

    for (i, output) in task.outputs.iter().enumerate() {
        if output.url.trim().is_empty() {
            return Err(invalid(format!("outputs[{i}].url must not be empty")));
        }
        if !output.path.starts_with('/') {
            return Err(invalid(format!("outputs[{i}].path must be absolute")));
        }
        if has_wildcards(&output.path) {
            match &output.path_prefix {
                Some(prefix) if prefix.starts_with('/') => {}
                Some(_) => {
                    return Err(invalid(format!("outputs[{i}].path_prefix must be absolute")))
                }
                None => {
                    return Err(invalid(format!(
                        "outputs[{i}].path contains wildcards and requires path_prefix"
                    )))
                }
            }
        }
    }

    for (i, volume) in task.volumes.iter().enumerate() {
        if !volume.starts_with('/') {
            return Err(invalid(format!("volumes[{i}] must be absolute")));
        }
    }

    Ok(())
}
