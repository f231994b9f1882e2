//! PayloadValidator - turns a raw queue message into a `TaskRequest`.
//!
//! Pure: no storage, no process, no clock. Everything here runs before the
//! task touches the outside world, so a bad message fails fast and cheap.
//!
//! Rules:
//! - `task_id` and `user_id` are required non-blank strings (trimmed).
//! - At least one of `inputs` / `parameters` must be present. Either may be
//!   empty; a parameter-only or input-only task is valid.
//! - `inputs` is a list of bare reference strings or
//!   `{"reference": "...", "role": "..."}` objects.
//! - `parameters` is a JSON object.

use serde_json::Value;

use crate::domain::{ArtifactRole, InputRef, TaskId, TaskMessage, TaskRequest, UserId};
use crate::error::{AdapterError, Component, TaskError};

/// Parses raw message bytes. Only JSON syntax and top-level shape are
/// checked here; field rules live in [`validate`].
pub fn parse_message(raw: &[u8]) -> Result<TaskMessage, AdapterError> {
    let value: Value = serde_json::from_slice(raw)
        .map_err(|e| AdapterError::validation("message", format!("is not valid JSON ({e})")))?;
    if !value.is_object() {
        return Err(AdapterError::validation("message", "must be a JSON object"));
    }
    serde_json::from_value(value)
        .map_err(|e| AdapterError::validation("message", format!("has an unexpected shape ({e})")))
}

/// Validates a message, naming the first offending field on failure.
pub fn validate(message: &TaskMessage) -> Result<TaskRequest, TaskError> {
    let fail = |source: AdapterError| {
        TaskError::for_raw(
            message.task_id_hint().unwrap_or_default(),
            Component::PayloadValidator,
            source,
        )
    };

    let task_id = required_string("task_id", message.task_id.as_ref()).map_err(fail)?;
    let user_id = required_string("user_id", message.user_id.as_ref()).map_err(fail)?;

    if message.inputs.is_none() && message.parameters.is_none() {
        return Err(fail(AdapterError::validation(
            "inputs",
            "or `parameters` must be present",
        )));
    }

    let inputs = match &message.inputs {
        None => Vec::new(),
        Some(value) => parse_inputs(value).map_err(fail)?,
    };

    let parameters = match &message.parameters {
        None => serde_json::Map::new(),
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            return Err(fail(AdapterError::validation(
                "parameters",
                format!("must be an object, got {}", type_name(other)),
            )));
        }
    };

    Ok(TaskRequest::new(
        TaskId::new(task_id),
        UserId::new(user_id),
        inputs,
        parameters,
    ))
}

fn required_string(field: &str, value: Option<&Value>) -> Result<String, AdapterError> {
    match value {
        None => Err(AdapterError::validation(field, "is missing")),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(AdapterError::validation(field, "is blank"))
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(AdapterError::validation(
            field,
            format!("must be a string, got {}", type_name(other)),
        )),
    }
}

fn parse_inputs(value: &Value) -> Result<Vec<InputRef>, AdapterError> {
    let Value::Array(items) = value else {
        return Err(AdapterError::validation(
            "inputs",
            format!("must be a list, got {}", type_name(value)),
        ));
    };

    items
        .iter()
        .enumerate()
        .map(|(index, item)| parse_input(index, item))
        .collect()
}

fn parse_input(index: usize, item: &Value) -> Result<InputRef, AdapterError> {
    let field = format!("inputs[{index}]");
    match item {
        Value::String(s) if !s.trim().is_empty() => Ok(InputRef::new(s.trim())),
        Value::String(_) => Err(AdapterError::validation(field, "is a blank reference")),
        Value::Object(map) => {
            let reference = match map.get("reference") {
                Some(Value::String(s)) if !s.trim().is_empty() => s.trim(),
                Some(_) => {
                    return Err(AdapterError::validation(
                        format!("{field}.reference"),
                        "must be a non-blank string",
                    ));
                }
                None => return Err(AdapterError::validation(format!("{field}.reference"), "is missing")),
            };
            let input = InputRef::new(reference);
            match map.get("role") {
                None | Some(Value::Null) => Ok(input),
                Some(Value::String(role)) if !role.trim().is_empty() => {
                    Ok(input.with_role(ArtifactRole::from(role.clone())))
                }
                Some(_) => Err(AdapterError::validation(
                    format!("{field}.role"),
                    "must be a non-blank string",
                )),
            }
        }
        other => Err(AdapterError::validation(
            field,
            format!("must be a string or an object, got {}", type_name(other)),
        )),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}
