//! JSONL request/response loop for front-ends that talk over stdio.
//!
//! One request per line:
//! `{"id": 1, "method": "execute_command", "params": {"command_id": "abc"}}`
//! and one response per line carrying the same `id` and either `result` or
//! `error`.

use crate::service::CommandService;
use crate::storage::{CommandDefinition, InputValueSet};
use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::{BufRead, Write};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum RpcError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
    #[error("unknown method: {0}")]
    UnknownMethod(String),
}

#[derive(Debug, Deserialize)]
struct RawRequest {
    #[serde(default)]
    id: Value,
    method: String,
    #[serde(default)]
    params: Value,
}

#[derive(Debug, Deserialize)]
struct CommandIdParams {
    #[serde(alias = "commandId")]
    command_id: String,
}

#[derive(Debug, Deserialize)]
struct SaveCommandParams {
    command: CommandDefinition,
}

#[derive(Debug, Deserialize)]
struct SaveInputValuesParams {
    #[serde(alias = "commandId")]
    command_id: String,
    values: InputValueSet,
}

#[derive(Debug, Deserialize)]
struct ExecuteParams {
    #[serde(alias = "commandId")]
    command_id: String,
    #[serde(default, alias = "envVars")]
    env_vars: Option<InputValueSet>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct Response {
    pub id: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

fn params<T: DeserializeOwned>(params: Value) -> Result<T, RpcError> {
    Ok(serde_json::from_value(params)?)
}

fn call(service: &CommandService, method: &str, raw: Value) -> Result<Value, RpcError> {
    let result = match method {
        "get_commands" => serde_json::to_value(service.get_commands())?,
        "get_command" => {
            let p: CommandIdParams = params(raw)?;
            serde_json::to_value(service.get_command(&p.command_id))?
        }
        "save_command" => {
            let p: SaveCommandParams = params(raw)?;
            serde_json::to_value(service.save_command(p.command))?
        }
        "delete_command" => {
            let p: CommandIdParams = params(raw)?;
            serde_json::to_value(service.delete_command(&p.command_id))?
        }
        "get_all_input_values" => serde_json::to_value(service.get_all_input_values())?,
        "save_input_values" => {
            let p: SaveInputValuesParams = params(raw)?;
            serde_json::to_value(service.save_input_values(&p.command_id, &p.values))?
        }
        "execute_command" => {
            let p: ExecuteParams = params(raw)?;
            serde_json::to_value(service.execute_command(&p.command_id, p.env_vars.as_ref()))?
        }
        "get_commands_dir_path" => Value::String(service.get_commands_dir_path()),
        other => return Err(RpcError::UnknownMethod(other.to_string())),
    };
    Ok(result)
}

fn undecodable(e: RpcError) -> Response {
    warn!(error = %e, "undecodable request");
    Response {
        id: Value::Null,
        result: None,
        error: Some(e.to_string()),
    }
}

/// Decodes one request line and runs it.
pub fn dispatch(service: &CommandService, line: &str) -> Response {
    let request: RawRequest = match serde_json::from_str(line) {
        Ok(request) => request,
        Err(e) => return undecodable(e.into()),
    };

    debug!(method = %request.method, "request");
    match call(service, &request.method, request.params) {
        Ok(result) => Response {
            id: request.id,
            result: Some(result),
            error: None,
        },
        Err(e) => {
            warn!(method = %request.method, error = %e, "request failed");
            Response {
                id: request.id,
                result: None,
                error: Some(e.to_string()),
            }
        }
    }
}

/// Serves requests from `input` until EOF, writing one response line each.
pub fn serve<R: BufRead, W: Write>(
    service: &CommandService,
    mut input: R,
    mut output: W,
) -> Result<()> {
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let read = input
            .read_until(b'\n', &mut buf)
            .context("failed to read request")?;
        if read == 0 {
            break;
        }
        let response = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => dispatch(service, line),
            Err(e) => undecodable(e.into()),
        };
        let mut encoded = serde_json::to_string(&response)?;
        encoded.push('\n');
        output
            .write_all(encoded.as_bytes())
            .context("failed to write response")?;
        output.flush()?;
    }
    Ok(())
}
