//! Response formatting: execution outcome and gateway errors to HTTP responses.
//!
//! Every error is a single `{"error": "<message>"}` body with a matching status.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::ResponseFormat;
use crate::exec::{CapturedOutput, ExecOutcome};

/// Terminal errors for one request.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed body or empty command.
    #[error("{0}")]
    BadRequest(String),
    /// Command not in the whitelist. The message never echoes the attempted command.
    #[error("command not allowed.")]
    Forbidden,
    /// Spawn failure, non-zero exit, timeout or cancellation.
    #[error("failed to run cmd: {0}")]
    Execution(String),
}

impl GatewayError {
    pub fn status(&self) -> StatusCode {
        match self {
            GatewayError::BadRequest(_) => StatusCode::BAD_REQUEST,
            GatewayError::Forbidden => StatusCode::FORBIDDEN,
            GatewayError::Execution(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        (self.status(), Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Json-mode success body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonOutput {
    pub stdout: String,
    pub stderr: String,
}

/// Map an execution outcome to a response in the configured format.
pub fn format_outcome(outcome: ExecOutcome, format: ResponseFormat) -> Response {
    match outcome {
        ExecOutcome::Failure { reason } => GatewayError::Execution(reason).into_response(),
        ExecOutcome::Success(output) => format_output(output, format),
    }
}

fn format_output(output: CapturedOutput, format: ResponseFormat) -> Response {
    match format {
        ResponseFormat::Json => {
            let (stdout, stderr) = match output {
                CapturedOutput::Split { stdout, stderr } => (stdout, stderr),
                CapturedOutput::Combined(text) => (text, String::new()),
            };
            (StatusCode::OK, Json(JsonOutput { stdout, stderr })).into_response()
        }
        ResponseFormat::Text => {
            let body = match output {
                CapturedOutput::Combined(text) => text,
                CapturedOutput::Split { mut stdout, stderr } => {
                    stdout.push_str(&stderr);
                    stdout
                }
            };
            (StatusCode::OK, body).into_response()
        }
    }
}
