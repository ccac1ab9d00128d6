use serde::{Deserialize, Serialize};

use crate::error::TransportError;

#[derive(Serialize, Deserialize)]
pub struct LoginRequest {
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Password")]
    pub password: String,
    #[serde(rename = "Domain")]
    pub domain: String,
}

#[derive(Serialize, Deserialize)]
pub struct ServerRegistration {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Type")]
    pub server_type: String,
    #[serde(rename = "Capacity")]
    pub capacity: u32,
}

#[derive(Serialize, Deserialize)]
pub struct ServerUpdate {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Description")]
    pub description: String,
    #[serde(rename = "Capacity")]
    pub capacity: u32,
}

#[derive(Serialize, Deserialize)]
pub struct StatusReport {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ExecutionIds")]
    pub execution_ids: Vec<String>,
}

#[derive(Serialize, Deserialize)]
pub struct PendingCommandRequest {
    #[serde(rename = "Name")]
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct FinishedExecution {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ExecutionId")]
    pub execution_id: String,
    #[serde(rename = "Result")]
    pub result: String,
    #[serde(rename = "ErrorName")]
    pub error_name: String,
    #[serde(rename = "ErrorDescription")]
    pub error_description: String,
}

#[derive(Serialize, Deserialize)]
pub struct UpdateFilesEnded {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
}

/// A command as the controller encodes it on the wire.
#[derive(Serialize, Deserialize, Debug, Default)]
pub struct RawPendingCommand {
    #[serde(rename = "Type", default)]
    pub command_type: String,
    #[serde(rename = "ExecutionId", default)]
    pub execution_id: String,
    #[serde(rename = "TestPath", default)]
    pub test_path: Option<String>,
    #[serde(rename = "TestArguments", default)]
    pub test_arguments: Option<String>,
    #[serde(rename = "UserName", default)]
    pub user_name: Option<String>,
    #[serde(rename = "ReservationId", default)]
    pub reservation_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobRequest {
    pub job_path: String,
    pub job_arguments: String,
    pub execution_id: String,
    pub username: String,
    /// Empty when the job has no reservation.
    pub reservation_id: String,
    /// Reservation details exactly as the controller returned them.
    pub reservation_context: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PendingCommand {
    StartExecution(JobRequest),
    StopExecution { execution_id: String },
    FilesUpdated,
}

impl PendingCommand {
    /// Decodes a dequeue response body. `Ok(None)` means nothing was pending.
    ///
    /// The reservation context of a decoded start command is always empty; the
    /// dispatcher fills it in after fetching the reservation.
    pub fn decode(body: &[u8]) -> Result<Option<PendingCommand>, TransportError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(None);
        }

        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|e| TransportError::Decode(e.to_string()))?;
        let is_empty = match &value {
            serde_json::Value::Null => true,
            serde_json::Value::Object(map) => map.is_empty(),
            _ => false,
        };
        if is_empty {
            return Ok(None);
        }

        let raw: RawPendingCommand =
            serde_json::from_value(value).map_err(|e| TransportError::Decode(e.to_string()))?;

        match raw.command_type.as_str() {
            "startExecution" => Ok(Some(PendingCommand::StartExecution(JobRequest {
                job_path: raw.test_path.unwrap_or_default(),
                job_arguments: raw.test_arguments.unwrap_or_default(),
                execution_id: raw.execution_id,
                username: raw.user_name.unwrap_or_default(),
                reservation_id: raw.reservation_id.unwrap_or_default(),
                reservation_context: String::new(),
            }))),
            "stopExecution" => Ok(Some(PendingCommand::StopExecution {
                execution_id: raw.execution_id,
            })),
            "filesUpdated" | "updateFiles" => Ok(Some(PendingCommand::FilesUpdated)),
            other => Err(TransportError::Decode(format!(
                "unknown command type {:?}",
                other
            ))),
        }
    }
}

/// A report artifact attached to a finished job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Report {
    pub filename: String,
    pub data: Vec<u8>,
    pub mime_type: String,
}

impl Report {
    pub fn new(
        filename: impl Into<String>,
        data: impl Into<Vec<u8>>,
        mime_type: impl Into<String>,
    ) -> Report {
        Report {
            filename: filename.into(),
            data: data.into(),
            mime_type: mime_type.into(),
        }
    }
}

/// Outcome of one job, as delivered to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Stopped,
    Completed(Report),
    Passed(Report),
    Failed(Report),
    Error { name: String, description: String },
}

impl CommandResult {
    pub fn error(name: impl Into<String>, description: impl Into<String>) -> CommandResult {
        CommandResult::Error {
            name: name.into(),
            description: description.into(),
        }
    }

    /// The `Result` value the controller expects.
    pub fn kind(&self) -> &'static str {
        match self {
            CommandResult::Stopped => "Stopped",
            CommandResult::Completed(_) => "Completed",
            CommandResult::Passed(_) => "Passed",
            CommandResult::Failed(_) => "Failed",
            CommandResult::Error { .. } => "Error",
        }
    }

    pub fn report(&self) -> Option<&Report> {
        match self {
            CommandResult::Completed(report)
            | CommandResult::Passed(report)
            | CommandResult::Failed(report) => Some(report),
            CommandResult::Stopped | CommandResult::Error { .. } => None,
        }
    }

    pub fn finished(&self, name: &str, execution_id: &str) -> FinishedExecution {
        let (error_name, error_description) = match self {
            CommandResult::Error { name, description } => (name.clone(), description.clone()),
            _ => (String::new(), String::new()),
        };

        FinishedExecution {
            name: name.to_string(),
            execution_id: execution_id.to_string(),
            result: self.kind().to_string(),
            error_name,
            error_description,
        }
    }
}
