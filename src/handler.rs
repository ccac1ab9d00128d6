use async_trait::async_trait;

use crate::models::{CommandResult, JobRequest};

/// Error a handler may return from [`JobHandler::execute`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Performs the actual work of a job.
///
/// `execute` runs on its own task, one per job, so several calls may be in
/// flight at once. It should watch for the signal sent through
/// [`JobHandler::cancel`] and return [`CommandResult::Stopped`] when it sees
/// one; the agent never terminates a job on its own.
///
/// Returning `Err`, panicking, or returning `Ok(None)` are all reported to the
/// controller as an `Error` result.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn execute(&self, job: JobRequest) -> Result<Option<CommandResult>, HandlerError>;

    /// Signals the job with this id to stop. Must return promptly; the id may
    /// not belong to any running job.
    fn cancel(&self, execution_id: &str);
}
