//! Lifecycle of a single job: run the handler, deliver the result, release
//! the execution id.

use std::any::Any;
use std::error::Error;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use log::{error, info};
use tokio::task::JoinHandle;

use crate::error::TransportError;
use crate::handler::{HandlerError, JobHandler};
use crate::models::{CommandResult, JobRequest};
use crate::registry::{ExecutionGuard, ExecutionRegistry};
use crate::transport::ControllerClient;

pub const UNHANDLED_FAULT: &str = "Unhandled handler fault";
pub const CONTRACT_VIOLATION: &str = "Handler contract violation";

/// Spawns job workers. Cheap to clone.
#[derive(Clone)]
pub struct JobRunner {
    client: Arc<ControllerClient>,
    handler: Arc<dyn JobHandler>,
    registry: ExecutionRegistry,
    agent_name: Arc<str>,
}

impl JobRunner {
    pub fn new(
        client: Arc<ControllerClient>,
        handler: Arc<dyn JobHandler>,
        registry: ExecutionRegistry,
        agent_name: &str,
    ) -> JobRunner {
        JobRunner {
            client,
            handler,
            registry,
            agent_name: Arc::from(agent_name),
        }
    }

    /// Starts a worker for `job` and returns without waiting for it.
    ///
    /// The execution id is in the registry by the time this returns and stays
    /// there until the worker has finished delivering its result.
    pub fn spawn(&self, job: JobRequest) -> JoinHandle<()> {
        let guard = self.registry.track(&job.execution_id);
        let runner = self.clone();
        tokio::spawn(async move { runner.run(job, guard).await })
    }

    async fn run(&self, job: JobRequest, guard: ExecutionGuard) {
        let execution_id = job.execution_id.clone();
        info!(
            "Execution {} started: path={:?} arguments={:?} user={:?} reservation={:?}",
            execution_id, job.job_path, job.job_arguments, job.username, job.reservation_id
        );

        let result = execute(self.handler.as_ref(), job).await;
        info!("Execution {} finished with {}", execution_id, result.kind());

        if let Err(e) = self.report(&execution_id, &result).await {
            error!("Failed to deliver result of execution {}: {}", execution_id, e);
        }

        drop(guard);
    }

    /// Sends the finished notice, then the report if the result carries one.
    pub async fn report(&self, execution_id: &str, result: &CommandResult) -> Result<(), TransportError> {
        self.client
            .finish_execution(&result.finished(&self.agent_name, execution_id))
            .await?;

        if let Some(report) = result.report().filter(|report| !report.filename.is_empty()) {
            self.client
                .upload_report(&self.agent_name, execution_id, report)
                .await?;
        }

        Ok(())
    }
}

/// Runs the handler, folding every way it can fail into an `Error` result.
pub async fn execute(handler: &dyn JobHandler, job: JobRequest) -> CommandResult {
    match AssertUnwindSafe(handler.execute(job)).catch_unwind().await {
        Ok(Ok(Some(result))) => result,
        Ok(Ok(None)) => CommandResult::error(
            CONTRACT_VIOLATION,
            "execute() returned no result; it must return a CommandResult or an error",
        ),
        Ok(Err(e)) => CommandResult::error(UNHANDLED_FAULT, describe_error(&e)),
        Err(panic) => CommandResult::error(UNHANDLED_FAULT, describe_panic(panic.as_ref())),
    }
}

fn describe_error(e: &HandlerError) -> String {
    let mut description = e.to_string();
    let mut source = e.source();
    while let Some(cause) = source {
        description.push_str("\ncaused by: ");
        description.push_str(&cause.to_string());
        source = cause.source();
    }
    description
}

fn describe_panic(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("handler panicked: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("handler panicked: {}", message)
    } else {
        "handler panicked".to_string()
    }
}
