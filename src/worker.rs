use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent_config::AgentConfig;
use crate::error::{AgentError, Result, TransportError};
use crate::execution::JobRunner;
use crate::handler::JobHandler;
use crate::heartbeat::HeartbeatSender;
use crate::models::{PendingCommand, ServerRegistration, ServerUpdate};
use crate::registry::ExecutionRegistry;
use crate::transport::ControllerClient;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Created,
    Authenticated,
    Registered,
    Running,
    Stopping,
    Stopped,
}

impl AgentState {
    pub fn name(&self) -> &'static str {
        match self {
            AgentState::Created => "Created",
            AgentState::Authenticated => "Authenticated",
            AgentState::Registered => "Registered",
            AgentState::Running => "Running",
            AgentState::Stopping => "Stopping",
            AgentState::Stopped => "Stopped",
        }
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// How the agent presents itself to the controller and paces its loops.
#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub name: String,
    pub description: String,
    pub server_type: String,
    pub capacity: u32,
    pub heartbeat_interval: Duration,
    pub poll_backoff: Duration,
}

impl WorkerOptions {
    pub fn from_config(config: &AgentConfig) -> WorkerOptions {
        WorkerOptions {
            name: config.name.clone(),
            description: config.description.clone(),
            server_type: config.server_type.clone(),
            capacity: config.capacity,
            heartbeat_interval: config.heartbeat_interval(),
            poll_backoff: config.poll_backoff(),
        }
    }
}

/// An execution server registered with the controller.
///
/// Moves through `Created → Authenticated → [Registered] → Running →
/// Stopping → Stopped`. While running it owns two background tasks: the
/// command poll loop and the heartbeat. Job workers are spawned by the poll
/// loop and are never waited on by [`Worker::stop`].
pub struct Worker {
    options: WorkerOptions,
    client: Arc<ControllerClient>,
    handler: Arc<dyn JobHandler>,
    registry: ExecutionRegistry,
    state: AgentState,
    shutdown: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Worker {
    pub fn new(options: WorkerOptions, client: Arc<ControllerClient>, handler: Arc<dyn JobHandler>) -> Worker {
        Worker {
            options,
            client,
            handler,
            registry: ExecutionRegistry::new(),
            state: AgentState::Created,
            shutdown: CancellationToken::new(),
            tasks: Vec::new(),
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn registry(&self) -> &ExecutionRegistry {
        &self.registry
    }

    fn expect_state(&self, expected: &[AgentState]) -> Result<()> {
        if expected.contains(&self.state) {
            return Ok(());
        }
        Err(AgentError::State {
            expected: expected[0].name(),
            actual: self.state.name(),
        })
    }

    pub async fn authenticate(&mut self, username: &str, password: &str, domain: &str) -> Result<()> {
        self.expect_state(&[AgentState::Created])?;

        self.client
            .login(username, password, domain)
            .await
            .map_err(AgentError::Authentication)?;

        info!("Logged in to the controller as {}\\{}", domain, username);
        self.state = AgentState::Authenticated;
        Ok(())
    }

    /// Registers this execution server. The controller refusing because the
    /// server is already registered counts as success.
    pub async fn register(&mut self) -> Result<()> {
        self.expect_state(&[AgentState::Authenticated])?;

        let registration = ServerRegistration {
            name: self.options.name.clone(),
            description: self.options.description.clone(),
            server_type: self.options.server_type.clone(),
            capacity: self.options.capacity,
        };

        match self.client.register_server(&registration).await {
            Ok(()) => info!("Registered execution server {}", self.options.name),
            Err(e) if is_already_registered(&e) => info!("Ignoring error: {}", e),
            Err(e) => return Err(AgentError::Registration(e)),
        }

        self.state = AgentState::Registered;
        Ok(())
    }

    /// Pushes the current description and capacity to the controller.
    pub async fn update(&self) -> Result<()> {
        self.expect_state(&[AgentState::Authenticated, AgentState::Registered, AgentState::Running])?;

        let update = ServerUpdate {
            name: self.options.name.clone(),
            description: self.options.description.clone(),
            capacity: self.options.capacity,
        };
        self.client.update_server(&update).await?;

        info!("Updated execution server {}", self.options.name);
        Ok(())
    }

    /// Starts the poll loop and the heartbeat. Returns immediately.
    pub fn start(&mut self) -> Result<()> {
        self.expect_state(&[AgentState::Registered, AgentState::Authenticated])?;

        info!("Worker started at: {}", chrono::Utc::now());

        let runner = JobRunner::new(
            self.client.clone(),
            self.handler.clone(),
            self.registry.clone(),
            &self.options.name,
        );
        let poller = CommandPoller {
            client: self.client.clone(),
            handler: self.handler.clone(),
            runner,
            agent_name: self.options.name.clone(),
            backoff: self.options.poll_backoff,
        };
        let heartbeat = HeartbeatSender::new(
            self.client.clone(),
            self.registry.clone(),
            &self.options.name,
            self.options.heartbeat_interval,
        );

        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move { poller.run_loop(shutdown).await }));
        let shutdown = self.shutdown.clone();
        self.tasks.push(tokio::spawn(async move { heartbeat.run(shutdown).await }));

        self.state = AgentState::Running;
        Ok(())
    }

    /// Stops both loops and waits for them to return. Jobs still running keep
    /// running; their results are delivered as usual if the runtime lives on.
    pub async fn stop(&mut self) -> Result<()> {
        self.expect_state(&[AgentState::Running])?;
        self.state = AgentState::Stopping;

        self.shutdown.cancel();
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Worker loop ended abnormally: {}", e);
            }
        }

        if !self.registry.is_empty() {
            info!(
                "Leaving {} executions running: {:?}",
                self.registry.len(),
                self.registry.snapshot()
            );
        }
        info!("Worker stopping at: {}", chrono::Utc::now());
        self.state = AgentState::Stopped;
        Ok(())
    }
}

impl Drop for Worker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

fn is_already_registered(e: &TransportError) -> bool {
    e.is_status() && e.to_string().to_lowercase().contains("already")
}

/// Dequeues commands one at a time and dispatches them in order.
struct CommandPoller {
    client: Arc<ControllerClient>,
    handler: Arc<dyn JobHandler>,
    runner: JobRunner,
    agent_name: String,
    backoff: Duration,
}

impl CommandPoller {
    async fn run_loop(&self, shutdown: CancellationToken) {
        while !shutdown.is_cancelled() {
            debug!("Poll...");
            let command = match self.client.dequeue_command(&self.agent_name).await {
                Ok(Some(command)) => command,
                Ok(None) => continue,
                Err(TransportError::Decode(e)) => {
                    error!("Discarding pending command: {}", e);
                    continue;
                }
                Err(e) => {
                    warn!(
                        "Poll failed: {}. Sleeping {:?} to wait for the controller to recover...",
                        e, self.backoff
                    );
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.backoff) => {}
                    }
                    continue;
                }
            };

            debug!("Command request {:?}", command);
            self.on_receive_command(command).await;
        }

        info!("Command polling stopped");
    }

    async fn on_receive_command(&self, command: PendingCommand) {
        match command {
            PendingCommand::StartExecution(mut job) => {
                if !job.reservation_id.is_empty() {
                    job.reservation_context = match self.client.fetch_reservation(&job.reservation_id).await {
                        Ok(context) => context,
                        Err(e) => {
                            warn!(
                                "Failed to fetch reservation {} for execution {}: {}",
                                job.reservation_id, job.execution_id, e
                            );
                            String::new()
                        }
                    };
                }
                self.runner.spawn(job);
            }
            PendingCommand::StopExecution { execution_id } => {
                info!("Received stop command for {}", execution_id);
                self.handler.cancel(&execution_id);
            }
            PendingCommand::FilesUpdated => {
                if let Err(e) = self.client.files_update_ended(&self.agent_name).await {
                    error!("Failed to acknowledge files update: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::StatusCode;

    #[test]
    fn test_already_registered_detection() {
        let already = TransportError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "Execution server 'ces1' is Already registered".to_string(),
        };
        assert!(is_already_registered(&already));

        let other = TransportError::Status {
            status: StatusCode::BAD_REQUEST,
            body: "Unknown execution server type".to_string(),
        };
        assert!(!is_already_registered(&other));

        let decode = TransportError::Decode("already".to_string());
        assert!(!is_already_registered(&decode));
    }

    #[test]
    fn test_state_names() {
        assert_eq!(AgentState::Running.to_string(), "Running");
        assert_eq!(AgentState::Created.name(), "Created");
    }
}
