use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::models::StatusReport;
use crate::registry::ExecutionRegistry;
use crate::transport::ControllerClient;

/// Periodically tells the controller which executions are still running.
pub struct HeartbeatSender {
    client: Arc<ControllerClient>,
    registry: ExecutionRegistry,
    agent_name: String,
    interval: Duration,
}

impl HeartbeatSender {
    pub fn new(
        client: Arc<ControllerClient>,
        registry: ExecutionRegistry,
        agent_name: &str,
        interval: Duration,
    ) -> Self {
        Self {
            client,
            registry,
            agent_name: agent_name.to_string(),
            interval: interval.max(Duration::from_millis(1)),
        }
    }

    /// Sends a heartbeat every interval until `shutdown` is cancelled.
    /// Failed heartbeats are logged and never end the loop.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {}
            }

            self.beat().await;
        }

        info!("Heartbeat stopped");
    }

    async fn beat(&self) {
        let status = StatusReport {
            name: self.agent_name.clone(),
            execution_ids: self.registry.snapshot(),
        };
        debug!("Heartbeat with {} running executions", status.execution_ids.len());

        if let Err(e) = self.client.send_status(&status).await {
            warn!("Heartbeat failed: {}", e);
        }
    }
}
