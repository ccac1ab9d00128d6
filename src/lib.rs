//! An execution server agent for a remote job-scheduling controller.
//!
//! The agent logs in, optionally registers itself with a capacity, then polls
//! the controller for commands. Each started job runs on its own task through
//! a [`JobHandler`](handler::JobHandler); results and reports are sent back
//! when the job ends. A heartbeat keeps the controller informed of which jobs
//! are still running.

pub mod agent_config;
pub mod error;
pub mod execution;
pub mod handler;
pub mod heartbeat;
pub mod models;
pub mod process_handler;
pub mod registry;
pub mod shutdown;
pub mod transport;
pub mod worker;
