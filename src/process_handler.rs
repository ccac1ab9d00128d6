//! A [`JobHandler`] that runs each job as a shell command.
//!
//! The job path and arguments are joined into one command line and handed to
//! the configured shell. Stdout and stderr are merged line by line, in the order
//! they were written, into a plain-text report. Each job runs in its own process
//! group so a stop request reaches everything the shell started.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use log::{debug, info};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::agent_config::JobsConfig;
use crate::handler::{HandlerError, JobHandler};
use crate::models::{CommandResult, JobRequest, Report};
use crate::transport::redact;

const REPORT_MIME_TYPE: &str = "text/plain";

pub struct ProcessHandler {
    shell: String,
    working_directory: Option<PathBuf>,
    /// Stop tokens per execution id. The controller may reuse an id, so every
    /// run under it keeps its own entry, tagged with a run number.
    running: Mutex<HashMap<String, Vec<(u64, CancellationToken)>>>,
    next_run: AtomicU64,
}

impl ProcessHandler {
    pub fn new(config: &JobsConfig) -> Self {
        Self {
            shell: config.shell.clone(),
            working_directory: config.working_directory.as_ref().map(PathBuf::from),
            running: Mutex::new(HashMap::new()),
            next_run: AtomicU64::new(0),
        }
    }

    pub fn is_running(&self, execution_id: &str) -> bool {
        self.running.lock().contains_key(execution_id)
    }

    fn command_line(job: &JobRequest) -> String {
        let mut line = job.job_path.clone();
        // The controller sends the literal string "None" for absent arguments.
        if !job.job_arguments.is_empty() && job.job_arguments != "None" {
            line.push(' ');
            line.push_str(&job.job_arguments);
        }
        line
    }

    async fn run(&self, job: &JobRequest, stop: &CancellationToken) -> Result<CommandResult, HandlerError> {
        let command_line = Self::command_line(job);

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(&command_line)
            .env("EXECUTION_ID", &job.execution_id)
            .env("RESERVATION_ID", &job.reservation_id)
            .env("RESERVATION_CONTEXT", &job.reservation_context)
            .env("USERNAME", &job.username)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);
        if let Some(dir) = &self.working_directory {
            command.current_dir(dir);
        }

        debug!("Execution {}: Running {}", job.execution_id, redact(&command_line));
        let mut child = command.spawn()?;
        let pid = child.id();
        let (stdout, stderr) = match (child.stdout.take(), child.stderr.take()) {
            (Some(stdout), Some(stderr)) => (stdout, stderr),
            _ => return Err("child output was not captured".into()),
        };

        let finished = async {
            let output = merge_output(stdout, stderr).await?;
            let status = child.wait().await?;
            Ok::<_, std::io::Error>((output, status))
        };

        let (output, status) = tokio::select! {
            finished = finished => finished?,
            _ = stop.cancelled() => {
                terminate_group(pid);
                info!("Execution {}: process killed on request", job.execution_id);
                return Ok(CommandResult::Stopped);
            }
        };

        let text = String::from_utf8_lossy(&output).into_owned();

        let now = chrono::Local::now().format("%b-%d-%Y_%H.%M.%S");
        let result = match status.code() {
            Some(0) => CommandResult::Passed(Report::new(format!("{}.txt", now), text, REPORT_MIME_TYPE)),
            code => {
                let code = code.unwrap_or(-1);
                CommandResult::Failed(Report::new(
                    format!("{}-status{}.txt", now, code),
                    text,
                    REPORT_MIME_TYPE,
                ))
            }
        };

        debug!("Execution {}: {} ({})", job.execution_id, result.kind(), status);
        Ok(result)
    }

    fn release(&self, execution_id: &str, run: u64) {
        let mut running = self.running.lock();
        if let Some(runs) = running.get_mut(execution_id) {
            runs.retain(|(id, _)| *id != run);
            if runs.is_empty() {
                running.remove(execution_id);
            }
        }
    }
}

/// Reads both streams to the end, appending whole lines in arrival order.
async fn merge_output<O, E>(stdout: O, stderr: E) -> std::io::Result<Vec<u8>>
where
    O: AsyncRead + Unpin,
    E: AsyncRead + Unpin,
{
    let mut stdout = BufReader::new(stdout);
    let mut stderr = BufReader::new(stderr);
    let (mut out_line, mut err_line) = (Vec::new(), Vec::new());
    let (mut out_done, mut err_done) = (false, false);
    let mut merged = Vec::new();

    // read_until keeps partial input in the line buffer when the other branch wins.
    while !(out_done && err_done) {
        tokio::select! {
            read = stdout.read_until(b'\n', &mut out_line), if !out_done => {
                if read? == 0 {
                    out_done = true;
                } else if out_line.ends_with(b"\n") {
                    merged.append(&mut out_line);
                }
            }
            read = stderr.read_until(b'\n', &mut err_line), if !err_done => {
                if read? == 0 {
                    err_done = true;
                } else if err_line.ends_with(b"\n") {
                    merged.append(&mut err_line);
                }
            }
        }
    }

    merged.append(&mut out_line);
    merged.append(&mut err_line);
    Ok(merged)
}

#[cfg(unix)]
fn terminate_group(pid: Option<u32>) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let Some(pid) = pid else { return };
    match killpg(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
        Err(e) => debug!("Failed to signal process group {}: {}", pid, e),
    }
}

// Dropping the child still kills the shell itself.
#[cfg(not(unix))]
fn terminate_group(_pid: Option<u32>) {}

#[async_trait]
impl JobHandler for ProcessHandler {
    async fn execute(&self, job: JobRequest) -> Result<Option<CommandResult>, HandlerError> {
        let stop = CancellationToken::new();
        let run = self.next_run.fetch_add(1, Ordering::Relaxed);
        self.running
            .lock()
            .entry(job.execution_id.clone())
            .or_default()
            .push((run, stop.clone()));

        let result = self.run(&job, &stop).await;

        self.release(&job.execution_id, run);
        result.map(Some)
    }

    fn cancel(&self, execution_id: &str) {
        match self.running.lock().get(execution_id) {
            Some(runs) => runs.iter().for_each(|(_, stop)| stop.cancel()),
            None => debug!("Stop requested for {}, which is not running here", execution_id),
        }
    }
}
