//! Tasks attached to a running process: output relay, exit monitor and the
//! supervisor's exit control loop.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::slots::SlotTable;
use crate::hub::{LogEvent, LogHub};
use crate::process::{self, ExitInfo};
use crate::store::{FileStore, ProjectStatus};

/// How long an exited process's output may keep draining before the exit
/// is reported anyway.
const RELAY_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Sent to the control loop when a supervised process ends.
#[derive(Debug)]
pub(crate) struct ExitNotice {
    pub project_id: String,
    pub generation: u64,
    pub pid: u32,
    pub exit: ExitInfo,
}

/// Relay both output streams to the hub, line by line, in arrival order.
///
/// Standard error lines are tagged. A final line without a newline is still
/// delivered.
pub(crate) fn spawn_relay<O, E>(hub: LogHub, project_id: String, stdout: O, stderr: E) -> JoinHandle<()>
where
    O: AsyncRead + Unpin + Send + 'static,
    E: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut out = BufReader::new(stdout);
        let mut err = BufReader::new(stderr);
        let mut out_buf = Vec::new();
        let mut err_buf = Vec::new();
        let mut out_open = true;
        let mut err_open = true;

        while out_open || err_open {
            tokio::select! {
                res = out.read_until(b'\n', &mut out_buf), if out_open => {
                    if !matches!(res, Ok(n) if n > 0) {
                        out_open = false;
                    }
                    if !out_buf.is_empty() {
                        hub.log(&project_id, String::from_utf8_lossy(&out_buf).into_owned());
                        out_buf.clear();
                    }
                }
                res = err.read_until(b'\n', &mut err_buf), if err_open => {
                    if !matches!(res, Ok(n) if n > 0) {
                        err_open = false;
                    }
                    if !err_buf.is_empty() {
                        hub.emit(&project_id, LogEvent::stderr(String::from_utf8_lossy(&err_buf)));
                        err_buf.clear();
                    }
                }
            }
        }
        debug!(project_id, "output relay finished");
    })
}

/// Parameters of one monitored run.
pub(crate) struct MonitorArgs {
    pub project_id: String,
    pub generation: u64,
    pub pid: u32,
    pub stop_rx: oneshot::Receiver<()>,
    pub escalation: Option<Duration>,
    pub relay: JoinHandle<()>,
    pub exits: mpsc::UnboundedSender<ExitNotice>,
}

/// Own the child until it exits, then report the exit.
///
/// A stop request (or the stop channel being dropped) sends SIGTERM; with an
/// escalation window a process still alive afterwards gets SIGKILL.
pub(crate) fn spawn_monitor(mut child: Child, args: MonitorArgs) -> JoinHandle<()> {
    tokio::spawn(async move {
        let MonitorArgs {
            project_id,
            generation,
            pid,
            mut stop_rx,
            escalation,
            relay,
            exits,
        } = args;

        let exit = tokio::select! {
            status = child.wait() => exit_from(status),
            _ = &mut stop_rx => {
                debug!(project_id, pid, "stop requested, sending SIGTERM");
                process::terminate(pid);
                match escalation {
                    Some(grace) => match tokio::time::timeout(grace, child.wait()).await {
                        Ok(status) => exit_from(status),
                        Err(_) => {
                            warn!(project_id, pid, "process ignored SIGTERM, killing");
                            process::kill_and_reap(&mut child).await
                        }
                    },
                    None => exit_from(child.wait().await),
                }
            }
        };

        if tokio::time::timeout(RELAY_DRAIN_TIMEOUT, relay).await.is_err() {
            debug!(project_id, pid, "output still open after exit, reporting anyway");
        }

        let notice = ExitNotice {
            project_id,
            generation,
            pid,
            exit,
        };
        if exits.send(notice).is_err() {
            debug!("exit control loop is gone");
        }
    })
}

fn exit_from(status: std::io::Result<std::process::ExitStatus>) -> ExitInfo {
    match status {
        Ok(status) => ExitInfo::from_status(status),
        Err(e) => {
            warn!("error waiting for process: {:?}", e);
            ExitInfo::unknown()
        }
    }
}

/// Apply exit notices: deregister the run, then persist its terminal status.
///
/// A notice whose run no longer owns the slot (stopped on request, or
/// replaced) changes nothing.
pub(crate) fn spawn_control_loop(
    mut exits: mpsc::UnboundedReceiver<ExitNotice>,
    slots: SlotTable,
    store: Arc<dyn FileStore>,
    hub: LogHub,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(notice) = exits.recv().await {
            let ExitNotice {
                project_id,
                generation,
                pid,
                exit,
            } = notice;

            if slots.release(&project_id, generation).is_none() {
                debug!(project_id, pid, "exit of a run that no longer owns its slot");
                continue;
            }

            let status = if exit.success() {
                hub.log(
                    &project_id,
                    "\n✅ Process completed successfully (exit code 0)\n",
                );
                ProjectStatus::Completed
            } else {
                let mut line = format!("\n❌ Process exited with code {}", exit.code_or_default());
                if let Some(sig) = exit.signal {
                    line.push_str(&format!(" and signal {}", process::signal_name(sig).unwrap_or("unknown")));
                }
                line.push('\n');
                hub.log(&project_id, line);
                ProjectStatus::Error
            };
            info!(project_id, pid, status = %status, "process {}", exit.describe());

            if let Err(e) = store.set_project_status(&project_id, status).await {
                error!(project_id, "failed to persist exit status: {}", e);
            }
        }
        debug!("exit control loop finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_relay_preserves_order_and_tags_stderr() {
        let hub = LogHub::default();
        let mut sub = hub.subscribe("p1");
        let stdout: &[u8] = b"one\ntwo\nno newline";
        let stderr: &[u8] = b"";

        spawn_relay(hub.clone(), "p1".to_string(), stdout, stderr)
            .await
            .unwrap();

        assert_eq!(sub.recv().await, Some(LogEvent::log("one\n")));
        assert_eq!(sub.recv().await, Some(LogEvent::log("two\n")));
        assert_eq!(sub.recv().await, Some(LogEvent::log("no newline")));
    }

    #[tokio::test]
    async fn test_relay_tags_stderr_lines() {
        let hub = LogHub::default();
        let mut sub = hub.subscribe("p1");
        let stdout: &[u8] = b"";
        let stderr: &[u8] = b"Traceback\n";

        spawn_relay(hub.clone(), "p1".to_string(), stdout, stderr)
            .await
            .unwrap();

        assert_eq!(sub.recv().await, Some(LogEvent::log("[ERROR] Traceback\n")));
    }
}
