//! Child process helpers shared by the supervisor and the one-shot runners.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::warn;

/// How a child process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitInfo {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitInfo {
    pub fn from_status(status: ExitStatus) -> Self {
        let code = status.code();
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;
        Self { code, signal }
    }

    /// Status reported when waiting on the child failed.
    pub fn unknown() -> Self {
        Self {
            code: None,
            signal: None,
        }
    }

    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Exit code for display, `-1` when the process died from a signal.
    pub fn code_or_default(&self) -> i32 {
        self.code.unwrap_or(-1)
    }

    /// Format exit status as a human-readable string.
    pub fn describe(&self) -> String {
        match (self.code, self.signal) {
            (Some(code), _) => format!("exited with code {}", code),
            (None, Some(sig)) => match signal_name(sig) {
                Some(name) => format!("killed by {} (signal {})", name, sig),
                None => format!("killed by signal {}", sig),
            },
            (None, None) => "exited (unknown status)".to_string(),
        }
    }
}

pub fn signal_name(sig: i32) -> Option<&'static str> {
    match sig {
        9 => Some("SIGKILL"),
        15 => Some("SIGTERM"),
        11 => Some("SIGSEGV"),
        6 => Some("SIGABRT"),
        2 => Some("SIGINT"),
        _ => None,
    }
}

/// Send SIGTERM to a process. Returns false if it could not be signalled.
#[cfg(unix)]
pub fn terminate(pid: u32) -> bool {
    send_signal(pid, libc::SIGTERM)
}

#[cfg(unix)]
fn send_signal(pid: u32, signal: i32) -> bool {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return false;
    };
    // SAFETY: kill(2) has no memory-safety preconditions.
    let rc = unsafe { libc::kill(pid, signal) };
    if rc != 0 {
        warn!(
            "failed to send signal {} to {}: {}",
            signal,
            pid,
            std::io::Error::last_os_error()
        );
    }
    rc == 0
}

#[cfg(not(unix))]
pub fn terminate(_pid: u32) -> bool {
    false
}

/// Kill a child and wait for it to be reaped.
///
/// The wait is bounded; a child that is still around afterwards is left to
/// `kill_on_drop`.
pub async fn kill_and_reap(child: &mut Child) -> ExitInfo {
    if let Err(e) = child.start_kill() {
        warn!("failed to kill child process: {:?}", e);
    }
    match tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
        Ok(Ok(status)) => ExitInfo::from_status(status),
        Ok(Err(e)) => {
            warn!("error waiting for killed child: {:?}", e);
            ExitInfo::unknown()
        }
        Err(_) => {
            warn!("timeout waiting for killed child to exit");
            ExitInfo::unknown()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    #[test]
    fn test_describe_exit() {
        let exited = ExitInfo {
            code: Some(3),
            signal: None,
        };
        assert_eq!(exited.describe(), "exited with code 3");
        assert!(!exited.success());

        let killed = ExitInfo {
            code: None,
            signal: Some(15),
        };
        assert_eq!(killed.describe(), "killed by SIGTERM (signal 15)");
        assert_eq!(killed.code_or_default(), -1);

        let odd = ExitInfo {
            code: None,
            signal: Some(40),
        };
        assert_eq!(odd.describe(), "killed by signal 40");
        assert_eq!(ExitInfo::unknown().describe(), "exited (unknown status)");
    }

    #[tokio::test]
    async fn test_exit_info_from_real_status() {
        let status = Command::new("sh")
            .args(["-c", "exit 4"])
            .status()
            .await
            .unwrap();
        let info = ExitInfo::from_status(status);
        assert_eq!(info.code, Some(4));
        assert_eq!(info.signal, None);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_sends_sigterm() {
        let mut child = Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();
        let pid = child.id().unwrap();

        assert!(terminate(pid));
        let info = ExitInfo::from_status(child.wait().await.unwrap());
        assert_eq!(info.signal, Some(libc::SIGTERM));
        assert!(!info.success());
    }

    #[tokio::test]
    async fn test_kill_and_reap() {
        let mut child = Command::new("sleep")
            .arg("60")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let info = kill_and_reap(&mut child).await;
        assert_eq!(info.code, None);
        assert!(child.try_wait().unwrap().is_some());
    }
}
