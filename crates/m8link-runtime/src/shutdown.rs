//! Graceful shutdown for the audio capture child with SIGTERM → SIGKILL
//! escalation.

use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tokio::time::timeout;

#[cfg(unix)]
use nix::sys::signal::{self, Signal};
#[cfg(unix)]
use nix::unistd::Pid;

/// Grace period before SIGTERM escalates to SIGKILL. The capture helper's
/// contract requires it to exit within a second of SIGTERM.
const TERM_GRACE: Duration = Duration::from_secs(1);

/// Stop a child process: SIGTERM, wait up to [`TERM_GRACE`], then SIGKILL
/// and reap. On non-Unix platforms the process is killed immediately.
pub async fn shutdown_child(mut child: Child) -> io::Result<ExitStatus> {
    #[cfg(unix)]
    {
        shutdown_unix(&mut child).await
    }

    #[cfg(not(unix))]
    {
        child.kill().await?;
        child.wait().await
    }
}

#[cfg(unix)]
async fn shutdown_unix(child: &mut Child) -> io::Result<ExitStatus> {
    let Some(pid) = child.id() else {
        // Already reaped.
        return child.wait().await;
    };

    if let Err(e) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
        if e == nix::errno::Errno::ESRCH {
            return child.wait().await;
        }
        return Err(io::Error::other(e));
    }

    if let Ok(result) = timeout(TERM_GRACE, child.wait()).await {
        return result;
    }

    // Grace period expired; SIGKILL and reap.
    child.kill().await?;
    child.wait().await
}
