use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

/// Producer of porcelain v1 status listings.
///
/// `None` means "status unavailable": missing binary, non-zero exit or timeout.
pub trait StatusSource: Send + Sync {
    fn list(&self, repo_root: &Path) -> Option<String>;
}

/// Runs `git status --porcelain=v1` in the repository root.
#[derive(Debug, Clone)]
pub struct GitStatusCommand {
    timeout: Duration,
}

const POLL_INTERVAL: Duration = Duration::from_millis(20);

impl GitStatusCommand {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for GitStatusCommand {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl StatusSource for GitStatusCommand {
    fn list(&self, repo_root: &Path) -> Option<String> {
        let mut child = match Command::new("git")
            .args(["status", "--porcelain=v1"])
            .current_dir(repo_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                debug!(repo = %repo_root.display(), %err, "failed to spawn git");
                return None;
            }
        };

        // drain stdout concurrently so a large listing cannot fill the pipe
        let mut stdout = child.stdout.take()?;
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    debug!(repo = %repo_root.display(), "git status timed out, killing");
                    let _ = child.kill();
                    let _ = child.wait();
                    return None;
                }
                Ok(None) => std::thread::sleep(POLL_INTERVAL),
                Err(err) => {
                    debug!(repo = %repo_root.display(), %err, "failed to wait for git");
                    let _ = child.kill();
                    return None;
                }
            }
        };

        if !status.success() {
            debug!(repo = %repo_root.display(), ?status, "git status failed");
            return None;
        }

        match reader.join() {
            Ok(Ok(bytes)) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            _ => None,
        }
    }
}
