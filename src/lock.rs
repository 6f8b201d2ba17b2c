use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{info, warn};

/// Liveness check for the process recorded in a lock file. Abstracted so the
/// OS-specific probe stays in one place.
#[async_trait]
pub trait ProcessProbe: Send + Sync {
    async fn is_alive(&self, pid: u32) -> Result<bool>;
}

/// Probes liveness with `kill -0`, which checks process existence without
/// delivering a signal.
pub struct SignalProbe;

#[async_trait]
impl ProcessProbe for SignalProbe {
    async fn is_alive(&self, pid: u32) -> Result<bool> {
        let status = Command::new("kill")
            .arg("-0")
            .arg(pid.to_string())
            .kill_on_drop(true)
            .status()
            .await
            .context("failed to spawn kill")?;
        Ok(status.success())
    }
}

/// Advisory single-instance guard: one PID file per running identity,
/// written at startup and removed at clean shutdown. A lock whose owner
/// cannot be confirmed alive is treated as stale and replaced. Two processes
/// starting in the same instant can still race; that is accepted.
#[derive(Debug)]
pub struct InstanceLock {
    path: PathBuf,
}

impl InstanceLock {
    pub async fn acquire<P: AsRef<Path>>(path: P, probe: &dyn ProcessProbe) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            let contents = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read lock file: {}", path.display()))?;
            match contents.trim().parse::<u32>() {
                Ok(pid) => match probe.is_alive(pid).await {
                    Ok(true) => bail!(
                        "another instance is already running (pid {}); stop it or remove {}",
                        pid,
                        path.display()
                    ),
                    Ok(false) => warn!(pid, "stale lock file found; removing"),
                    Err(err) => {
                        warn!(pid, ?err, "could not probe lock owner; assuming stale")
                    }
                },
                Err(_) => warn!(path = %path.display(), "unreadable lock file; removing"),
            }
            tokio::fs::remove_file(&path)
                .await
                .with_context(|| format!("failed to remove stale lock: {}", path.display()))?;
        }

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
        }

        let pid = std::process::id();
        tokio::fs::write(&path, pid.to_string())
            .await
            .with_context(|| format!("failed to write lock file: {}", path.display()))?;
        info!(pid, path = %path.display(), "acquired instance lock");
        Ok(Self { path })
    }

    pub async fn release(self) -> Result<()> {
        if tokio::fs::try_exists(&self.path).await.unwrap_or(false) {
            tokio::fs::remove_file(&self.path)
                .await
                .with_context(|| format!("failed to remove lock file: {}", self.path.display()))?;
        }
        info!(path = %self.path.display(), "released instance lock");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
