use anyhow::Result;
use async_trait::async_trait;
use tg_poembot::lock::{InstanceLock, ProcessProbe, SignalProbe};

/// Reports alive only for the recorded pid, like a real probe would once the
/// first owner has exited.
struct PidProbe {
    alive_pid: Option<u32>,
}

#[async_trait]
impl ProcessProbe for PidProbe {
    async fn is_alive(&self, pid: u32) -> Result<bool> {
        Ok(self.alive_pid == Some(pid))
    }
}

#[tokio::test]
async fn lock_lifecycle_across_instances() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join(".bot-primary.pid");
    let own_pid = std::process::id();

    // Fresh start: lock created with our pid.
    let first = InstanceLock::acquire(&path, &PidProbe { alive_pid: None })
        .await
        .unwrap();
    assert_eq!(
        tokio::fs::read_to_string(&path).await.unwrap(),
        own_pid.to_string()
    );

    // Second instance while the first owner is alive: refused.
    let err = InstanceLock::acquire(
        &path,
        &PidProbe {
            alive_pid: Some(own_pid),
        },
    )
    .await
    .unwrap_err();
    assert!(err.to_string().contains("already running"));

    // First owner died: the stale lock is replaced.
    let second = InstanceLock::acquire(&path, &PidProbe { alive_pid: None })
        .await
        .unwrap();
    assert!(path.exists());

    second.release().await.unwrap();
    assert!(!path.exists());

    // Releasing the superseded first lock after its file is gone is a no-op.
    first.release().await.unwrap();
}

#[tokio::test]
async fn signal_probe_confirms_a_live_process() {
    assert!(SignalProbe.is_alive(std::process::id()).await.unwrap());
}
