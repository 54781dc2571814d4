//! Process registry for launched binaries.
//!
//! Children run detached from this process: no stdio, their own process
//! group, and they are not killed when the handle is dropped. A watcher task
//! per child records its exit and applies the [`RestartPolicy`]. The
//! bootstrap sequence only calls [`Supervisor::launch`] and never waits on a
//! child.

use edgeboot_common::{Error, Result, Timestamp};
use std::collections::HashMap;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartPolicy {
    Never,
    /// Relaunch after any exit, up to `max_restarts` times.
    OnExit { max_restarts: u32, backoff: Duration },
}

impl RestartPolicy {
    pub fn from_limit(limit: u32) -> Self {
        if limit == 0 {
            RestartPolicy::Never
        } else {
            RestartPolicy::OnExit {
                max_restarts: limit,
                backoff: Duration::from_secs(5),
            }
        }
    }

    fn allows(&self, restarts: u32) -> Option<Duration> {
        match self {
            RestartPolicy::Never => None,
            RestartPolicy::OnExit {
                max_restarts,
                backoff,
            } => (restarts < *max_restarts).then_some(*backoff),
        }
    }
}

/// Binary plus argument vector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub binary: PathBuf,
    pub args: Vec<String>,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, binary: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            binary: binary.into(),
            args,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProcessStatus {
    pub spec: ProcessSpec,
    pub pid: Option<u32>,
    pub launched_at: Timestamp,
    pub restarts: u32,
    pub running: bool,
    pub last_exit: Option<i32>,
}

#[derive(Clone)]
pub struct Supervisor {
    processes: Arc<RwLock<HashMap<String, ProcessStatus>>>,
    policy: RestartPolicy,
}

impl Supervisor {
    pub fn new(policy: RestartPolicy) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            policy,
        }
    }

    /// Launch a binary and return its pid. Missing binaries are refused.
    pub async fn launch(&self, spec: ProcessSpec) -> Result<u32> {
        if !spec.binary.is_file() {
            return Err(Error::Spawn {
                name: spec.name.clone(),
                reason: format!("{:?} does not exist", spec.binary),
            });
        }

        let child = spawn_detached(&spec)?;
        let pid = child.id().unwrap_or_default();
        info!("{} started (pid {})", spec.name, pid);

        self.processes.write().await.insert(
            spec.name.clone(),
            ProcessStatus {
                spec: spec.clone(),
                pid: Some(pid),
                launched_at: Timestamp::now(),
                restarts: 0,
                running: true,
                last_exit: None,
            },
        );

        tokio::spawn(watch(self.clone(), spec, child));
        Ok(pid)
    }

    pub async fn status(&self, name: &str) -> Option<ProcessStatus> {
        self.processes.read().await.get(name).cloned()
    }

    pub async fn snapshot(&self) -> Vec<ProcessStatus> {
        let mut all: Vec<_> = self.processes.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.spec.name.cmp(&b.spec.name));
        all
    }

    async fn record_exit(&self, name: &str, code: Option<i32>) -> u32 {
        let mut processes = self.processes.write().await;
        match processes.get_mut(name) {
            Some(status) => {
                status.running = false;
                status.pid = None;
                status.last_exit = code;
                status.restarts
            }
            None => 0,
        }
    }

    async fn record_restart(&self, name: &str, pid: Option<u32>) {
        if let Some(status) = self.processes.write().await.get_mut(name) {
            status.pid = pid;
            status.running = true;
            status.restarts += 1;
            status.launched_at = Timestamp::now();
        }
    }
}

fn spawn_detached(spec: &ProcessSpec) -> Result<Child> {
    debug!("Spawning {:?} {:?}", spec.binary, spec.args);

    let mut std_cmd = std::process::Command::new(&spec.binary);
    std_cmd
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .process_group(0);

    let mut cmd = Command::from(std_cmd);
    cmd.kill_on_drop(false);
    cmd.spawn().map_err(|e| Error::Spawn {
        name: spec.name.clone(),
        reason: e.to_string(),
    })
}

async fn watch(supervisor: Supervisor, spec: ProcessSpec, mut child: Child) {
    loop {
        let code = match child.wait().await {
            Ok(status) => status.code(),
            Err(e) => {
                warn!("Lost track of {}: {}", spec.name, e);
                None
            }
        };

        let restarts = supervisor.record_exit(&spec.name, code).await;
        let Some(backoff) = supervisor.policy.allows(restarts) else {
            info!("{} exited with {:?}", spec.name, code);
            return;
        };

        warn!(
            "{} exited with {:?}, restart #{} in {:?}",
            spec.name,
            code,
            restarts + 1,
            backoff
        );
        tokio::time::sleep(backoff).await;

        child = match spawn_detached(&spec) {
            Ok(child) => child,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };
        supervisor.record_restart(&spec.name, child.id()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn shell(name: &str, script: &str) -> ProcessSpec {
        ProcessSpec::new(name, "/bin/sh", vec!["-c".to_string(), script.to_string()])
    }

    async fn wait_until<F>(supervisor: &Supervisor, name: &str, predicate: F) -> ProcessStatus
    where
        F: Fn(&ProcessStatus) -> bool,
    {
        for _ in 0..200 {
            if let Some(status) = supervisor.status(name).await {
                if predicate(&status) {
                    return status;
                }
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        panic!("condition not reached for {}", name);
    }

    #[tokio::test]
    async fn test_missing_binary_is_not_launched() {
        let dir = TempDir::new().unwrap();
        let supervisor = Supervisor::new(RestartPolicy::Never);
        let spec = ProcessSpec::new("engine", dir.path().join("engine"), vec![]);

        let result = supervisor.launch(spec).await;
        assert!(matches!(result, Err(Error::Spawn { .. })));
        assert!(supervisor.snapshot().await.is_empty());
    }

    #[tokio::test]
    async fn test_launch_records_and_observes_exit() {
        let supervisor = Supervisor::new(RestartPolicy::Never);

        let pid = supervisor.launch(shell("quick", "exit 3")).await.unwrap();
        assert!(pid > 0);

        let status = wait_until(&supervisor, "quick", |s| !s.running).await;
        assert_eq!(status.last_exit, Some(3));
        assert_eq!(status.restarts, 0);
        assert_eq!(status.spec.args[1], "exit 3");
    }

    #[tokio::test]
    async fn test_restart_policy_limits_relaunches() {
        let supervisor = Supervisor::new(RestartPolicy::OnExit {
            max_restarts: 2,
            backoff: Duration::from_millis(10),
        });

        supervisor.launch(shell("crashy", "exit 1")).await.unwrap();

        let status = wait_until(&supervisor, "crashy", |s| s.restarts == 2 && !s.running).await;
        assert_eq!(status.last_exit, Some(1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(supervisor.status("crashy").await.unwrap().restarts, 2);
    }

    #[tokio::test]
    async fn test_long_running_child_stays_running() {
        let supervisor = Supervisor::new(RestartPolicy::Never);

        supervisor.launch(shell("sleeper", "sleep 2")).await.unwrap();

        let status = supervisor.status("sleeper").await.unwrap();
        assert!(status.running);
        assert!(status.pid.is_some());
        assert_eq!(supervisor.snapshot().await.len(), 1);
    }

    #[test]
    fn test_policy_from_limit() {
        assert_eq!(RestartPolicy::from_limit(0), RestartPolicy::Never);
        assert_eq!(
            RestartPolicy::from_limit(3).allows(2),
            Some(Duration::from_secs(5))
        );
        assert_eq!(RestartPolicy::from_limit(3).allows(3), None);
    }
}
