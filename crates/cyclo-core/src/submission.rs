//! The submission preparer.
//!
//! Owns the pure/filesystem pieces of submission prep -- job-log directory
//! layout, the `NN` symlink, and runtime-config override materialization
//! -- plus the trait contracts for the external collaborators (host
//! selector, job-file writer, remote run-dir initializer are out of
//! scope here, contracts only).

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::identity::TaskId;
use crate::task_def::RuntimeConfig;

/// A frozen mapping consumed by the (out-of-scope) job-file writer.
#[derive(Debug, Clone)]
pub struct JobConf {
    pub task: TaskId,
    pub submit_number: u32,
    pub script: String,
    pub environment: HashMap<String, String>,
    pub directives: HashMap<String, String>,
    pub batch_system_name: String,
    pub job_log_dir: PathBuf,
    pub user_at_host: Option<String>,
}

/// Optional per-submission overrides applied atomically on top of the
/// task definition's base runtime config.
#[derive(Debug, Clone, Default)]
pub struct RtConfigOverrides {
    pub environment: HashMap<String, String>,
    pub directives: HashMap<String, String>,
}

/// Materialize an `rtconfig` view with overrides applied atomically: the
/// base config is never mutated in place, a new merged one is built and
/// handed back whole.
pub fn materialize_rtconfig(base: &RuntimeConfig, overrides: &RtConfigOverrides) -> RuntimeConfig {
    let mut merged = base.clone();
    for (k, v) in &overrides.environment {
        merged.environment.insert(k.clone(), v.clone());
    }
    for (k, v) in &overrides.directives {
        merged.directives.insert(k.clone(), v.clone());
    }
    merged
}

/// Host-relative job-log directory for one submit number:
/// `<cycle-point>/<task-name>/<NN|submit-number>/`.
pub fn job_log_dir(root: &Path, task: &TaskId, submit_number: u32) -> PathBuf {
    root.join(task.point.to_string())
        .join(&task.name)
        .join(format!("{submit_number:02}"))
}

/// Create the local job-log directory for `submit_number` and refresh the
/// `NN` symlink to point at it. On retry, the caller removes the
/// previous submit number's directory first (`new-mode`).
pub fn prepare_job_log_dir(root: &Path, task: &TaskId, submit_number: u32) -> io::Result<PathBuf> {
    let dir = job_log_dir(root, task, submit_number);
    fs::create_dir_all(&dir)?;
    refresh_nn_symlink(root, task, submit_number)?;
    Ok(dir)
}

/// Relink `NN -> <submit_number>` inside `<root>/<point>/<name>/`.
pub fn refresh_nn_symlink(root: &Path, task: &TaskId, submit_number: u32) -> io::Result<()> {
    let task_dir = root.join(task.point.to_string()).join(&task.name);
    let link = task_dir.join("NN");
    let target = format!("{submit_number:02}");

    if link.symlink_metadata().is_ok() {
        fs::remove_file(&link)?;
    }
    #[cfg(unix)]
    std::os::unix::fs::symlink(&target, &link)?;
    #[cfg(not(unix))]
    fs::write(&link, &target)?;
    Ok(())
}

/// Remove a prior submit number's job-log directory before writing a
/// fresh one on retry (`new-mode`).
pub fn remove_job_log_dir(root: &Path, task: &TaskId, submit_number: u32) -> io::Result<()> {
    let dir = job_log_dir(root, task, submit_number);
    match fs::remove_dir_all(&dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Resolves `task-host` for a proxy, possibly by running a configured
/// sub-command. Out of scope to implement; the core only consumes this
/// contract.
#[async_trait]
pub trait HostSelector: Send + Sync {
    async fn select_host(&self, runtime: &RuntimeConfig) -> anyhow::Result<Option<String>>;
}

/// Initializes the remote run-dir on the selected host. Out of scope;
/// contract only.
#[async_trait]
pub trait RemoteRunDirInitializer: Send + Sync {
    async fn init_run_dir(&self, host: &str, task: &TaskId) -> anyhow::Result<()>;
}

/// Writes the job file from a `JobConf`. Out of scope; contract only.
#[async_trait]
pub trait JobFileWriter: Send + Sync {
    async fn write_job_file(&self, conf: &JobConf) -> anyhow::Result<PathBuf>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycle_point::CyclePoint;
    use tempfile::tempdir;

    fn task() -> TaskId {
        TaskId::new("foo", CyclePoint::Integer(1))
    }

    #[test]
    fn job_log_dir_matches_layout() {
        let root = Path::new("/runs/suite1");
        let dir = job_log_dir(root, &task(), 3);
        assert_eq!(dir, PathBuf::from("/runs/suite1/1/foo/03"));
    }

    #[test]
    fn prepare_job_log_dir_creates_dir_and_symlink() {
        let tmp = tempdir().unwrap();
        let dir = prepare_job_log_dir(tmp.path(), &task(), 1).unwrap();
        assert!(dir.is_dir());
        let link = tmp.path().join("1").join("foo").join("NN");
        assert!(link.symlink_metadata().is_ok());
    }

    #[test]
    fn refresh_nn_symlink_relinks_on_retry() {
        let tmp = tempdir().unwrap();
        prepare_job_log_dir(tmp.path(), &task(), 1).unwrap();
        prepare_job_log_dir(tmp.path(), &task(), 2).unwrap();
        let link = tmp.path().join("1").join("foo").join("NN");
        let target = fs::read_link(&link).unwrap();
        assert_eq!(target, PathBuf::from("02"));
    }

    #[test]
    fn remove_job_log_dir_is_idempotent() {
        let tmp = tempdir().unwrap();
        prepare_job_log_dir(tmp.path(), &task(), 1).unwrap();
        remove_job_log_dir(tmp.path(), &task(), 1).unwrap();
        remove_job_log_dir(tmp.path(), &task(), 1).unwrap();
        let dir = job_log_dir(tmp.path(), &task(), 1);
        assert!(!dir.exists());
    }

    #[test]
    fn materialize_rtconfig_applies_overrides_without_mutating_base() {
        let base = RuntimeConfig {
            script: "true".into(),
            environment: HashMap::new(),
            directives: HashMap::new(),
            retry_delays: vec![],
            submission_retry_delays: vec![],
            event_hooks: Default::default(),
            polling_intervals: crate::task_def::PollingIntervals {
                submission: chrono::Duration::seconds(60),
                execution: chrono::Duration::seconds(60),
            },
            submission_timeout: None,
            execution_timeout: None,
            reset_execution_timer: false,
            batch_system_name: "background".into(),
            task_host: None,
            simulation: None,
        };
        let mut overrides = RtConfigOverrides::default();
        overrides.environment.insert("FOO".into(), "BAR".into());

        let merged = materialize_rtconfig(&base, &overrides);
        assert_eq!(merged.environment.get("FOO"), Some(&"BAR".to_string()));
        assert!(base.environment.is_empty());
    }
}
