use crate::context::JobContext;
use crate::convergence::ConvergenceCheck;
use crate::error::ConfigError;
use crate::phase::is_known_phase;
use crate::session::process::validate_url;
use crate::session::ProcessSession;
use crate::status::StatusSink;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Job description read from YAML; command-line flags are merged on top.
#[derive(Debug, Default, Deserialize, Serialize, Clone)]
pub struct JobConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    /// Hops to the device, device last.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default)]
    pub phase: Option<String>,
    #[serde(default)]
    pub platform: Option<String>,
    #[serde(default)]
    pub os: Option<String>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub packages: Vec<String>,
    #[serde(default)]
    pub repository_url: Option<String>,
    #[serde(default)]
    pub commands: Vec<String>,
    /// Unordered restriction to these plugin names.
    #[serde(default)]
    pub plugins: Vec<String>,
    /// Explicit plugin order with per-plugin data.
    #[serde(default)]
    pub mop: Option<Vec<MopStep>>,
    /// YAML file declaring script plugins.
    #[serde(default)]
    pub scripts: Option<PathBuf>,
    #[serde(default)]
    pub reload: Option<ReloadConfig>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct MopStep {
    pub plugin: String,
    #[serde(default)]
    pub data: Value,
}

/// Convergence timings, in seconds.
#[derive(Debug, Default, Deserialize, Serialize, Clone, PartialEq, Eq)]
pub struct ReloadConfig {
    #[serde(default)]
    pub warmup: Option<u64>,
    #[serde(default)]
    pub settle: Option<u64>,
    #[serde(default)]
    pub poll_interval: Option<u64>,
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub overall_timeout: Option<u64>,
}

impl ReloadConfig {
    pub fn apply(&self, check: &mut ConvergenceCheck) {
        let secs = Duration::from_secs;
        if let Some(v) = self.warmup {
            check.warmup = secs(v);
        }
        if let Some(v) = self.settle {
            check.settle = secs(v);
        }
        if let Some(v) = self.poll_interval {
            check.poll_interval = secs(v);
        }
        if let Some(v) = self.max_attempts {
            check.max_attempts = v;
        }
        if let Some(v) = self.overall_timeout {
            check.overall_timeout = secs(v);
        }
    }
}

impl JobConfig {
    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from(".devpipe"))
    }

    /// Plugin names of the explicit order, if there is one.
    pub fn execution_order(&self) -> Option<Vec<String>> {
        self.mop
            .as_ref()
            .map(|steps| steps.iter().map(|s| s.plugin.clone()).collect())
    }

    /// Build the job context, with a device session when urls are given.
    pub fn into_context(self, status: Arc<dyn StatusSink>) -> Result<JobContext, ConfigError> {
        let log_dir = self.log_dir();
        let mut ctx = JobContext::new(self.hostname.clone().unwrap_or_default(), status);
        if !self.urls.is_empty() {
            let session = ProcessSession::from_urls(self.urls.as_slice())?
                .with_session_log(log_dir.join("session.log"));
            ctx = ctx.with_session(Box::new(session));
        }
        if let Some(steps) = &self.mop {
            ctx = ctx.with_mop_data(steps.iter().map(|s| s.data.clone()).collect());
        }
        if let Some(reload) = &self.reload {
            reload.apply(&mut ctx.reload);
        }
        ctx.execution_order = self.execution_order();
        ctx.phase = self.phase;
        ctx.platform = self.platform;
        ctx.os = self.os;
        ctx.name_filter = self.plugins;
        ctx.log_dir = log_dir;
        ctx.packages = self.packages;
        ctx.repository_url = self.repository_url;
        ctx.custom_commands = self.commands;
        Ok(ctx)
    }
}

/// Load YAML file into JobConfig
pub fn load_job(path: &Path) -> Result<JobConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Check phase, urls and the explicit order.
pub fn validate_job(job: &JobConfig) -> Result<(), ConfigError> {
    if let Some(phase) = &job.phase {
        if !is_known_phase(phase) {
            return Err(ConfigError::UnknownPhase(phase.clone()));
        }
    }
    for url in &job.urls {
        validate_url(url)?;
    }
    if job.urls.len() > 1 {
        ProcessSession::from_urls(job.urls.as_slice())?;
    }
    match &job.mop {
        Some(steps) => {
            if steps.is_empty() {
                return Err(ConfigError::Invalid("mop lists no plugins".into()));
            }
            if let Some(pos) = steps.iter().position(|s| s.plugin.trim().is_empty()) {
                return Err(ConfigError::Invalid(format!("mop step {} has no plugin name", pos + 1)));
            }
        }
        None if job.phase.is_none() => {
            return Err(ConfigError::Invalid("either a phase or a mop is required".into()));
        }
        None => {}
    }
    Ok(())
}

/// Helper: validate job file path (for main)
pub fn validate_job_file(path: &Path) -> Result<JobConfig, ConfigError> {
    let job = load_job(path)?;
    validate_job(&job)?;
    Ok(job)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::status::MemorySink;
    use serde_json::json;

    const JOB: &str = "\
hostname: pe1
urls: [ssh://admin@10.0.0.1]
phase: Activate
platform: ASR900
os: XE
log_dir: /tmp/devpipe
packages: [asr900rsp1-universalk9.bin]
mop:
  - plugin: Node Status Check
  - plugin: Install Activate
    data: {mode: issu}
reload:
  warmup: 600
  max_attempts: 5
";

    fn write(dir: &Path, content: &str) -> PathBuf {
        let path = dir.join("job.yaml");
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn loads_and_builds_context() {
        let tmp = tempfile::tempdir().unwrap();
        let job = validate_job_file(&write(tmp.path(), JOB)).unwrap();
        assert_eq!(job.execution_order().unwrap(), ["Node Status Check", "Install Activate"]);

        let ctx = job.into_context(Arc::new(MemorySink::new())).unwrap();
        assert_eq!(ctx.hostname, "pe1");
        assert_eq!(ctx.phase.as_deref(), Some("Activate"));
        assert_eq!(ctx.log_dir, PathBuf::from("/tmp/devpipe"));
        assert_eq!(ctx.reload.warmup, Duration::from_secs(600));
        assert_eq!(ctx.reload.max_attempts, 5);
        assert_eq!(ctx.reload.poll_interval, ConvergenceCheck::default().poll_interval);
        assert_eq!(ctx.plugin_data(), Some(&Value::Null));
    }

    #[test]
    fn mop_data_is_bound_by_position() {
        let job: JobConfig = serde_yaml::from_str(JOB).unwrap();
        let steps = job.mop.unwrap();
        assert_eq!(steps[0].data, Value::Null);
        assert_eq!(steps[1].data, json!({"mode": "issu"}));
    }

    #[test]
    fn rejects_bad_jobs() {
        let job = JobConfig {
            phase: Some("activate".into()),
            ..Default::default()
        };
        assert!(matches!(validate_job(&job), Err(ConfigError::UnknownPhase(_))));

        let job = JobConfig {
            phase: Some("Commit".into()),
            urls: vec!["http://pe1".into()],
            ..Default::default()
        };
        assert!(matches!(validate_job(&job), Err(ConfigError::Url(_))));

        let job = JobConfig {
            mop: Some(vec![MopStep {
                plugin: " ".into(),
                data: Value::Null,
            }]),
            ..Default::default()
        };
        assert!(matches!(validate_job(&job), Err(ConfigError::Invalid(_))));

        assert!(matches!(validate_job(&JobConfig::default()), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn unreadable_and_malformed_files() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            load_job(&tmp.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
        let path = write(tmp.path(), "phase: [unclosed");
        assert!(matches!(load_job(&path), Err(ConfigError::Parse { .. })));
    }
}
