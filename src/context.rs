use crate::convergence::ConvergenceCheck;
use crate::error::{PluginError, SessionError};
use crate::session::Session;
use crate::status::StatusSink;
use crate::util::{normalize_filename, write_artifact};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// State of one job, handed by `&mut` to every plugin in turn.
///
/// Owns the device session for the whole job and the job-scoped key/value
/// store plugins use to pass data to later plugins.
pub struct JobContext {
    pub hostname: String,
    pub phase: Option<String>,
    pub platform: Option<String>,
    pub os: Option<String>,
    /// Explicit plugin order; selects the named dispatcher when set.
    pub execution_order: Option<Vec<String>>,
    /// Optional restriction of an unordered run to these plugin names.
    pub name_filter: Vec<String>,
    pub log_dir: PathBuf,
    /// Where `finalize` writes the job summary.
    pub run_dir: Option<PathBuf>,
    pub packages: Vec<String>,
    pub repository_url: Option<String>,
    pub custom_commands: Vec<String>,
    pub reload: ConvergenceCheck,
    status: Arc<dyn StatusSink>,
    session: Option<Box<dyn Session>>,
    current_plugin: Option<String>,
    plugin_number: usize,
    mop_data: Vec<Value>,
    store: HashMap<String, (Value, DateTime<Utc>)>,
    executed: Vec<String>,
    started: DateTime<Utc>,
    success: bool,
    finalized: bool,
}

impl JobContext {
    pub fn new(hostname: impl Into<String>, status: Arc<dyn StatusSink>) -> Self {
        Self {
            hostname: hostname.into(),
            phase: None,
            platform: None,
            os: None,
            execution_order: None,
            name_filter: Vec::new(),
            log_dir: std::env::temp_dir(),
            run_dir: None,
            packages: Vec::new(),
            repository_url: None,
            custom_commands: Vec::new(),
            reload: ConvergenceCheck::default(),
            status,
            session: None,
            current_plugin: None,
            plugin_number: 1,
            mop_data: Vec::new(),
            store: HashMap::new(),
            executed: Vec::new(),
            started: Utc::now(),
            success: false,
            finalized: false,
        }
    }

    pub fn with_session(mut self, session: Box<dyn Session>) -> Self {
        self.session = Some(session);
        self
    }

    /// Per-plugin data, bound positionally to the execution sequence number.
    pub fn with_mop_data(mut self, data: Vec<Value>) -> Self {
        self.mop_data = data;
        self
    }

    // --- logging and status ---

    fn format_log(&self, message: &str) -> String {
        match &self.current_plugin {
            Some(p) => format!("[{}] {}", p, message),
            None => message.to_string(),
        }
    }

    pub fn debug(&self, message: &str) {
        debug!("{}", self.format_log(message));
    }

    pub fn info(&self, message: &str) {
        info!("{}", self.format_log(message));
    }

    pub fn warning(&self, message: &str) {
        let line = self.format_log(message);
        self.status.save_job_info(&format!("WARNING: {}", line));
        warn!("{}", line);
    }

    /// Log a fatal error and return it for the plugin to propagate.
    pub fn error(&self, message: &str) -> PluginError {
        self.log_error(message);
        PluginError::Fatal(message.to_string())
    }

    pub(crate) fn log_error(&self, message: &str) {
        let line = self.format_log(message);
        self.status.save_job_info(&format!("ERROR: {}", line));
        error!("{}", line);
    }

    pub fn post_status(&self, message: &str) {
        self.status.post_status(message);
    }

    pub fn status(&self) -> Arc<dyn StatusSink> {
        Arc::clone(&self.status)
    }

    // --- plugin bookkeeping ---

    pub fn current_plugin(&self) -> Option<&str> {
        self.current_plugin.as_deref()
    }

    pub(crate) fn set_current_plugin(&mut self, name: Option<&str>) {
        self.current_plugin = name.map(str::to_string);
    }

    /// 1-based sequence number of the plugin being (or about to be) run.
    pub fn plugin_number(&self) -> usize {
        self.plugin_number
    }

    pub(crate) fn complete_plugin(&mut self, name: &str) {
        self.executed.push(name.to_string());
        self.plugin_number += 1;
    }

    /// Names of the plugins that ran to completion, in order.
    pub fn executed(&self) -> &[String] {
        &self.executed
    }

    pub fn plugin_data(&self) -> Option<&Value> {
        self.mop_data.get(self.plugin_number.checked_sub(1)?)
    }

    // --- device session ---

    pub fn session(&mut self) -> Result<&mut dyn Session, SessionError> {
        match self.session.as_mut() {
            Some(s) => Ok(s.as_mut()),
            None => Err(SessionError::NotConnected),
        }
    }

    /// Connect or disconnect so the session state suits the next plugin.
    pub(crate) async fn reconcile_connection(&mut self, needs_connection: bool) -> Result<(), PluginError> {
        let connecting = self.format_log("Connecting with device.");
        let disconnecting = self.format_log("Disconnecting from device.");
        let Some(session) = self.session.as_mut() else {
            if needs_connection {
                return Err(SessionError::NotConnected.into());
            }
            return Ok(());
        };
        if needs_connection && !session.is_connected() {
            info!("{}", connecting);
            session.connect().await?;
        } else if !needs_connection && session.is_connected() {
            info!("{}", disconnecting);
            session.disconnect().await?;
        }
        Ok(())
    }

    // --- job-scoped storage ---

    pub fn save_value(&mut self, key: &str, value: Value) {
        self.store.insert(key.to_string(), (value, Utc::now()));
        self.info(&format!("Key '{}' saved in job storage", key));
    }

    pub fn load_value(&self, key: &str) -> Option<(&Value, DateTime<Utc>)> {
        let (value, at) = self.store.get(key)?;
        self.info(&format!("Key '{}' loaded from job storage", key));
        Some((value, *at))
    }

    pub fn save_data<T: Serialize>(&mut self, key: &str, data: &T) -> Result<(), PluginError> {
        let value = serde_json::to_value(data)?;
        self.save_value(key, value);
        Ok(())
    }

    pub fn load_data<T: DeserializeOwned>(&self, key: &str) -> Result<Option<(T, DateTime<Utc>)>, PluginError> {
        match self.load_value(key) {
            Some((value, at)) => Ok(Some((serde_json::from_value(value.clone())?, at))),
            None => Ok(None),
        }
    }

    /// Save `data` into the log directory under a normalised `name`.
    pub fn save_to_file(&self, name: &str, data: &str) -> Result<PathBuf, PluginError> {
        let file_name = normalize_filename(name);
        std::fs::create_dir_all(&self.log_dir)?;
        let path = write_artifact(&self.log_dir, &file_name, data)?;
        self.info(&format!("File '{}' saved in log directory", file_name));
        Ok(path)
    }

    // --- completion ---

    pub fn succeeded(&self) -> bool {
        self.success
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Record the outcome, release the session and write the job summary.
    /// Later calls are no-ops.
    pub async fn finalize(&mut self, success: bool) {
        if self.finalized {
            return;
        }
        self.finalized = true;
        self.current_plugin = None;
        self.success = success;
        self.info("Plugin manager finished");

        if let Some(session) = self.session.as_mut() {
            if session.is_connected() {
                if let Err(e) = session.disconnect().await {
                    warn!("disconnect failed during finalize: {}", e);
                }
            }
        }

        if let Some(dir) = &self.run_dir {
            let summary = json!({
                "hostname": self.hostname,
                "phase": self.phase,
                "platform": self.platform,
                "os": self.os,
                "success": self.success,
                "executed": self.executed,
                "started": self.started.to_rfc3339(),
                "finished": Utc::now().to_rfc3339(),
            });
            if let Err(e) = write_artifact(dir, "job.json", &summary.to_string()) {
                warn!("failed to write job summary: {}", e);
            }
        }
    }
}
