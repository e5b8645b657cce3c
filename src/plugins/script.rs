//! Plugins that run an external command on the host instead of talking to
//! the device.
//!
//! Declared in a YAML file:
//!
//! ```yaml
//! plugins:
//!   - name: Traffic Snapshot
//!     phases: [Pre-Check, Post-Check]
//!     platforms: []
//!     os: []
//!     command: ./scripts/snapshot.sh pe1
//!     timeout: 300
//! ```
//!
//! A `full_command` string in the plugin data replaces `command` for one run.
//! Output goes to `<log_dir>/script.log`.

use super::{Plugin, PluginManifest};
use crate::context::JobContext;
use crate::error::PluginError;
use anyhow::Context;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::process::Command;

const DEFAULT_TIMEOUT_SECS: u64 = 600;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScriptDef {
    #[serde(flatten)]
    pub manifest: PluginManifest,
    #[serde(default)]
    pub command: String,
    /// Seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ScriptFile {
    #[serde(default)]
    plugins: Vec<ScriptDef>,
}

/// Load every script plugin declared in `path`.
pub fn load_script_plugins(path: &Path) -> anyhow::Result<Vec<ScriptPlugin>> {
    let content = std::fs::read_to_string(path).with_context(|| format!("failed to read {:?}", path))?;
    let file: ScriptFile =
        serde_yaml::from_str(&content).with_context(|| format!("failed to parse YAML {:?}", path))?;
    Ok(file.plugins.into_iter().map(ScriptPlugin::new).collect())
}

pub struct ScriptPlugin {
    def: ScriptDef,
}

impl ScriptPlugin {
    pub fn new(def: ScriptDef) -> Self {
        Self { def }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.def.timeout.unwrap_or(DEFAULT_TIMEOUT_SECS))
    }
}

#[async_trait]
impl Plugin for ScriptPlugin {
    fn manifest(&self) -> PluginManifest {
        self.def.manifest.clone()
    }

    fn needs_connection(&self) -> bool {
        false
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PluginError> {
        let command = ctx
            .plugin_data()
            .and_then(|data| data.get("full_command"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| self.def.command.clone());
        if command.trim().is_empty() {
            return Err(ctx.error("No command provided."));
        }
        ctx.info(&format!("Executing script with command '{}'", command));

        std::fs::create_dir_all(&ctx.log_dir)?;
        let (output, status) = match run_shell(&command, &ctx.log_dir, self.timeout()).await {
            Ok(done) => done,
            Err(e) => return Err(ctx.error(&format!("Error executing {}: {}", command, e))),
        };

        let mut log = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(ctx.log_dir.join("script.log"))?;
        let name = self.def.manifest.name.as_deref().unwrap_or_default();
        writeln!(log, "Plugin: {}#{}", name, ctx.plugin_number())?;
        writeln!(log, "Command: {}", command)?;
        writeln!(log, "Output:\n{}", output)?;

        if !status.success() {
            return Err(ctx.error(&format!(
                "Error executing {}: exit code {:?}",
                command,
                status.code()
            )));
        }
        ctx.info("Execution completed.");
        Ok(())
    }
}

/// Run `cmd` through the host shell, returning stdout followed by stderr.
/// The child is killed when the timeout expires.
async fn run_shell(cmd: &str, cwd: &Path, timeout: Duration) -> std::io::Result<(String, ExitStatus)> {
    let mut c = if cfg!(windows) {
        let mut c = Command::new("powershell.exe");
        c.arg("-NoLogo").arg("-NoProfile").arg("-Command").arg(cmd);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd);
        c
    };
    let child = c
        .current_dir(cwd)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()?;

    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(output) => {
            let output = output?;
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            Ok((text, output.status))
        }
        Err(_) => Err(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("timed out after {}s", timeout.as_secs()),
        )),
    }
}
