//! Plugins shipped with the tool.

use super::{Plugin, PluginManifest};
use crate::context::JobContext;
use crate::convergence::{wait_for_convergence, NodeState, PlatformInventory, StatusProbe};
use crate::error::PluginError;
use crate::fsm::{report_error, send_newline, Fsm, FsmContext, Transition, FSM_END};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;

const SHOW_TIMEOUT: Duration = Duration::from_secs(120);
const NODE_INVENTORY_KEY: &str = "node_inventory";
const CONFIG_BACKUP_KEY: &str = "config_backup";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).expect("valid pattern")
}

/// Checks that every node of the chassis is up and remembers the inventory
/// so a later check can spot nodes that went missing.
pub struct NodeStatusCheck;

#[async_trait]
impl Plugin for NodeStatusCheck {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("Node Status Check")
            .phases(["Pre-Check", "Post-Check"])
            .os(["XE"])
            .description("Verify that all nodes are in a valid state")
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PluginError> {
        let output = ctx.session()?.command("show platform", SHOW_TIMEOUT).await?;
        ctx.save_to_file(&format!("{}-show platform", ctx.hostname), &output)?;

        let inventory = PlatformInventory.parse(&output);
        if inventory.is_empty() {
            return Err(ctx.error("Failed to parse the output of 'show platform'"));
        }

        if ctx.phase.as_deref() == Some("Post-Check") {
            let previous = ctx.load_data::<BTreeMap<String, NodeState>>(NODE_INVENTORY_KEY)?;
            if let Some((before, at)) = previous {
                for slot in before.keys().filter(|slot| !inventory.contains_key(*slot)) {
                    ctx.warning(&format!(
                        "Node {} seen at {} is missing",
                        slot,
                        at.format("%Y-%m-%d %H:%M:%S")
                    ));
                }
            }
        }

        let down: Vec<String> = inventory
            .iter()
            .filter(|(_, node)| !PlatformInventory.is_acceptable(node))
            .map(|(slot, node)| format!("{} ({})", slot, node.state))
            .collect();
        ctx.save_data(NODE_INVENTORY_KEY, &inventory)?;

        if !down.is_empty() {
            return Err(ctx.error(&format!("Node(s) not in desired state: {}", down.join(", "))));
        }
        ctx.info("All nodes in desired state");
        Ok(())
    }
}

/// Saves the running configuration to the log directory before activation.
pub struct ConfigBackup;

#[async_trait]
impl Plugin for ConfigBackup {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("Config Backup")
            .phases(["Pre-Activate", "Pre-Migrate"])
            .os(["XE"])
            .description("Save the running configuration")
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PluginError> {
        let output = ctx.session()?.command("show running-config", SHOW_TIMEOUT).await?;
        if output.trim().is_empty() {
            return Err(ctx.error("Empty output of 'show running-config'"));
        }
        let path = ctx.save_to_file(&format!("{}-show running-config", ctx.hostname), &output)?;
        ctx.save_value(CONFIG_BACKUP_KEY, Value::String(path.display().to_string()));
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ActivateMode {
    #[default]
    Reload,
    Issu,
}

#[derive(Debug, Default, Deserialize)]
struct ActivateData {
    #[serde(default)]
    mode: ActivateMode,
    package: Option<String>,
}

/// Time given to the standby and active RPs to finish an ISSU before the
/// convergence wait starts.
const ISSU_SETTLE: Duration = Duration::from_secs(300);

/// Activates new software: saves the configuration, then either reloads the
/// device or runs an in-service upgrade, and waits for every node to
/// come back.
///
/// Plugin data: `{"mode": "reload" | "issu", "package": "<file>"}`. ISSU
/// falls back to the first job package when none is given.
pub struct InstallActivate;

#[async_trait]
impl Plugin for InstallActivate {
    fn manifest(&self) -> PluginManifest {
        PluginManifest::new("Install Activate")
            .phases(["Activate"])
            .platforms(["ASR900"])
            .os(["XE"])
            .description("Activate software packages")
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PluginError> {
        let data: ActivateData = match ctx.plugin_data() {
            Some(value) => serde_json::from_value(value.clone())?,
            None => ActivateData::default(),
        };
        let status = ctx.status();

        let prompt = ctx.session()?.prompt().clone();
        write_memory_fsm(&prompt)
            .run(ctx.session()?, "write memory", status.as_ref())
            .await?;

        match data.mode {
            ActivateMode::Reload => {
                let message = "Waiting the reload operation to continue";
                ctx.info(message);
                ctx.post_status(message);
                reload_fsm().run(ctx.session()?, "reload", status.as_ref()).await?;
            }
            ActivateMode::Issu => {
                let package = data
                    .package
                    .or_else(|| ctx.packages.first().cloned())
                    .ok_or_else(|| ctx.error("No package given for ISSU"))?;
                let cmd = format!(
                    "request platform software package install node file bootflash:{}",
                    package
                );
                ctx.post_status("Running ISSU");
                issu_fsm().run(ctx.session()?, &cmd, status.as_ref()).await?;
                sleep(ISSU_SETTLE).await;
            }
        }

        let check = ctx.reload.clone();
        let waited = wait_for_convergence(ctx.session()?, &check, &PlatformInventory, status.as_ref()).await;
        if let Err(e) = waited {
            ctx.warning("Reload or boot failure");
            return Err(e.into());
        }
        ctx.info("Operation reload finished successfully");
        Ok(())
    }
}

/// ```text
/// PAN-5201-ASR903#write memory
/// Warning: Attempting to overwrite an NVRAM configuration previously written
/// by a different version of the system image.
/// Overwrite the previous NVRAM configuration?[confirm]
/// Building configuration...
/// [OK]
/// PAN-5201-ASR903#
/// ```
fn write_memory_fsm(prompt: &Regex) -> Fsm {
    let overwrite = re(r"Overwrite the previous NVRAM configuration\?\[confirm\]");
    let built = re(r"\[OK\]");
    let t = Duration::from_secs(1200);
    Fsm::new(
        "write memory",
        vec![overwrite.clone(), built.clone(), prompt.clone()],
        vec![
            Transition::new(&overwrite, &[0], 1).action(send_newline).timeout(t),
            Transition::new(&built, &[0, 1], 2).timeout(t),
            Transition::new(prompt, &[2], FSM_END),
        ],
    )
    .timeout(t)
}

fn reload_fsm() -> Fsm {
    let save = re(r"System configuration has been modified\. Save\? \[yes/no\]:");
    let proceed = re(r"Proceed with reload\? \[confirm\]");
    Fsm::new(
        "reload",
        vec![save.clone(), proceed.clone()],
        vec![
            Transition::new(&save, &[0], 1).action(|cx: &mut FsmContext<'_>| {
                cx.send_line("no");
                true
            }),
            Transition::new(&proceed, &[0, 1], FSM_END).action(send_newline),
        ],
    )
    .timeout(Duration::from_secs(1200))
}

/// In-service upgrade. Each stage gets its own long wait; any error
/// message is fatal from every non-terminal state.
fn issu_fsm() -> Fsm {
    let disk_check = re("Starting disk space verification");
    let stage_one = re("STAGE 1: Installing software on standby RP");
    let stage_two = re("STAGE 2: Restarting standby RP");
    let stage_three = re("STAGE 3: Installing sipspa package on local RP");
    let stage_four = re("STAGE 4: Installing software on active RP");
    let provisioned = re(r"SUCCESS: Software provisioned\.\s+New software will load on reboot");
    let not_booted = re("SYSTEM IS NOT BOOTED VIA PACKAGE FILE");
    let failed = re("FAILED:.*");
    let closed = re("Connection closed by foreign host");

    let stage = Duration::from_secs(1800);
    let any = [0, 1, 2, 3, 4, 5];
    Fsm::new(
        "ISSU",
        vec![
            disk_check.clone(),
            stage_one.clone(),
            stage_two.clone(),
            stage_three.clone(),
            stage_four.clone(),
            provisioned.clone(),
            not_booted.clone(),
            failed.clone(),
            closed.clone(),
        ],
        vec![
            Transition::new(&disk_check, &[0], 1).timeout(stage),
            Transition::new(&stage_one, &[0, 1], 2).timeout(stage),
            Transition::new(&stage_two, &[2], 3).timeout(stage),
            Transition::new(&stage_three, &[3], 4).timeout(stage),
            Transition::new(&stage_four, &[4], 5).timeout(stage),
            Transition::new(&provisioned, &[5], FSM_END),
            Transition::new(&not_booted, &any, FSM_END).action(|cx: &mut FsmContext<'_>| {
                cx.warning("Error in ISSU. Please see session.log for details");
                false
            }),
            Transition::new(&failed, &any, FSM_END).action(report_error),
            // the active RP reloads under us during stage four
            Transition::new(&closed, &[1, 2, 3, 4], FSM_END).action(|cx: &mut FsmContext<'_>| {
                cx.warning("Unexpected connection closed by foreign host during ISSU");
                true
            }),
        ],
    )
    .timeout(Duration::from_secs(4200))
}
