//! Waiting for a device to come back after a reload.

use crate::error::{ConvergenceError, SessionError};
use crate::session::Session;
use crate::status::StatusSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Timing and command of a convergence wait.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConvergenceCheck {
    /// Sleep between disconnecting and the forced reconnect.
    pub warmup: Duration,
    /// Sleep between reconnecting and the first poll interval.
    pub settle: Duration,
    pub poll_interval: Duration,
    pub max_attempts: u32,
    /// Upper bound on the accumulated poll intervals.
    pub overall_timeout: Duration,
    pub status_command: String,
    pub command_timeout: Duration,
}

impl Default for ConvergenceCheck {
    fn default() -> Self {
        Self {
            warmup: Duration::from_secs(25 * 60),
            settle: Duration::from_secs(30),
            poll_interval: Duration::from_secs(30),
            max_attempts: 20,
            overall_timeout: Duration::from_secs(3600),
            // can take over a minute right after a reload
            status_command: "show platform".to_string(),
            command_timeout: Duration::from_secs(600),
        }
    }
}

/// One node (card, route processor, power supply) as reported by the device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeState {
    pub kind: String,
    pub state: String,
}

/// Turns raw status output into per-node states and judges them.
pub trait StatusProbe: Send + Sync {
    fn parse(&self, raw: &str) -> BTreeMap<String, NodeState>;

    fn is_acceptable(&self, node: &NodeState) -> bool;

    /// Every node acceptable. An empty inventory never is.
    fn converged(&self, nodes: &BTreeMap<String, NodeState>) -> bool {
        !nodes.is_empty() && nodes.values().all(|n| self.is_acceptable(n))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceReport {
    /// Total outage, from disconnect to the first passing poll.
    pub elapsed: Duration,
    pub attempts: u32,
}

/// Disconnect, wait for the device to boot, reconnect with fresh discovery,
/// then poll until every node reports an acceptable state.
pub async fn wait_for_convergence(
    session: &mut dyn Session,
    check: &ConvergenceCheck,
    probe: &dyn StatusProbe,
    status: &dyn StatusSink,
) -> Result<ConvergenceReport, ConvergenceError> {
    let begin = Instant::now();
    session.disconnect().await?;

    status.post_status("Waiting for device boot to reconnect");
    info!("Waiting for device boot to reconnect");
    sleep(check.warmup).await;
    session.reconnect(true).await?;
    info!("Device connected successfully");

    status.post_status("Waiting for all nodes to come up");
    info!("Waiting for all nodes to come up");
    sleep(check.settle).await;

    let mut attempts = 0;
    let mut waited = Duration::ZERO;
    let mut last_output = None;
    while attempts < check.max_attempts {
        waited += check.poll_interval;
        if waited >= check.overall_timeout {
            break;
        }
        attempts += 1;
        sleep(check.poll_interval).await;

        let output = match session.command(&check.status_command, check.command_timeout).await {
            Ok(output) => output,
            Err(SessionError::Timeout { tail, .. }) => {
                warn!("'{}' timed out (attempt {})", check.status_command, attempts);
                last_output = Some(tail);
                continue;
            }
            Err(e) => return Err(e.into()),
        };
        debug!("{} = {}", check.status_command, output);

        let nodes = probe.parse(&output);
        last_output = Some(output);
        if probe.converged(&nodes) {
            let elapsed = begin.elapsed();
            info!("All nodes in desired state");
            info!(
                "Overall outage time: {} minute(s) {} second(s)",
                elapsed.as_secs() / 60,
                elapsed.as_secs() % 60
            );
            return Ok(ConvergenceReport { elapsed, attempts });
        }
    }

    Err(ConvergenceError::NotConverged {
        attempts,
        last_output,
    })
}

/// Node states that count as up after a reload.
pub const ACCEPTED_NODE_STATES: &[&str] = &[
    "ok",
    "ok, active",
    "ok, standby",
    "ps, fail",
    "out of service",
    "N/A",
];

/// Probe for the `show platform` slot table.
///
/// ```text
/// Slot      Type                State                 Insert time (ago)
/// --------- ------------------- --------------------- -----------------
///  0/0      A900-IMA8D          ok                    2w3d
///  R0       A900-RSP2A-128      ok, active            2w3d
/// ```
#[derive(Debug, Default, Clone, Copy)]
pub struct PlatformInventory;

impl StatusProbe for PlatformInventory {
    fn parse(&self, raw: &str) -> BTreeMap<String, NodeState> {
        let mut nodes = BTreeMap::new();
        let mut lines = raw.lines().skip_while(|l| {
            let l = l.trim_start();
            !(l.starts_with("Slot") && l.contains("State"))
        });
        if lines.next().is_none() {
            return nodes;
        }
        let Some(rule) = lines.next() else {
            return nodes;
        };
        let starts = column_starts(rule);
        if starts.len() < 3 {
            return nodes;
        }

        for line in lines {
            if line.trim().is_empty() {
                break;
            }
            let cols = split_columns(line, &starts);
            let slot = cols[0].clone();
            if slot.is_empty() {
                continue;
            }
            nodes.insert(
                slot,
                NodeState {
                    kind: cols[1].clone(),
                    state: cols[2].clone(),
                },
            );
        }
        nodes
    }

    fn is_acceptable(&self, node: &NodeState) -> bool {
        ACCEPTED_NODE_STATES.contains(&node.state.as_str())
    }
}

/// Byte offsets where each dash group of a table rule starts.
fn column_starts(rule: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut prev = ' ';
    for (i, c) in rule.char_indices() {
        if c == '-' && prev != '-' {
            starts.push(i);
        }
        prev = c;
    }
    starts
}

fn split_columns(line: &str, starts: &[usize]) -> Vec<String> {
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            // the first column may be indented left of its rule
            let from = if i == 0 { 0 } else { start };
            let to = starts.get(i + 1).copied().unwrap_or(line.len());
            line.get(from.min(line.len())..to.min(line.len()))
                .unwrap_or_default()
                .trim()
                .to_string()
        })
        .collect()
}
