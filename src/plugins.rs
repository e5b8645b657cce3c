pub mod builtin;
pub mod script;

use crate::context::JobContext;
use crate::error::PluginError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

/// Plugin attributes as declared by the implementation or a manifest file.
///
/// Every attribute is optional here so an incomplete declaration can be
/// reported instead of rejected at parse time; [`PluginDescriptor`] is the
/// validated form.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct PluginManifest {
    pub name: Option<String>,
    pub platforms: Option<BTreeSet<String>>,
    pub phases: Option<BTreeSet<String>>,
    pub os: Option<BTreeSet<String>>,
    pub description: Option<String>,
}

impl PluginManifest {
    /// Manifest with `name` and empty platform/phase/os sets.
    ///
    /// Empty platforms and os mean "any"; empty phases mean the plugin is
    /// never dispatched, so built-ins must call [`Self::phases`].
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            platforms: Some(BTreeSet::new()),
            phases: Some(BTreeSet::new()),
            os: Some(BTreeSet::new()),
            description: None,
        }
    }

    pub fn platforms<I, S>(mut self, platforms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.platforms = Some(platforms.into_iter().map(Into::into).collect());
        self
    }

    pub fn phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases = Some(phases.into_iter().map(Into::into).collect());
        self
    }

    pub fn os<I, S>(mut self, os: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.os = Some(os.into_iter().map(Into::into).collect());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("attribute '{0}' missing")]
pub struct MissingAttribute(pub &'static str);

/// Validated, immutable plugin metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PluginDescriptor {
    pub name: String,
    pub platforms: BTreeSet<String>,
    pub phases: BTreeSet<String>,
    pub os: BTreeSet<String>,
    pub description: String,
}

impl TryFrom<PluginManifest> for PluginDescriptor {
    type Error = MissingAttribute;

    fn try_from(m: PluginManifest) -> Result<Self, Self::Error> {
        let name = m
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or(MissingAttribute("name"))?;
        Ok(Self {
            name,
            phases: m.phases.ok_or(MissingAttribute("phases"))?,
            platforms: m.platforms.ok_or(MissingAttribute("platforms"))?,
            os: m.os.ok_or(MissingAttribute("os"))?,
            description: m.description.unwrap_or_default(),
        })
    }
}

/// A maintenance action dispatched against the device.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn manifest(&self) -> PluginManifest;

    /// Whether the plugin talks to the device. The dispatcher connects or
    /// disconnects the session accordingly before `run`.
    fn needs_connection(&self) -> bool {
        true
    }

    async fn run(&self, ctx: &mut JobContext) -> Result<(), PluginError>;
}

/// One installed plugin as enumerated by a registry.
#[derive(Clone)]
pub struct RegistryEntry {
    /// Registry-internal extension identifier.
    pub id: String,
    pub plugin: Arc<dyn Plugin>,
}

/// Source of installed plugins. Enumerated once per catalog build.
pub trait Registry: Send + Sync {
    fn entries(&self) -> Vec<RegistryEntry>;
}

/// In-process registry holding built-in and manifest-declared plugins.
#[derive(Default, Clone)]
pub struct PluginRegistry {
    entries: Vec<RegistryEntry>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_builtins() -> Self {
        let mut r = Self::new();
        r.register("devpipe.builtin.node_status", Arc::new(builtin::NodeStatusCheck));
        r.register("devpipe.builtin.config_backup", Arc::new(builtin::ConfigBackup));
        r.register("devpipe.builtin.install_activate", Arc::new(builtin::InstallActivate));
        r
    }

    pub fn register(&mut self, id: impl Into<String>, plugin: Arc<dyn Plugin>) {
        self.entries.push(RegistryEntry {
            id: id.into(),
            plugin,
        });
    }

    /// Register every script plugin declared in a YAML manifest file.
    pub fn load_scripts(&mut self, path: &Path) -> anyhow::Result<usize> {
        let scripts = script::load_script_plugins(path)?;
        let count = scripts.len();
        for (idx, plugin) in scripts.into_iter().enumerate() {
            let id = format!("devpipe.script.{}#{}", path.display(), idx);
            self.register(id, Arc::new(plugin));
        }
        Ok(count)
    }
}

impl Registry for PluginRegistry {
    fn entries(&self) -> Vec<RegistryEntry> {
        self.entries.clone()
    }
}
