use crate::context::JobContext;
use crate::filter::{matches, FilterCriteria};
use crate::plugins::{Plugin, PluginDescriptor, Registry};
use std::collections::HashMap;
use std::sync::Arc;

/// A validated plugin retained by a catalog build.
#[derive(Clone)]
pub struct CatalogEntry {
    pub id: String,
    pub descriptor: PluginDescriptor,
    pub plugin: Arc<dyn Plugin>,
}

/// Plugins eligible for a job, keyed by name.
#[derive(Default)]
pub struct Catalog {
    entries: Vec<CatalogEntry>,
    by_name: HashMap<String, usize>,
    names_by_id: HashMap<String, String>,
}

impl Catalog {
    /// Scan `registry` once, keeping the plugins with a complete descriptor
    /// that satisfy `criteria`. Malformed and duplicate plugins are reported
    /// through `ctx` and left out.
    pub fn build(registry: &dyn Registry, criteria: &FilterCriteria, ctx: &JobContext) -> Self {
        let mut catalog = Self::default();
        for entry in registry.entries() {
            let descriptor = match PluginDescriptor::try_from(entry.plugin.manifest()) {
                Ok(d) => d,
                Err(missing) => {
                    ctx.warning(&format!("Attribute '{}' missing in plugin: {}", missing.0, entry.id));
                    continue;
                }
            };
            if !matches(&descriptor, criteria) {
                continue;
            }
            if catalog.by_name.contains_key(&descriptor.name) {
                ctx.warning(&format!(
                    "Duplicate plugin name '{}' in: {}; keeping the first one",
                    descriptor.name, entry.id
                ));
                continue;
            }
            catalog.by_name.insert(descriptor.name.clone(), catalog.entries.len());
            catalog.names_by_id.insert(entry.id.clone(), descriptor.name.clone());
            catalog.entries.push(CatalogEntry {
                id: entry.id,
                descriptor,
                plugin: entry.plugin,
            });
        }
        catalog
    }

    /// Entries that also satisfy `criteria`, in enumeration order.
    pub fn select(&self, criteria: &FilterCriteria) -> Vec<&CatalogEntry> {
        self.entries
            .iter()
            .filter(|e| matches(&e.descriptor, criteria))
            .collect()
    }

    pub fn get(&self, name: &str) -> Option<&CatalogEntry> {
        self.by_name.get(name).map(|&i| &self.entries[i])
    }

    pub fn name_for_id(&self, id: &str) -> Option<&str> {
        self.names_by_id.get(id).map(String::as_str)
    }

    /// Entries in registry enumeration order.
    pub fn iter(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
