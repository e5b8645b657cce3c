use crate::plugins::PluginDescriptor;
use std::collections::BTreeSet;

/// Eligibility constraints for a dispatch pass. `None` fields impose nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterCriteria {
    pub platform: Option<String>,
    pub phases: Option<BTreeSet<String>>,
    pub os: Option<String>,
    pub names: Option<BTreeSet<String>>,
}

impl FilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn platform(mut self, platform: Option<impl Into<String>>) -> Self {
        self.platform = platform.map(Into::into);
        self
    }

    pub fn os(mut self, os: Option<impl Into<String>>) -> Self {
        self.os = os.map(Into::into);
        self
    }

    pub fn phase(mut self, phase: impl Into<String>) -> Self {
        self.phases = Some(BTreeSet::from([phase.into()]));
        self
    }

    /// Require every one of `phases`; an empty iterator leaves phase unconstrained.
    pub fn all_phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = phases.into_iter().map(Into::into).collect();
        self.phases = (!set.is_empty()).then_some(set);
        self
    }

    /// Restrict to `names`; an empty iterator leaves names unconstrained.
    pub fn names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let set: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        self.names = (!set.is_empty()).then_some(set);
        self
    }
}

/// Whether `d` is eligible under `c`.
///
/// Empty platform/os sets on the descriptor match anything; an empty phase
/// set matches no phase. Several requested phases must all be declared.
pub fn matches(d: &PluginDescriptor, c: &FilterCriteria) -> bool {
    if let Some(platform) = &c.platform {
        if !d.platforms.is_empty() && !d.platforms.contains(platform) {
            return false;
        }
    }
    if let Some(phases) = &c.phases {
        if !phases.iter().all(|p| d.phases.contains(p)) {
            return false;
        }
    }
    if let Some(names) = &c.names {
        if !names.contains(&d.name) {
            return false;
        }
    }
    if let Some(os) = &c.os {
        if !d.os.is_empty() && !d.os.contains(os) {
            return false;
        }
    }
    true
}
