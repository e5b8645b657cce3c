/// Every install phase a plugin may declare.
pub const INSTALL_PHASES: &[&str] = &[
    "Pre-Check",
    "Pre-Add",
    "Add",
    "Pre-Activate",
    "Activate",
    "Pre-Deactivate",
    "Deactivate",
    "Pre-Remove",
    "Remove",
    "Remove All Inactive",
    "Commit",
    "Get-Inventory",
    "Migration-Audit",
    "Pre-Migrate",
    "Migrate",
    "Post-Migrate",
    "Post-Check",
    "FPD-Upgrade",
];

/// State-changing phases that get an implicit `Pre-<phase>` pass.
pub const AUTO_PRE_PHASES: &[&str] = &["Add", "Activate", "Deactivate"];

pub fn is_known_phase(phase: &str) -> bool {
    INSTALL_PHASES.contains(&phase)
}

/// The `Pre-<phase>` companion of `phase`, if it gets one.
pub fn auto_pre_phase(phase: &str) -> Option<String> {
    AUTO_PRE_PHASES
        .contains(&phase)
        .then(|| format!("Pre-{}", phase))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pre_phase_only_for_state_changing_phases() {
        assert_eq!(auto_pre_phase("Activate").as_deref(), Some("Pre-Activate"));
        assert_eq!(auto_pre_phase("Add").as_deref(), Some("Pre-Add"));
        assert_eq!(auto_pre_phase("Deactivate").as_deref(), Some("Pre-Deactivate"));
        assert_eq!(auto_pre_phase("Commit"), None);
        assert_eq!(auto_pre_phase("Pre-Activate"), None);
    }

    #[test]
    fn generated_pre_phases_are_known() {
        for phase in AUTO_PRE_PHASES {
            let pre = auto_pre_phase(phase).unwrap();
            assert!(is_known_phase(&pre), "{} missing from INSTALL_PHASES", pre);
        }
        assert!(!is_known_phase("activate"));
    }
}
