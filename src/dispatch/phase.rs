use super::{base_criteria, conclude, run_entries, DispatchReport};
use crate::catalog::Catalog;
use crate::context::JobContext;
use crate::error::DispatchError;
use crate::filter::FilterCriteria;
use crate::phase::auto_pre_phase;
use crate::plugins::Registry;

/// Runs every plugin eligible for the job's phase, in catalog order.
///
/// `Add`, `Activate` and `Deactivate` first get a best-effort `Pre-<phase>`
/// pass. The requested phase itself must match at least one plugin. The
/// registry is scanned once per job; each pass selects its phase from that
/// catalog.
pub struct PhaseDispatcher<'a> {
    registry: &'a dyn Registry,
}

impl<'a> PhaseDispatcher<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self { registry }
    }

    pub async fn dispatch(&self, ctx: &mut JobContext) -> Result<DispatchReport, DispatchError> {
        let result = self.run_passes(ctx).await;
        conclude(ctx, result).await
    }

    async fn run_passes(&self, ctx: &mut JobContext) -> Result<(), DispatchError> {
        let Some(phase) = ctx.phase.clone() else {
            ctx.log_error("No phase given for the job");
            return Err(DispatchError::MissingPhase);
        };

        let criteria = base_criteria(ctx).names(ctx.name_filter.iter().cloned());
        let catalog = Catalog::build(self.registry, &criteria, ctx);

        if let Some(pre) = auto_pre_phase(&phase) {
            let entries = catalog.select(&FilterCriteria::new().phase(pre.as_str()));
            if entries.is_empty() {
                ctx.info(&format!("No plugins found for phase {}; skipping", pre));
            } else {
                run_entries(entries, ctx).await?;
            }
        }

        let entries = catalog.select(&FilterCriteria::new().phase(phase.as_str()));
        if entries.is_empty() {
            let message = format!("No plugins found for phase {}", phase);
            ctx.post_status(&message);
            ctx.log_error(&message);
            return Err(DispatchError::NoMatch { phase });
        }
        run_entries(entries, ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::Fixture;
    use crate::error::PluginError;

    #[tokio::test]
    async fn pre_pass_runs_before_the_requested_phase() {
        let f = Fixture::new()
            .plugin("Activator", &["Activate"])
            .plugin("Backup", &["Pre-Activate"]);
        let mut ctx = f.context();
        ctx.phase = Some("Activate".into());

        let report = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();

        assert_eq!(report.executed, ["Backup", "Activator"]);
        assert_eq!(f.trace(), ["Backup#1", "Activator#2"]);
        assert!(ctx.succeeded());
    }

    #[tokio::test]
    async fn empty_pre_pass_is_not_an_error() {
        let f = Fixture::new().plugin("Activator", &["Activate"]);
        let mut ctx = f.context();
        ctx.phase = Some("Activate".into());

        let report = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();
        assert_eq!(report.executed, ["Activator"]);
        assert!(f.sink.job_info().is_empty());
    }

    #[tokio::test]
    async fn no_match_fails_without_pre_pass() {
        let f = Fixture::new()
            .plugin("Checker", &["Pre-Check"])
            .plugin("Oddball", &["Pre-Commit"]);
        let mut ctx = f.context();
        ctx.phase = Some("Commit".into());

        let err = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();

        assert!(matches!(err, DispatchError::NoMatch { ref phase } if phase == "Commit"));
        assert!(f.trace().is_empty());
        assert_eq!(f.sink.statuses(), vec!["No plugins found for phase Commit"]);
        assert!(ctx.is_finalized());
        assert!(!ctx.succeeded());
    }

    #[tokio::test]
    async fn first_failure_stops_the_pass() {
        let f = Fixture::new()
            .plugin("One", &["Post-Check"])
            .failing("Two", &["Post-Check"])
            .plugin("Three", &["Post-Check"]);
        let mut ctx = f.context();
        ctx.phase = Some("Post-Check".into());

        let err = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();

        match err {
            DispatchError::Plugin { plugin, source } => {
                assert_eq!(plugin, "Two");
                assert!(matches!(source, PluginError::Fatal(ref m) if m == "boom"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(f.trace(), ["One#1", "Two#2"]);
        assert_eq!(ctx.executed(), ["One"]);
        assert_eq!(f.sink.job_info(), vec!["ERROR: [Two] boom"]);
        assert!(ctx.is_finalized());
    }

    #[tokio::test]
    async fn name_filter_narrows_the_pass() {
        let f = Fixture::new()
            .plugin("A", &["Pre-Check"])
            .plugin("B", &["Pre-Check"]);
        let mut ctx = f.context();
        ctx.phase = Some("Pre-Check".into());
        ctx.name_filter = vec!["B".into()];

        let report = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();
        assert_eq!(report.executed, ["B"]);
    }

    #[tokio::test]
    async fn load_warnings_are_reported_once_per_job() {
        let f = Fixture::new()
            .plugin("Backup", &["Pre-Activate"])
            .malformed("Broken", &["Activate"])
            .plugin("Activator", &["Activate"])
            .plugin("Backup", &["Activate"]);
        let mut ctx = f.context();
        ctx.phase = Some("Activate".into());

        let report = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();

        assert_eq!(report.executed, ["Backup", "Activator"]);
        assert_eq!(
            f.sink.job_info(),
            vec![
                "WARNING: Attribute 'os' missing in plugin: test.Broken",
                "WARNING: Duplicate plugin name 'Backup' in: test.Backup; keeping the first one",
            ]
        );
    }

    #[tokio::test]
    async fn missing_phase_is_rejected() {
        let f = Fixture::new().plugin("A", &["Pre-Check"]);
        let mut ctx = f.context();
        let err = PhaseDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::MissingPhase));
        assert!(ctx.is_finalized());
    }
}
