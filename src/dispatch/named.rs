use super::{base_criteria, conclude, invoke, DispatchReport};
use crate::catalog::{Catalog, CatalogEntry};
use crate::context::JobContext;
use crate::error::DispatchError;
use crate::plugins::Registry;

/// Runs the job's execution order exactly as given.
///
/// Every name must resolve before anything runs; a partial sequence is
/// never started.
pub struct NamedDispatcher<'a> {
    registry: &'a dyn Registry,
    phases: Option<Vec<String>>,
}

impl<'a> NamedDispatcher<'a> {
    pub fn new(registry: &'a dyn Registry) -> Self {
        Self {
            registry,
            phases: None,
        }
    }

    /// Accept only plugins declared for every one of `phases` instead of
    /// the job's single phase. An empty list leaves the phase unconstrained.
    pub fn phases<I, S>(mut self, phases: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.phases = Some(phases.into_iter().map(Into::into).collect());
        self
    }

    pub async fn dispatch(&self, ctx: &mut JobContext) -> Result<DispatchReport, DispatchError> {
        let result = self.run_order(ctx).await;
        conclude(ctx, result).await
    }

    async fn run_order(&self, ctx: &mut JobContext) -> Result<(), DispatchError> {
        let order = ctx.execution_order.clone().unwrap_or_default();
        let phases = match &self.phases {
            Some(phases) => phases.clone(),
            None => ctx.phase.iter().cloned().collect(),
        };
        let criteria = base_criteria(ctx)
            .all_phases(phases)
            .names(order.iter().cloned());
        let catalog = Catalog::build(self.registry, &criteria, ctx);

        let plan = resolve(&catalog, &order).map_err(|missing| {
            ctx.log_error(&format!(
                "Missing the following selected plugin(s): {}",
                missing.join(", ")
            ));
            DispatchError::Resolution { missing }
        })?;

        for entry in plan {
            invoke(entry, ctx).await?;
        }
        Ok(())
    }
}

/// Map every name of `order` to its catalog entry, or list the names that
/// have none, each once, in order of first appearance.
fn resolve<'c>(catalog: &'c Catalog, order: &[String]) -> Result<Vec<&'c CatalogEntry>, Vec<String>> {
    let mut plan = Vec::with_capacity(order.len());
    let mut missing: Vec<String> = Vec::new();
    for name in order {
        match catalog.get(name) {
            Some(entry) => plan.push(entry),
            None if !missing.contains(name) => missing.push(name.clone()),
            None => {}
        }
    }
    if missing.is_empty() {
        Ok(plan)
    } else {
        Err(missing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::testing::Fixture;

    fn order(names: &[&str]) -> Option<Vec<String>> {
        Some(names.iter().map(|s| s.to_string()).collect())
    }

    #[tokio::test]
    async fn runs_exactly_the_requested_order() {
        let f = Fixture::new()
            .plugin("A", &["Pre-Check"])
            .plugin("B", &["Pre-Check"])
            .plugin("C", &["Pre-Check"]);
        let mut ctx = f.context();
        ctx.execution_order = order(&["C", "A"]);

        let report = NamedDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();

        assert_eq!(report.executed, ["C", "A"]);
        assert_eq!(f.trace(), ["C#1", "A#2"]);
        assert!(ctx.succeeded());
    }

    #[tokio::test]
    async fn unresolved_names_fail_before_anything_runs() {
        let f = Fixture::new()
            .plugin("A", &["Pre-Check"])
            .plugin("B", &["Pre-Check"]);
        let mut ctx = f.context();
        ctx.execution_order = order(&["A", "X", "Y", "X"]);

        let err = NamedDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();

        match err {
            DispatchError::Resolution { missing } => assert_eq!(missing, ["X", "Y"]),
            other => panic!("unexpected {other:?}"),
        }
        assert!(f.trace().is_empty());
        assert_eq!(
            f.sink.job_info(),
            vec!["ERROR: Missing the following selected plugin(s): X, Y"]
        );
        assert!(ctx.is_finalized());
        assert!(!ctx.succeeded());
    }

    #[tokio::test]
    async fn phase_restriction_applies_before_resolution() {
        let f = Fixture::new()
            .plugin("Check", &["Pre-Check", "Post-Check"])
            .plugin("Activate", &["Activate"]);
        let mut ctx = f.context();
        ctx.phase = Some("Post-Check".into());
        ctx.execution_order = order(&["Check", "Activate"]);

        let err = NamedDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Resolution { ref missing } if missing == &["Activate"]));

        let mut ctx = f.context();
        ctx.execution_order = order(&["Check", "Activate"]);
        let err = NamedDispatcher::new(&f.registry)
            .phases(["Post-Check", "Activate"])
            .dispatch(&mut ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Resolution { ref missing } if missing == &["Check", "Activate"]));

        let mut ctx = f.context();
        ctx.execution_order = order(&["Check"]);
        let report = NamedDispatcher::new(&f.registry)
            .phases(["Pre-Check", "Post-Check"])
            .dispatch(&mut ctx)
            .await
            .unwrap();
        assert_eq!(report.executed, ["Check"]);
    }

    #[tokio::test]
    async fn repeated_names_run_once_per_occurrence() {
        let f = Fixture::new().plugin("Check", &["Post-Check"]);
        let mut ctx = f.context();
        ctx.execution_order = order(&["Check", "Check"]);

        let report = NamedDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap();

        assert_eq!(report.executed, ["Check", "Check"]);
        assert_eq!(f.trace(), ["Check#1", "Check#2"]);
    }

    #[tokio::test]
    async fn failure_stops_the_order() {
        let f = Fixture::new()
            .failing("A", &["Commit"])
            .plugin("B", &["Commit"]);
        let mut ctx = f.context();
        ctx.execution_order = order(&["A", "B"]);

        let err = NamedDispatcher::new(&f.registry).dispatch(&mut ctx).await.unwrap_err();
        assert!(matches!(err, DispatchError::Plugin { ref plugin, .. } if plugin == "A"));
        assert_eq!(f.trace(), ["A#1"]);
    }
}
