//! Plugin dispatch: selecting the plugins of a job and running them in turn.

pub mod named;
pub mod phase;

pub use named::NamedDispatcher;
pub use phase::PhaseDispatcher;

use crate::catalog::CatalogEntry;
use crate::context::JobContext;
use crate::error::{DispatchError, PluginError};
use crate::filter::FilterCriteria;
use crate::plugins::Registry;
use serde::Serialize;

/// Outcome of a successful job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    /// Plugin names in execution order.
    pub executed: Vec<String>,
}

/// Run a job with the dispatcher its context calls for: the named one when
/// an execution order is set, the phase one otherwise.
pub async fn run_job(registry: &dyn Registry, ctx: &mut JobContext) -> Result<DispatchReport, DispatchError> {
    if ctx.execution_order.is_some() {
        NamedDispatcher::new(registry).dispatch(ctx).await
    } else {
        PhaseDispatcher::new(registry).dispatch(ctx).await
    }
}

/// Platform and OS criteria every pass shares.
fn base_criteria(ctx: &JobContext) -> FilterCriteria {
    FilterCriteria::new()
        .platform(ctx.platform.clone())
        .os(ctx.os.clone())
}

/// Run `entries` in order, stopping at the first failure.
async fn run_entries(entries: Vec<&CatalogEntry>, ctx: &mut JobContext) -> Result<(), DispatchError> {
    for entry in entries {
        invoke(entry, ctx).await?;
    }
    Ok(())
}

async fn invoke(entry: &CatalogEntry, ctx: &mut JobContext) -> Result<(), DispatchError> {
    let name = entry.descriptor.name.as_str();
    ctx.set_current_plugin(None);
    ctx.info(&format!("Dispatching: '{}#{}'", name, ctx.plugin_number()));
    ctx.post_status(name);
    ctx.set_current_plugin(Some(name));

    let result = match ctx.reconcile_connection(entry.plugin.needs_connection()).await {
        Ok(()) => entry.plugin.run(ctx).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(()) => {
            ctx.complete_plugin(name);
            ctx.set_current_plugin(None);
            Ok(())
        }
        Err(source) => {
            // Fatal errors were logged by the plugin through `JobContext::error`.
            if !matches!(source, PluginError::Fatal(_)) {
                ctx.log_error(&source.to_string());
            }
            ctx.set_current_plugin(None);
            Err(DispatchError::Plugin {
                plugin: name.to_string(),
                source,
            })
        }
    }
}

/// Record the outcome and turn it into a report.
async fn conclude(ctx: &mut JobContext, result: Result<(), DispatchError>) -> Result<DispatchReport, DispatchError> {
    ctx.finalize(result.is_ok()).await;
    result.map(|()| DispatchReport {
        executed: ctx.executed().to_vec(),
    })
}
