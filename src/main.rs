mod cli;

use anyhow::Context;
use cli::{Command, ListStyle, RunArgs};
use devpipe::catalog::Catalog;
use devpipe::config::{self, JobConfig};
use devpipe::context::JobContext;
use devpipe::dispatch::run_job;
use devpipe::filter::FilterCriteria;
use devpipe::plugins::PluginRegistry;
use devpipe::status::{LogSink, MemorySink};
use devpipe::util::create_run_dir;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = cli::get_opts();
    match opts.command {
        Command::List {
            platform,
            phase,
            os,
            brief,
            detail,
        } => {
            init_logging(None)?;
            let registry = registry(opts.scripts.as_deref())?;
            let mut criteria = FilterCriteria::new().platform(platform).os(os);
            if let Some(phase) = phase {
                criteria = criteria.phase(phase);
            }
            let ctx = JobContext::new("", Arc::new(LogSink));
            let catalog = Catalog::build(&registry, &criteria, &ctx);
            let style = match (brief, detail) {
                (true, _) => ListStyle::Brief,
                (_, true) => ListStyle::Detail,
                _ => ListStyle::Normal,
            };
            print!("{}", cli::render_list(&catalog, style));
        }
        Command::Run(args) => {
            run(args, opts.scripts).await?;
        }
        Command::Validate { path } => {
            init_logging(None)?;
            let job = config::validate_job_file(&path).with_context(|| format!("invalid job {:?}", path))?;
            println!(
                "Job '{}' validated",
                job.hostname.as_deref().unwrap_or("<unnamed>")
            );
        }
    }

    Ok(())
}

async fn run(args: RunArgs, scripts: Option<PathBuf>) -> anyhow::Result<()> {
    let mut job = match &args.job {
        Some(path) => config::load_job(path)?,
        None => JobConfig::default(),
    };
    args.merge_into(&mut job);
    if scripts.is_some() {
        job.scripts = scripts;
    }
    config::validate_job(&job).context("invalid job")?;

    let log_dir = job.log_dir();
    std::fs::create_dir_all(&log_dir).with_context(|| format!("failed to create {:?}", log_dir))?;
    init_logging(Some(&log_dir.join("plugins.log")))?;

    let registry = registry(job.scripts.as_deref())?;
    let sink = Arc::new(MemorySink::new());
    let mut ctx = job.into_context(sink.clone())?;
    ctx.run_dir = Some(create_run_dir(&log_dir)?);

    info!("Starting job on '{}'", ctx.hostname);
    let report = run_job(&registry, &mut ctx).await.context("job failed")?;

    for name in &report.executed {
        println!("Executed: {}", name);
    }
    for line in sink.job_info() {
        println!("{}", line);
    }
    info!("Job finished");
    Ok(())
}

fn registry(scripts: Option<&Path>) -> anyhow::Result<PluginRegistry> {
    let mut registry = PluginRegistry::with_builtins();
    if let Some(path) = scripts {
        let count = registry.load_scripts(path)?;
        info!("Loaded {} script plugin(s) from {:?}", count, path);
    }
    Ok(registry)
}

fn init_logging(log_file: Option<&Path>) -> anyhow::Result<()> {
    let file_layer = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open {:?}", path))?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();
    Ok(())
}
