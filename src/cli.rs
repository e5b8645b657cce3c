use clap::{Args, Parser, Subcommand};
use devpipe::catalog::Catalog;
use devpipe::config::{JobConfig, MopStep};
use devpipe::phase::is_known_phase;
use serde_json::Value;
use std::collections::BTreeSet;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "devpipe")]
#[command(about = "Run maintenance plugins against a network device")]
pub struct Opts {
    /// YAML file declaring script plugins
    #[arg(long, global = true)]
    pub scripts: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List installed plugins
    List {
        #[arg(long)]
        platform: Option<String>,
        #[arg(long, value_parser = parse_phase)]
        phase: Option<String>,
        #[arg(long)]
        os: Option<String>,
        /// Names only
        #[arg(long, conflicts_with = "detail")]
        brief: bool,
        /// Description, platforms and os as well
        #[arg(long)]
        detail: bool,
    },
    /// Run a job against a device
    Run(RunArgs),
    /// Validate a job file
    Validate { path: PathBuf },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Device url (ssh:// or telnet://); repeat for jump hosts, device last
    #[arg(long = "url")]
    pub urls: Vec<String>,
    #[arg(long)]
    pub hostname: Option<String>,
    #[arg(long, value_parser = parse_phase)]
    pub phase: Option<String>,
    #[arg(long)]
    pub platform: Option<String>,
    #[arg(long)]
    pub os: Option<String>,
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
    /// Custom command for plugins that take one
    #[arg(long = "cmd")]
    pub commands: Vec<String>,
    #[arg(long = "package")]
    pub packages: Vec<String>,
    #[arg(long)]
    pub repository_url: Option<String>,
    /// YAML job file; flags override its values
    #[arg(long)]
    pub job: Option<PathBuf>,
    /// Run PLUGINS in the given order instead of by phase
    #[arg(long, requires = "plugins")]
    pub mop: bool,
    pub plugins: Vec<String>,
}

impl RunArgs {
    /// Overlay the flags that were given onto `job`.
    pub fn merge_into(self, job: &mut JobConfig) {
        if !self.urls.is_empty() {
            job.urls = self.urls;
        }
        if self.hostname.is_some() {
            job.hostname = self.hostname;
        }
        if self.phase.is_some() {
            job.phase = self.phase;
        }
        if self.platform.is_some() {
            job.platform = self.platform;
        }
        if self.os.is_some() {
            job.os = self.os;
        }
        if self.log_dir.is_some() {
            job.log_dir = self.log_dir;
        }
        if !self.commands.is_empty() {
            job.commands = self.commands;
        }
        if !self.packages.is_empty() {
            job.packages = self.packages;
        }
        if self.repository_url.is_some() {
            job.repository_url = self.repository_url;
        }
        if self.mop {
            job.mop = Some(
                self.plugins
                    .into_iter()
                    .map(|plugin| MopStep {
                        plugin,
                        data: Value::Null,
                    })
                    .collect(),
            );
        } else if !self.plugins.is_empty() {
            job.plugins = self.plugins;
        }
    }
}

fn parse_phase(s: &str) -> Result<String, String> {
    if is_known_phase(s) {
        Ok(s.to_string())
    } else {
        Err(format!("unknown phase '{}'", s))
    }
}

pub fn get_opts() -> Opts {
    Opts::parse()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListStyle {
    Brief,
    Normal,
    Detail,
}

pub fn render_list(catalog: &Catalog, style: ListStyle) -> String {
    let mut out = String::new();
    for entry in catalog.iter() {
        let d = &entry.descriptor;
        let join = |set: &BTreeSet<String>| {
            if set.is_empty() {
                "any".to_string()
            } else {
                set.iter().cloned().collect::<Vec<_>>().join(", ")
            }
        };
        let line = match style {
            ListStyle::Brief => d.name.clone(),
            ListStyle::Normal => format!("[{}] {}", join(&d.phases), d.name),
            ListStyle::Detail => format!(
                "Name: {}\nDescription: {}\nPhases: {}\nPlatforms: {}\nOS: {}\n",
                d.name,
                d.description,
                join(&d.phases),
                join(&d.platforms),
                join(&d.os)
            ),
        };
        out.push_str(&line);
        out.push('\n');
    }
    out
}
