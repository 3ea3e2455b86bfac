use crate::bridge::{LocalBridge, SystemOpener};
use crate::manager::Manager;
use crate::model::{PollSettings, ProbeSettings};
use crate::notify::{Level, Notification};
use crate::render;
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;

/// Output line routing for stdout/stderr writer.
pub(crate) enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
pub(crate) fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "singbox-manager",
    version,
    about = "Manage sing-box profiles, the sing-box process and its proxy groups"
)]
pub struct Cli {
    /// Data directory holding configs.json and app_config.json
    #[arg(long, global = true)]
    pub config_root: Option<PathBuf>,

    /// How often the console reconciles the process status
    #[arg(long, default_value = "5s", global = true)]
    pub status_interval: humantime::Duration,

    /// How often the console refreshes proxy groups while sing-box runs
    #[arg(long, default_value = "5s", global = true)]
    pub topology_interval: humantime::Duration,

    /// URL the control API probes when measuring group latency
    #[arg(long, default_value = "https://www.gstatic.com/generate_204", global = true)]
    pub probe_url: String,

    /// Per-node timeout for latency probes
    #[arg(long, default_value = "5s", global = true)]
    pub probe_timeout: humantime::Duration,

    /// Timeout for other control API requests
    #[arg(long, default_value = "10s", global = true)]
    pub http_timeout: humantime::Duration,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Interactive session that owns the sing-box process (default)
    Console,
    /// List profiles; the active one is marked with *
    List,
    /// Import a profile from a file, or from stdin when --file is omitted
    Add {
        #[arg(long)]
        name: String,
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Make a profile active; `-` or no id clears the active profile
    Activate { id: Option<String> },
    /// Delete a profile
    Remove { id: String },
    /// Open a profile in the system editor
    Edit { id: String },
    /// Show selectable proxy groups of the running sing-box
    Groups,
    /// Switch a proxy group to another node
    Select { group: String, node: String },
    /// Measure latency of every node in a group
    Delay { group: String },
    /// Show the sing-box version
    Version,
    /// Show or change app settings
    Settings {
        #[arg(long)]
        singbox_path: Option<String>,
        #[arg(long)]
        config_dir: Option<String>,
    },
}

impl Cli {
    pub fn poll_settings(&self) -> PollSettings {
        PollSettings {
            status_interval: Duration::from(self.status_interval),
            topology_interval: Duration::from(self.topology_interval),
        }
    }

    pub fn probe_settings(&self) -> ProbeSettings {
        ProbeSettings {
            url: self.probe_url.clone(),
            timeout: Duration::from(self.probe_timeout),
        }
    }

    /// Default `env_logger` filter for the given verbosity.
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "singbox_manager=warn",
            1 => "singbox_manager=info",
            _ => "singbox_manager=debug",
        }
    }
}

pub async fn run(args: Cli) -> Result<()> {
    let root = args
        .config_root
        .clone()
        .unwrap_or_else(LocalBridge::default_root);
    let bridge = Arc::new(
        LocalBridge::open(root.clone())
            .with_context(|| format!("failed to open data directory {}", root.display()))?,
    );
    // The control API is local; never route it through a system proxy.
    let http = reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from(args.http_timeout))
        .user_agent(format!("singbox-manager/{}", env!("CARGO_PKG_VERSION")))
        .build()
        .context("failed to build HTTP client")?;

    let (note_tx, note_rx) = mpsc::unbounded_channel::<Notification>();
    let manager = Arc::new(Manager::new(
        bridge.clone(),
        bridge,
        Arc::new(SystemOpener),
        http,
        args.probe_settings(),
        Arc::new(note_tx),
    ));

    match args.command.clone().unwrap_or(Commands::Console) {
        Commands::Console => crate::console::run(manager, args.poll_settings(), note_rx).await,
        cmd => run_once(&manager, cmd, note_rx).await,
    }
}

/// One-shot command. Data goes to stdout, success notices to stderr, failures become the exit error.
async fn run_once(
    manager: &Manager,
    cmd: Commands,
    mut notes: mpsc::UnboundedReceiver<Notification>,
) -> Result<()> {
    let (out_tx, out_handle) = spawn_output_writer();
    let outcome = execute_once(manager, cmd, &out_tx).await;

    while let Ok(note) = notes.try_recv() {
        if note.level == Level::Success {
            let _ = out_tx.send(OutputLine::Stderr(note.to_message()));
        }
    }
    drop(out_tx);
    let _ = out_handle.await;
    outcome
}

async fn execute_once(
    manager: &Manager,
    cmd: Commands,
    out: &mpsc::UnboundedSender<OutputLine>,
) -> Result<()> {
    let print = |lines: Vec<String>| {
        for line in lines {
            let _ = out.send(OutputLine::Stdout(line));
        }
    };

    match cmd {
        Commands::Console => anyhow::bail!("the console cannot run as a one-shot command"),
        Commands::List => {
            let (profiles, active) = manager.profiles().await?;
            print(render::profile_lines(&profiles, active.as_deref()));
        }
        Commands::Add { name, file } => {
            let content = match file {
                Some(path) => tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("failed to read {}", path.display()))?,
                None => {
                    let mut buf = String::new();
                    tokio::io::stdin()
                        .read_to_string(&mut buf)
                        .await
                        .context("failed to read profile from stdin")?;
                    buf
                }
            };
            let profile = manager.add(&name, &content).await?;
            print(vec![profile.id]);
        }
        Commands::Activate { id } => {
            let id = id.filter(|id| id != "-");
            manager.activate(id.as_deref()).await?;
        }
        Commands::Remove { id } => manager.remove(&id).await?,
        Commands::Edit { id } => manager.edit(&id).await?,
        Commands::Groups => print(render::group_lines(&manager.groups().await)),
        Commands::Select { group, node } => manager.select(&group, &node).await?,
        Commands::Delay { group } => {
            print(render::delay_lines(&group, &manager.delay(&group).await))
        }
        Commands::Version => {
            let version = manager.version().await?;
            print(vec![format!("sing-box {version}")]);
        }
        Commands::Settings {
            singbox_path,
            config_dir,
        } => {
            let app = if singbox_path.is_some() || config_dir.is_some() {
                manager
                    .update_settings(singbox_path.as_deref(), config_dir.as_deref())
                    .await?
            } else {
                manager.settings().await?
            };
            print(render::settings_lines(&app));
        }
    }
    Ok(())
}
