#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use ev_config::{load, FilesystemManifestSource};
use ev_manager::Manager;
use tracing_subscriber::EnvFilter;

const DEFAULT_RUNTIME_DIR: &str = "/etc/everest";
const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_MODULE_SUB_DIR: &str = "modules";
const DEFAULT_LOGGING_CONFIG_FILE: &str = "logging.ini";
const DEFAULT_INTERFACE_SUB_DIR: &str = "interfaces";

#[derive(Parser, Debug)]
#[command(name = "ev-manager-cli", version, about = "EVerest manager")]
struct Args {
    /// EVerest runtime directory; every other path defaults relative to this.
    #[arg(long, default_value = DEFAULT_RUNTIME_DIR)]
    everest_dir: PathBuf,

    /// Main deployment config file (default: <everest-dir>/config.json).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Directory of module manifests (default: <everest-dir>/modules).
    #[arg(long)]
    modules_dir: Option<PathBuf>,

    /// Logging configuration file passed through to spawned modules
    /// (default: <everest-dir>/logging.ini).
    #[arg(long)]
    logging_config: Option<PathBuf>,

    /// Only parse and validate the config file, then exit.
    #[arg(long)]
    validate: bool,
}

impl Args {
    fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(|| self.everest_dir.join(DEFAULT_CONFIG_FILE))
    }

    fn modules_dir(&self) -> PathBuf {
        self.modules_dir.clone().unwrap_or_else(|| self.everest_dir.join(DEFAULT_MODULE_SUB_DIR))
    }

    fn interfaces_dir(&self) -> PathBuf {
        self.everest_dir.join(DEFAULT_INTERFACE_SUB_DIR)
    }

    fn logging_config_path(&self) -> PathBuf {
        self.logging_config.clone().unwrap_or_else(|| self.everest_dir.join(DEFAULT_LOGGING_CONFIG_FILE))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ev_manager=info,ev_config=info")))
        .init();

    if !args.everest_dir.is_dir() {
        bail!("everest runtime directory '{}' does not exist", args.everest_dir.display());
    }

    let deployment = load_deployment(&args)?;

    if args.validate {
        println!("Config file valid");
        return Ok(());
    }

    boot(&args, deployment)
}

fn load_deployment(args: &Args) -> Result<ev_config::DeploymentConfig> {
    let config_path = args.config_path();
    let config_text = std::fs::read_to_string(&config_path)
        .with_context(|| format!("reading deployment config '{}'", config_path.display()))?;
    let config_json: serde_json::Value =
        serde_json::from_str(&config_text).with_context(|| format!("parsing deployment config '{}'", config_path.display()))?;

    let modules_dir = args.modules_dir();
    if !modules_dir.is_dir() {
        bail!("modules directory '{}' does not exist", modules_dir.display());
    }

    let manifests = FilesystemManifestSource::new(modules_dir, args.interfaces_dir());
    load(&config_json, &manifests, &[]).context("loading and cross-checking deployment")
}

fn boot(args: &Args, deployment: ev_config::DeploymentConfig) -> Result<()> {
    tracing::info!("EVerest manager says hi!");

    let logging_config_path = args.logging_config_path();
    run_manager(deployment, &args.modules_dir(), &logging_config_path)?;

    tracing::info!("EVerest manager says goodbye!");
    Ok(())
}

#[cfg(unix)]
fn run_manager(deployment: ev_config::DeploymentConfig, modules_dir: &Path, logging_config_path: &Path) -> Result<()> {
    use ev_manager::ProcessSupervisor;
    use ev_transport::MockTransport;

    // The MQTT broker wire client is out of scope here; the manager's
    // command/variable plumbing runs over an in-process transport until a
    // real broker client is wired in. Subprocess spawning and the
    // say_hello/init_done handshake logic are unaffected by that gap.
    let transport = Arc::new(MockTransport::new());
    let manager = Manager::new(deployment, transport, ProcessSupervisor::new());
    manager.spawn_modules(modules_dir, logging_config_path).context("spawning module subprocesses")?;

    let stop = AtomicBool::new(false);
    manager.run(&stop);
    Ok(())
}

#[cfg(not(unix))]
fn run_manager(_deployment: ev_config::DeploymentConfig, _modules_dir: &Path, _logging_config_path: &Path) -> Result<()> {
    bail!("module subprocess supervision is only implemented on unix targets");
}
