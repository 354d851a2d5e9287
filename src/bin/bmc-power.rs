use clap::{Parser, Subcommand};
use log::{error, info, LevelFilter};
use simple_logger::SimpleLogger;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use capmcd::bmc::{ClientProvider, RedfishAdapter};
use capmcd::config::{force_variant, load_config};
use capmcd::dispatch::{collect, Dispatcher};
use capmcd::jobs::WorkerPool;
use capmcd::model::{BmcCmd, NodeInfo, PowerAction, PowerCapControl};
use capmcd::orderer::StaticInventory;
use capmcd::powercap::{capabilities, decode_power_caps, expand_power_urls, set_power_cap_command};
use capmcd::sequence::{status_report, PowerSequencer};
use capmcd::QUEUE_DEPTH_PER_WORKER;

#[derive(Parser)]
#[command(
    author,
    version,
    about = "Run one power command against a list of BMC targets",
    long_about = None
)]
struct Args {
    #[arg(long, short, help = "JSON array of target descriptors")]
    nodes: PathBuf,

    #[arg(long, short, help = "TOML service configuration")]
    config: Option<PathBuf>,

    #[arg(long, short, help = "JSON cabinet classes and dependent components")]
    inventory: Option<PathBuf>,

    #[arg(long, help = "Log hardware requests instead of sending them")]
    simulate_only: bool,

    #[arg(long, help = "PEM bundle used to verify BMC certificates")]
    ca_bundle: Option<PathBuf>,

    #[arg(long, default_value_t = 60)]
    client_timeout_secs: u64,

    #[arg(long, short, default_value_t = 32)]
    workers: usize,

    #[arg(long, short)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Report the power state of every target
    Status,
    /// Power on, off, restart or NMI every target
    Power {
        #[arg(help = "On, Off, Restart, ForceOn, ForceOff, ForceRestart or NMI")]
        action: PowerAction,
        #[arg(long, help = "Use the Force form of On, Off or Restart")]
        force: bool,
    },
    /// Read the power-cap controls of every target
    GetPowerCap,
    /// Group targets by their power-cap controls and bounds
    GetPowerCapCapabilities,
    /// Apply power-cap controls, given as name=watts, to every target
    SetPowerCap {
        #[arg(required = true, value_parser = parse_control)]
        controls: Vec<PowerCapControl>,
    },
}

fn parse_control(arg: &str) -> Result<PowerCapControl, String> {
    let (name, value) = arg
        .rsplit_once('=')
        .ok_or_else(|| format!("expected name=watts, got '{arg}'"))?;
    let value = value
        .trim()
        .parse()
        .map_err(|e| format!("bad value in '{arg}': {e}"))?;
    Ok(PowerCapControl::new(name.trim(), value))
}

fn read_inventory(path: &Path) -> Result<StaticInventory, Box<dyn std::error::Error>> {
    Ok(serde_json::from_slice(&std::fs::read(path)?)?)
}

fn read_nodes(path: &Path) -> Result<Vec<Arc<NodeInfo>>, Box<dyn std::error::Error>> {
    let nodes: Vec<NodeInfo> = serde_json::from_slice(&std::fs::read(path)?)?;
    Ok(nodes
        .into_iter()
        .map(|node| Arc::new(node.with_detected_capabilities()))
        .collect())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let mut logger = SimpleLogger::new().env();
    if args.debug {
        logger = logger.with_level(LevelFilter::Debug);
    }
    logger.init()?;

    let config = Arc::new(load_config(args.config.as_deref())?);
    let ca_pem = match &args.ca_bundle {
        Some(path) => Some(std::fs::read(path)?),
        None => None,
    };
    let timeout = Duration::from_secs(args.client_timeout_secs);
    let clients = ClientProvider::new(timeout, ca_pem.as_deref())?;
    let adapter = RedfishAdapter::new(Arc::new(clients), config, args.simulate_only);

    let depth = args.workers * QUEUE_DEPTH_PER_WORKER;
    let pool = Arc::new(WorkerPool::new(args.workers, depth));
    pool.start();
    let dispatcher = Dispatcher::new(pool, adapter);

    let nodes = read_nodes(&args.nodes)?;
    info!("Loaded {} targets from {}", nodes.len(), args.nodes.display());

    let mut failures = 0;
    match args.command {
        Command::Status => {
            let results = dispatcher.run(&BmcCmd::Status, &nodes).await;
            for res in &results {
                println!("{res}");
            }
            let report = status_report(&results);
            println!(
                "on: {}  off: {}  undefined: {}  errors: {}",
                report.on.len(),
                report.off.len(),
                report.undefined.len(),
                report.errors.len()
            );
            failures = report.errors.len();
        }

        Command::Power { action, force } => {
            let action = if force { force_variant(action)? } else { action };
            let mut sequencer = PowerSequencer::new(dispatcher);
            if let Some(path) = &args.inventory {
                sequencer = sequencer.with_inventory(Arc::new(read_inventory(path)?));
            }
            let report = sequencer.run(&nodes, action).await;
            for res in &report.results {
                println!("{res}");
            }
            if let Some(msg) = &report.err_msg {
                error!("{msg}");
            }
            failures = report.failures;
        }

        Command::GetPowerCap => {
            let targets: Vec<Arc<NodeInfo>> = nodes.iter().flat_map(expand_power_urls).collect();
            for res in dispatcher.run(&BmcCmd::GetPowerCap, &targets).await {
                if !res.is_ok() {
                    failures += 1;
                    println!("{res}");
                    continue;
                }
                match decode_power_caps(&res.node, &res.msg) {
                    Ok(controls) => {
                        for control in controls {
                            println!("{} {}={}", res.node.xname, control.name, control.value);
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        println!("{} rc=-1 msg={e}", res.node.xname);
                    }
                }
            }
        }

        Command::GetPowerCapCapabilities => {
            println!("{}", serde_json::to_string_pretty(&capabilities(&nodes))?);
        }

        Command::SetPowerCap { controls } => {
            let mut cmds = HashMap::new();
            let mut targets = Vec::new();
            for node in &nodes {
                match set_power_cap_command(node, &controls) {
                    Ok(Some((target, cmd))) => {
                        cmds.insert(target.xname.clone(), cmd);
                        targets.push(target);
                    }
                    Ok(None) => info!("{}: no matching power-cap controls", node.xname),
                    Err(e) => {
                        failures += 1;
                        println!("{} rc=-1 msg={e}", node.xname);
                    }
                }
            }
            let (count, rx) = dispatcher.dispatch_map(&cmds, &targets).await;
            for res in collect(count, rx).await {
                if !res.is_ok() {
                    failures += 1;
                }
                println!("{res}");
            }
        }
    }

    if failures > 0 {
        error!("{failures} target(s) failed");
        std::process::exit(1);
    }
    Ok(())
}
