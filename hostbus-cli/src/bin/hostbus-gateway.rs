use std::{path::PathBuf, process::ExitCode, time::Duration};

use clap::Parser;
use hostbus_cli::config::{GatewayConfig, ModeSetting, PolicySetting};

#[derive(Parser)]
#[command(about = "Forward packets between a CAN bus and ZeroMQ endpoints")]
struct Args {
    /// TOML configuration file
    #[clap(short, long)]
    config: Option<PathBuf>,
    /// socketcan interface, e.g. can0
    #[clap(short, long)]
    interface: Option<String>,
    /// Endpoint packets are received from
    #[clap(long)]
    endpoint_in: Option<String>,
    /// Endpoint packets are published to
    #[clap(long)]
    endpoint_out: Option<String>,
    /// ZeroMQ socket arrangement
    #[clap(long, value_enum)]
    mode: Option<ModeSetting>,
    /// Capacity of each received packet queue
    #[clap(long)]
    max_queue_size: Option<usize>,
    /// What to do when a received packet queue is full
    #[clap(long, value_enum)]
    overflow_policy: Option<PolicySetting>,
    /// Poll connectors at least this often, in milliseconds
    #[clap(long)]
    idle_timeout_ms: Option<u64>,
}

impl Args {
    fn apply(&self, config: &mut GatewayConfig) {
        if let Some(interface) = &self.interface {
            config.can.interface = interface.clone();
        }
        if let Some(endpoint) = &self.endpoint_in {
            config.zeromq.endpoint_in = endpoint.clone();
        }
        if let Some(endpoint) = &self.endpoint_out {
            config.zeromq.endpoint_out = endpoint.clone();
        }
        if let Some(mode) = self.mode {
            config.zeromq.mode = mode;
        }
        if let Some(size) = self.max_queue_size {
            config.can.max_queue_size = size;
            config.zeromq.max_queue_size = size;
        }
        if let Some(policy) = self.overflow_policy {
            config.can.overflow_policy = policy;
            config.zeromq.overflow_policy = policy;
        }
        if let Some(timeout) = self.idle_timeout_ms {
            config.idle_timeout_ms = Some(timeout);
        }
    }
}

fn load_config(args: &Args) -> Option<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => match GatewayConfig::load_from_file(path) {
            Ok(config) => config,
            Err(e) => {
                log::error!("{e}");
                return None;
            }
        },
        None => GatewayConfig::default(),
    };
    args.apply(&mut config);
    Some(config)
}

#[cfg(feature = "socketcan")]
fn run(config: GatewayConfig) -> ExitCode {
    use hostbus_connector::{socketcan::SocketCanDriver, BusConnector, Gateway, PubSubConnector};

    let driver = match SocketCanDriver::open(&config.can.interface) {
        Ok(driver) => driver,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let pubsub = match PubSubConnector::with_config(config.zeromq.connector_config()) {
        Ok(connector) => connector,
        Err(e) => {
            log::error!("{e}");
            return ExitCode::FAILURE;
        }
    };

    let mut gateway = Gateway::new();
    if let Some(timeout) = config.idle_timeout() {
        gateway = gateway.with_idle_timeout(timeout);
    }
    gateway.add_connector(BusConnector::with_config(
        driver,
        config.can.connector_config(),
    ));
    gateway.add_connector(pubsub);
    gateway.run()
}

#[cfg(not(feature = "socketcan"))]
fn run(_config: GatewayConfig) -> ExitCode {
    log::error!("This program is only supported with socketcan");
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let Some(config) = load_config(&args) else {
        return ExitCode::FAILURE;
    };
    log::debug!("Configuration: {config:?}");
    if config.idle_timeout() == Some(Duration::ZERO) {
        log::warn!("An idle timeout of 0 keeps the gateway spinning");
    }
    run(config)
}
