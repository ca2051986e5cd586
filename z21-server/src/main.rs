//! z21-server: Z21 LAN command station over UDP.
//!
//! Throttles and apps on the LAN talk to a virtual command station that
//! remembers locos, turnouts and CVs.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use log::{error, info};
use z21_protocol::{PowerState, Z21_PORT};
use z21_server::store::{SERIAL_LSB, SERIAL_MSB};
use z21_server::{ConfigStore, Engine, FileConfigStore, MemoryConfigStore};

mod logging;
mod server;

use server::{Server, ServerConfig, VirtualStation};

const DEFAULT_LISTEN: &str = "0.0.0.0:21105";
const DEFAULT_STORE: &str = "z21-server.bin";
const DEFAULT_TICK_MS: u64 = 2000;
const DEFAULT_LOG_DIR: &str = "logs";
const DEFAULT_RETENTION_DAYS: u64 = 7;

/// z21-server - Z21 LAN command station
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Address to listen on
    #[arg(short, long, default_value = DEFAULT_LISTEN)]
    listen: SocketAddr,

    /// Configuration file path
    #[arg(short = 'f', long)]
    config: Option<PathBuf>,

    /// Path to the persistent settings image
    #[arg(short, long, default_value = DEFAULT_STORE)]
    store: PathBuf,

    /// Keep settings in memory only
    #[arg(long)]
    no_persist: bool,

    /// Session tick interval in milliseconds
    #[arg(long, default_value_t = DEFAULT_TICK_MS)]
    tick_interval_ms: u64,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Directory where log files are stored
    #[arg(long, default_value = DEFAULT_LOG_DIR)]
    log_dir: PathBuf,

    /// Number of days to keep log files
    #[arg(long, default_value_t = DEFAULT_RETENTION_DAYS)]
    log_retention_days: u64,
}

/// Configuration file format.
#[derive(Debug, serde::Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    server: ServerSection,
    #[serde(default)]
    station: StationSection,
    #[serde(default)]
    logging: LoggingSection,
}

#[derive(Debug, serde::Deserialize, Default)]
struct ServerSection {
    listen: Option<String>,
    tick_interval_ms: Option<u64>,
    store: Option<String>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct StationSection {
    /// Serial number reported to clients; written to the store at startup.
    serial_number: Option<u16>,
    initial_power: Option<PowerState>,
}

#[derive(Debug, serde::Deserialize, Default)]
struct LoggingSection {
    log_dir: Option<String>,
    retention_days: Option<u64>,
    level: Option<String>,
}

fn load_config(path: &PathBuf) -> Result<ConfigFile, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: ConfigFile = toml::from_str(&contents)?;
    Ok(config)
}

/// Write the configured serial number into the store.
fn seed_serial<S: ConfigStore>(store: &mut S, serial: u16) -> Result<(), z21_server::StoreError> {
    let [msb, lsb] = serial.to_be_bytes();
    store.write(SERIAL_MSB, msb)?;
    store.write(SERIAL_LSB, lsb)?;
    Ok(())
}

async fn run<S: ConfigStore>(
    mut store: S,
    config: ServerConfig,
    station: &StationSection,
) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(serial) = station.serial_number {
        seed_serial(&mut store, serial)?;
    }
    info!(
        "  Serial number: {}",
        u16::from_be_bytes([store.read(SERIAL_MSB), store.read(SERIAL_LSB)])
    );

    let power = station.initial_power.unwrap_or(PowerState::TrackVoltageOff);
    info!("  Initial power: {:?}", power);

    let engine = Engine::new(VirtualStation::new(), store).with_power(power);
    Server::new(config, engine).run().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Load config file: explicit path > auto-detect > default
    let config_path = args.config.clone().or_else(|| {
        let default_path = PathBuf::from("z21-server.toml");
        default_path.exists().then_some(default_path)
    });
    let file_config = if let Some(config_path) = &config_path {
        match load_config(config_path) {
            Ok(c) => {
                eprintln!("Loaded config from: {}", config_path.display());
                c
            }
            Err(e) => {
                eprintln!("Failed to load config file: {}", e);
                return Err(e);
            }
        }
    } else {
        ConfigFile::default()
    };

    // Command line takes precedence over the config file
    let log_dir = if args.log_dir.to_string_lossy() != DEFAULT_LOG_DIR {
        args.log_dir.clone()
    } else {
        PathBuf::from(file_config.logging.log_dir.as_deref().unwrap_or(DEFAULT_LOG_DIR))
    };
    let log_retention_days = if args.log_retention_days != DEFAULT_RETENTION_DAYS {
        args.log_retention_days
    } else {
        file_config.logging.retention_days.unwrap_or(DEFAULT_RETENTION_DAYS)
    };

    let log_level = file_config.logging.level.as_deref();
    logging::init_logging(&log_dir, log_retention_days, args.verbose, log_level)?;

    let listen_addr = match file_config.server.listen.as_deref() {
        Some(listen) if args.listen.to_string() == DEFAULT_LISTEN => listen.parse()?,
        _ => args.listen,
    };
    let tick_interval_ms = if args.tick_interval_ms != DEFAULT_TICK_MS {
        args.tick_interval_ms
    } else {
        file_config.server.tick_interval_ms.unwrap_or(DEFAULT_TICK_MS)
    };
    let store_path = if args.store.to_string_lossy() != DEFAULT_STORE {
        args.store.clone()
    } else {
        file_config.server.store.as_deref().map(PathBuf::from).unwrap_or(args.store.clone())
    };

    let config = ServerConfig {
        listen_addr,
        tick_interval: Duration::from_millis(tick_interval_ms),
    };

    info!("z21-server starting...");
    info!("  Listen address: {}", config.listen_addr);
    if config.listen_addr.port() != Z21_PORT {
        info!("  Clients must be configured for port {}", config.listen_addr.port());
    }
    info!("  Tick interval: {}ms", tick_interval_ms);

    let result = if args.no_persist {
        info!("  Settings store: memory");
        run(MemoryConfigStore::new(), config, &file_config.station).await
    } else {
        info!("  Settings store: {:?}", store_path);
        let store = match FileConfigStore::open(&store_path) {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open settings store: {}", e);
                return Err(e.into());
            }
        };
        run(store, config, &file_config.station).await
    };

    if let Err(e) = &result {
        error!("Server stopped: {}", e);
    }
    result
}
