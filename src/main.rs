use anyhow::{Context, Result};
use clap::Parser;
use machinetalk_core::{AppConfig, LogFormat, LoggingConfig};
use machinetalk_discovery::{
    DiscoveryHandler, DiscoveryService, Machine, MachineService, MachineTable,
    MdnsTransport, TransportFailure,
};
use machinetalk_status::{ContainerType, StatusClient};
use std::path::PathBuf;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// Machinetalk - discover Machinekit machines and follow their status
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (defaults are used when omitted)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// UUID of the machine whose status service should be followed
    #[arg(short, long, env = "MACHINETALK_UUID")]
    uuid: Option<String>,

    /// Quiet period after which a browse cycle counts as exhausted
    #[arg(long)]
    settle_ms: Option<u64>,

    /// Seconds before an unanswered resolution is abandoned (0 disables)
    #[arg(long)]
    resolve_timeout: Option<u64>,

    /// Print discovery events as JSON lines
    #[arg(long)]
    json: bool,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        if let Some(uuid) = &self.uuid {
            config.machine_uuid = Some(uuid.clone());
        }
        if let Some(settle_ms) = self.settle_ms {
            config.discovery.settle_period_ms = settle_ms;
        }
        if let Some(secs) = self.resolve_timeout {
            config.discovery.resolve_timeout_secs = secs;
        }
    }
}

/// Prints discovery progress in plain text
struct Printer;

impl DiscoveryHandler for Printer {
    fn machine_discovered(&mut self, machine: &Machine) {
        println!("Machine found: {}", machine.uuid);
    }

    fn service_discovered(&mut self, machine: &Machine, service: &MachineService) {
        println!("Service found: {} {} {}", machine.uuid, service.name, service.dsn);
    }

    fn initial_discovery_finished(&mut self, machines: &MachineTable) {
        println!("Found the following machines:");
        for uuid in machines.keys() {
            println!("{}", uuid);
        }
    }

    fn failure(&mut self, failure: &TransportFailure) {
        error!(
            service_type = failure.service_type.as_deref().unwrap_or("-"),
            reason = %failure.reason,
            "Discovery failure"
        );
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    logging.parse_level()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.filter_directives()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_file(logging.file_line)
        .with_line_number(logging.file_line)
        .with_writer(std::io::stderr);

    match logging.format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<AppConfig> {
    let mut config = match &args.config {
        Some(path) => AppConfig::from_config_builder(path)
            .with_context(|| format!("Failed to load config file: {:?}", path))?,
        None => AppConfig::default(),
    };

    args.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// Waits for the initial sweep, then follows the target machine's status
/// service until cancelled
async fn follow_machine(
    service: &DiscoveryService,
    config: &AppConfig,
    cancel: CancellationToken,
) -> Result<()> {
    let machines = service.initial_discovery().await?;

    let Some(uuid) = config.machine_uuid.as_deref() else {
        info!("No target machine configured");
        return Ok(());
    };

    let Some(machine) = machines.get(uuid) else {
        println!("My machine was not found");
        return Ok(());
    };
    println!("Found my machine");

    let Some(dsn) = machine.dsn("status") else {
        warn!(uuid, "Machine does not announce a status service");
        return Ok(());
    };

    let mut client = StatusClient::connect(dsn, config.status.clone())
        .await
        .with_context(|| format!("Failed to connect to status service at {}", dsn))?;

    client
        .on(ContainerType::MtEmcstatFullUpdate, |container| {
            info!(notes = ?container.note, "Full status update");
        })
        .on(ContainerType::MtEmcstatIncrementalUpdate, |container| {
            debug!(notes = ?container.note, "Incremental status update");
        });

    client.run(cancel).await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();
    let config = load_config(&args)?;

    init_tracing(&config.logging)?;
    info!(
        types = ?config.discovery.service_strings(),
        target = config.machine_uuid.as_deref().unwrap_or("-"),
        "Starting Machinetalk discovery"
    );

    let service = DiscoveryService::new(config.discovery.clone())?;

    let printer = if args.json {
        let events = service.event_receiver();
        tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                match serde_json::to_string(&event) {
                    Ok(line) => println!("{}", line),
                    Err(e) => warn!(event = event.kind(), error = %e, "Failed to serialize event"),
                }
            }
        })
    } else {
        service.spawn_handler(Printer)
    };

    let transport = MdnsTransport::new(service.event_sink(), config.discovery.settle_period())?;
    service.start(transport).await?;

    let cancel = CancellationToken::new();

    // Run until Ctrl-C; discovery keeps reporting after the status client ends
    tokio::select! {
        result = follow_machine(&service, &config, cancel.clone()) => {
            if let Err(e) = result {
                error!("Status session error: {:#}", e);
            }
            signal::ctrl_c().await?;
        }
        _ = signal::ctrl_c() => {}
    }

    info!("Received shutdown signal, stopping...");
    cancel.cancel();
    service.stop().await?;
    printer.abort();

    Ok(())
}
