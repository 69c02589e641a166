//! trapfwd - SNMP trap to Sensu client socket bridge

use anyhow::{Context, Result};
use clap::{Arg, ArgAction, Command};
use futures_util::stream::StreamExt;
use signal_hook::consts::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

use trapfwd::{
    processor::spawn_stats_reporter, snmp_listener::ListenerConfig, Config, DescriptorStore,
    DnsReverseLookup, EventPublisher, FieldExtractor, IdentifierResolver, MibCatalog,
    SnmpListener, SocketPublisher, TrapMatcher, TrapProcessor, YamlDefinitions,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    let matches = Command::new("trapfwd")
        .version(VERSION)
        .about("Receives SNMP traps, matches them against trap definitions and forwards templated events to the local Sensu client socket")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("config.json"),
        )
        .arg(
            Arg::new("daemon")
                .short('d')
                .long("daemon")
                .help("Run as daemon (suppress console output)")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Increase log verbosity (-v debug, -vv trace)")
                .action(ArgAction::Count),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .help("Generate a default configuration file and exit")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("check")
                .long("check")
                .help("Load configuration, trap definitions and MIBs, report and exit")
                .action(ArgAction::SetTrue),
        )
        .get_matches();

    let config_path = matches
        .get_one::<String>("config")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.json"));
    let daemon_mode = matches.get_flag("daemon");
    let verbosity = matches.get_count("verbose");

    if matches.get_flag("generate-config") {
        return generate_default_config(&config_path).await;
    }

    let (config, found) = load_configuration(&config_path).await?;

    initialise_logging(&config, daemon_mode, verbosity)?;

    info!("Starting trapfwd v{}", VERSION);
    if found {
        info!("Configuration loaded from: {}", config_path.display());
    } else {
        warn!(
            "Configuration file {} not found - running with defaults",
            config_path.display()
        );
    }

    let warnings = config.validate().context("Configuration validation failed")?;
    for warning in &warnings {
        warn!("{}", warning);
    }

    let components = build_components(&config);

    if matches.get_flag("check") {
        println!("configuration: {}", config_path.display());
        println!("listen address: {}", config.listen_address());
        println!("trap definitions: {}", components.descriptors.len());
        println!("MIB modules: {}", components.mib_modules);
        match &components.publisher {
            Some(publisher) => println!("client socket: {}", publisher.endpoint()),
            None => println!("client socket: not configured (events will not be forwarded)"),
        }
        return Ok(());
    }

    run_application(config, components).await
}

/// Generate a default configuration file
async fn generate_default_config(config_path: &Path) -> Result<()> {
    if config_path.exists() {
        anyhow::bail!("Configuration file already exists: {}", config_path.display());
    }

    Config::sample()
        .save_to_file(config_path)
        .await
        .context("Failed to save default configuration")?;

    println!("Configuration generated: {}", config_path.display());
    println!("Please edit the configuration file and restart the application.");
    Ok(())
}

/// Load configuration, falling back to defaults when the file is missing.
/// The flag reports whether the file existed.
async fn load_configuration(config_path: &Path) -> Result<(Config, bool)> {
    if !config_path.exists() {
        return Ok((Config::default(), false));
    }

    let config = Config::load_from_file(config_path)
        .await
        .context("Failed to load configuration file")?;
    Ok((config, true))
}

/// Initialize logging based on configuration
fn initialise_logging(config: &Config, daemon_mode: bool, verbosity: u8) -> Result<()> {
    let level = match verbosity {
        0 => match config.logging.level.as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        },
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    let mut layers = Vec::new();

    if config.logging.console_output && !daemon_mode {
        let console_layer = tracing_subscriber::fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(true);
        layers.push(console_layer.boxed());
    }

    if let Some(ref log_file_path) = config.logging.file_output {
        let log_path = Path::new(log_file_path);
        let log_dir = log_path.parent().unwrap_or(Path::new("."));
        let log_filename = log_path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("trapfwd.log");

        std::fs::create_dir_all(log_dir).context("Failed to create log directory")?;

        let file_appender = match config.logging.rotation_strategy.as_str() {
            "hourly" => tracing_appender::rolling::hourly(log_dir, log_filename),
            "never" => tracing_appender::rolling::never(log_dir, log_filename),
            _ => tracing_appender::rolling::daily(log_dir, log_filename),
        };

        let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

        let file_layer = tracing_subscriber::fmt::layer()
            .with_writer(non_blocking)
            .with_ansi(false)
            .with_file(true)
            .with_line_number(true)
            .with_target(false);

        layers.push(file_layer.boxed());

        // The guard flushes buffered lines on drop; it must outlive the subscriber
        static GUARD_HOLDER: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
            std::sync::OnceLock::new();
        let _ = GUARD_HOLDER.set(guard);
    }

    if layers.is_empty() {
        let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);
        layers.push(stderr_layer.boxed());
    }

    tracing_subscriber::registry()
        .with(layers)
        .with(tracing_subscriber::filter::LevelFilter::from_level(level))
        .init();

    Ok(())
}

struct Components {
    descriptors: DescriptorStore,
    resolver: IdentifierResolver,
    publisher: Option<Arc<dyn EventPublisher>>,
    mib_modules: usize,
}

fn build_components(config: &Config) -> Components {
    let catalog = MibCatalog::scan(&config.snmp.mibs_dir);
    let mib_modules = catalog.len();
    let resolver = if catalog.is_empty() {
        IdentifierResolver::literal_only()
    } else {
        IdentifierResolver::new(Arc::new(YamlDefinitions::load(&catalog)))
    };
    if !resolver.has_definitions() {
        info!("no MIB definitions loaded - trap_name and symbolic fields will not resolve");
    }

    let descriptors = DescriptorStore::load_dir(&config.snmp.trapdefs_dir);
    if descriptors.is_empty() {
        warn!(
            "no trap definitions found in {} - every trap will be ignored",
            config.snmp.trapdefs_dir
        );
    }

    let publisher = config.client_socket().map(|socket| {
        Arc::new(SocketPublisher::new(
            socket.host,
            socket.port,
            config.client_socket_timeout(),
        )) as Arc<dyn EventPublisher>
    });

    Components {
        descriptors,
        resolver,
        publisher,
        mib_modules,
    }
}

/// Main application runtime
async fn run_application(config: Config, components: Components) -> Result<()> {
    let (trap_tx, trap_rx) = mpsc::unbounded_channel();

    let Components {
        descriptors,
        resolver,
        publisher,
        ..
    } = components;

    let processor = TrapProcessor::new(
        descriptors,
        TrapMatcher::new(resolver.clone()),
        FieldExtractor::new(resolver, Arc::new(DnsReverseLookup), config.hostname_timeout()),
        publisher,
    )
    .with_default_handler(config.snmp.handler.clone());

    let stats_handle = spawn_stats_reporter(
        processor.stats(),
        Duration::from_secs(config.snmp.send_interval),
    );

    let listener = SnmpListener::new(ListenerConfig::from(&config), trap_tx);
    let socket = listener
        .bind()
        .await
        .context("Possible causes: port already in use, insufficient permissions")?;

    let mut listener_handle = tokio::spawn(async move {
        if let Err(e) = listener.serve(socket).await {
            error!("SNMP listener failed: {}", e);
        }
    });
    let processor_handle = tokio::spawn(processor.run(trap_rx));

    let mut signals =
        Signals::new([SIGTERM, SIGINT]).context("Failed to register signal handlers")?;

    info!("trapfwd started successfully");

    let listener_running = tokio::select! {
        _ = signals.next() => {
            info!("Received shutdown signal, stopping gracefully...");
            true
        }
        _ = &mut listener_handle => {
            warn!("SNMP listener stopped unexpectedly");
            false
        }
    };

    // Dropping the listener closes the channel; the processor finishes
    // whatever is already queued and exits.
    if listener_running {
        listener_handle.abort();
        let _ = listener_handle.await;
    }
    if tokio::time::timeout(Duration::from_secs(10), processor_handle)
        .await
        .is_err()
    {
        warn!("Trap processor did not drain within 10s - exiting anyway");
    }
    stats_handle.abort();

    info!("trapfwd stopped");
    Ok(())
}
