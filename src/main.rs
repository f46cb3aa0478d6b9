//! chain-dns: authoritative-plus-forwarding DNS server
//!
//! # Usage
//!
//! ```bash
//! # Run with the default configuration path
//! chain-dns
//!
//! # Run with a custom configuration
//! chain-dns -c /etc/chain-dns/config.json
//!
//! # Print the default configuration
//! chain-dns --generate-config
//!
//! # List the built-in sources
//! chain-dns --list-sources
//! ```
//!
//! `SIGHUP` re-reads the configuration, rebuilds the sources and cache,
//! swaps them in atomically and restarts the listener. A failed reload
//! keeps the previous state serving.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use arc_swap::ArcSwap;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn, Level};
use tracing_subscriber::EnvFilter;

use chain_dns::config::{
    apply_env_overrides, default_config_json, load_config, Config,
};
use chain_dns::server::{build_context, QueryHandler, ServerContext, UdpServer};
use chain_dns::source::SourceRegistry;

/// Command-line arguments
struct Args {
    /// Configuration file path
    config_path: PathBuf,
    /// Print the default configuration and exit
    generate_config: bool,
    /// Print the registered source names and exit
    list_sources: bool,
    /// Check the configuration and exit
    check_config: bool,
}

impl Args {
    fn parse() -> Self {
        let mut args = std::env::args().skip(1);
        let mut config_path = PathBuf::from("chain-dns.json");
        let mut generate_config = false;
        let mut list_sources = false;
        let mut check_config = false;

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "-c" | "--config" => {
                    if let Some(path) = args.next() {
                        config_path = PathBuf::from(path);
                    }
                }
                "-g" | "--generate-config" => {
                    generate_config = true;
                }
                "--list-sources" => {
                    list_sources = true;
                }
                "--check" => {
                    check_config = true;
                }
                "-h" | "--help" => {
                    print_help();
                    std::process::exit(0);
                }
                "-v" | "--version" => {
                    println!("chain-dns v{}", chain_dns::VERSION);
                    std::process::exit(0);
                }
                _ => {
                    eprintln!("Unknown argument: {arg}");
                    print_help();
                    std::process::exit(1);
                }
            }
        }

        Self {
            config_path,
            generate_config,
            list_sources,
            check_config,
        }
    }
}

fn print_help() {
    println!(
        r#"chain-dns v{}

Authoritative-plus-forwarding DNS server with chained answer sources.

USAGE:
    chain-dns [OPTIONS]

OPTIONS:
    -c, --config <PATH>     Configuration file path [default: chain-dns.json]
    -g, --generate-config   Print the default configuration and exit
    --list-sources          Print the registered source names and exit
    --check                 Check the configuration and exit
    -h, --help              Print help information
    -v, --version           Print version information

ENVIRONMENT:
    CHAIN_DNS_ADDR          Override the UDP bind address
    CHAIN_DNS_LOG_LEVEL     Override the log level (fatal, warn, info, debug)

SIGNALS:
    SIGHUP                  Reload configuration and sources
"#,
        chain_dns::VERSION
    );
}

/// Initialize logging from the config's `log.level`
///
/// `RUST_LOG` wins when set; `fatal` maps to the error level.
fn init_logging(config: &Config) {
    let level = match config.log.level.as_str() {
        "fatal" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        _ => Level::INFO,
    };

    let filter = EnvFilter::from_default_env()
        .add_directive(level.into())
        // Reduce noise from dependencies
        .add_directive("hickory_proto=warn".parse().expect("static directive"))
        .add_directive("h2=warn".parse().expect("static directive"))
        .add_directive("tower=warn".parse().expect("static directive"));

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Read and validate the configuration, tolerating a missing file
///
/// A missing file is only a warning; the server runs on defaults plus
/// environment overrides.
fn read_config(path: &PathBuf) -> Result<Config, chain_dns::ConfigError> {
    let mut config = match load_config(path) {
        Ok(config) => config,
        Err(chain_dns::ConfigError::FileNotFound { path }) => {
            warn!(path = %path, "config file not found, using defaults");
            Config::default()
        }
        Err(e) => return Err(e),
    };
    apply_env_overrides(&mut config)?;
    Ok(config)
}

fn main() -> ExitCode {
    let args = Args::parse();

    if args.generate_config {
        println!("{}", default_config_json());
        return ExitCode::SUCCESS;
    }

    if args.list_sources {
        println!("Supported sources:");
        for name in SourceRegistry::builtin().names() {
            println!("  {name}");
        }
        return ExitCode::SUCCESS;
    }

    let config = match read_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("chain-dns: {e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(&config);

    if args.check_config {
        info!("configuration ok");
        return ExitCode::SUCCESS;
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "cannot build runtime");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(serve(args.config_path, config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

/// Serve until terminated, reloading on SIGHUP
///
/// Each generation binds a fresh listener against the current context;
/// a reload swaps the context pointer, stops the old listener and loops.
async fn serve(config_path: PathBuf, config: Config) -> chain_dns::Result<()> {
    let registry = SourceRegistry::builtin();

    let context = build_context(&config, &registry).await?;
    let current: Arc<ArcSwap<ServerContext>> = Arc::new(ArcSwap::from_pointee(context));

    let mut sighup = signal(SignalKind::hangup()).map_err(chain_dns::ChainDnsError::Io)?;

    loop {
        let context = current.load_full();
        let handler = Arc::new(QueryHandler::new(Arc::clone(&context)));
        let server = UdpServer::bind(context.addr, handler).await?;

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut serving = tokio::spawn(server.run(shutdown_rx));

        loop {
            tokio::select! {
                _ = sighup.recv() => {
                    info!("server reloading");
                    match reload(&config_path, &registry).await {
                        Ok(context) => {
                            current.store(Arc::new(context));
                            let _ = shutdown_tx.send(true);
                            let _ = (&mut serving).await;
                            break; // rebind against the new context
                        }
                        Err(e) => {
                            warn!(error = %e, "server reload failed");
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("server terminating");
                    let _ = shutdown_tx.send(true);
                    let _ = (&mut serving).await;
                    return Ok(());
                }
                result = &mut serving => {
                    if let Err(e) = result {
                        error!(error = %e, "listener task failed");
                    }
                    return Ok(());
                }
            }
        }
    }
}

/// Re-read the configuration and build a fresh context
async fn reload(
    config_path: &PathBuf,
    registry: &SourceRegistry,
) -> chain_dns::Result<ServerContext> {
    let config = read_config(config_path)?;
    Ok(build_context(&config, registry).await?)
}
