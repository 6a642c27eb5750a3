//! Command-line bootstrap: parses flags, loads configuration, wires the concrete collaborators
//! (Docker source, Cloudflare provider, TXT registry) together and hands them to
//! [`sherpa_dns::controller::Controller`].

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use env_logger::Builder;
use log::{error, info, warn, LevelFilter};

use sherpa_dns::cleanup::parse_delay;
use sherpa_dns::config::{self, Config};
use sherpa_dns::controller::{Controller, ControllerConfig};
use sherpa_dns::health;
use sherpa_dns::plan::Policy;
use sherpa_dns::provider::{CloudflareProvider, CloudflareProviderConfig, Provider};
use sherpa_dns::registry::{Registry, TxtRegistry, TxtRegistryConfig};
use sherpa_dns::source::docker::DockerRuntime;
use sherpa_dns::source::{ContainerRuntime, LabelFilter, Source};

/// Reconciles DNS records in a cloud DNS zone against labels on locally running containers.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a YAML configuration file. Falls back to the built-in default search paths.
    config: Option<PathBuf>,

    /// Run a single reconciliation pass and exit, overriding `controller.once` in the config.
    #[arg(long, action)]
    once: bool,

    /// Apply no changes to the DNS provider, only log what would happen, overriding
    /// `controller.dry_run` in the config.
    #[arg(long, short = 'd', action)]
    dry_run: bool,

    /// Override `logging.level` from the config file.
    #[arg(long, value_name = "LEVEL", env = "SHERPA_DNS_LOG_LEVEL")]
    log_level: Option<LevelFilter>,
}

fn main() {
    let cli = Cli::parse();

    let config = match config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("could not load configuration: {e}");
            std::process::exit(1);
        }
    };

    let log_level = cli
        .log_level
        .or_else(|| config.logging.level.parse().ok())
        .unwrap_or(LevelFilter::Info);
    Builder::new().filter_level(log_level).init();

    info!("starting sherpa-dns v{}", env!("CARGO_PKG_VERSION"));

    let rt = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            error!("could not start async runtime: {e}");
            std::process::exit(1);
        }
    };

    match rt.block_on(run(config, cli.once, cli.dry_run)) {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            error!("fatal error during startup: {e:#}");
            std::process::exit(1);
        }
    }
}

async fn run(config: Config, once_override: bool, dry_run_override: bool) -> anyhow::Result<()> {
    let once = once_override || config.controller.once;
    let dry_run = dry_run_override || config.controller.dry_run;
    if dry_run {
        info!("running in dry-run mode, no changes will be made to the DNS provider");
    }

    let label_filter = LabelFilter::parse(&config.source.label_filter);
    let runtime_for_source: Box<dyn ContainerRuntime> =
        Box::new(DockerRuntime::new(sherpa_dns::source::docker::DEFAULT_SOCKET_PATH)?);
    let runtime_for_health = Arc::new(DockerRuntime::new(sherpa_dns::source::docker::DEFAULT_SOCKET_PATH)?);
    let source = Source::new(runtime_for_source, config.source.label_prefix.clone(), label_filter);

    let provider: Box<dyn Provider> = match config.provider.name {
        config::ProviderKind::Cloudflare => {
            let api_token = config.provider.cloudflare.api_token.clone().ok_or_else(|| {
                anyhow::anyhow!("provider.cloudflare.api_token is required when provider.name is cloudflare")
            })?;
            Box::new(CloudflareProvider::from_config(&CloudflareProviderConfig {
                api_token,
                proxied_by_default: config.provider.cloudflare.proxied_by_default,
                domain_filter: config.domains.include.clone(),
                exclude_domains: config.domains.exclude.clone(),
            })?)
        }
    };

    let registry: Box<dyn Registry> = match config.registry.kind {
        config::RegistryKind::Txt => Box::new(TxtRegistry::new(TxtRegistryConfig {
            txt_prefix: config.registry.txt_prefix.clone(),
            owner_id: config.registry.txt_owner_id.clone(),
            wildcard_replacement: config.registry.txt_wildcard_replacement.clone(),
            encrypt: config.registry.encrypt,
            encryption_key: config.registry.encryption_key.clone(),
        })),
    };

    let policy: Policy = config.controller.policy.into();
    let controller_config = ControllerConfig {
        policy,
        interval: parse_delay(&config.controller.interval),
        cleanup_delay: parse_delay(&config.controller.cleanup_delay),
        cleanup_on_stop: config.controller.cleanup_on_stop,
        once,
        dry_run,
    };

    let controller = Arc::new(Controller::new(source, provider, registry, controller_config));

    // The health server runs for the lifetime of the process, once mode included, and is
    // torn down on our way out.
    let (health_shutdown_tx, health_shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    let health_handle = tokio::spawn(health::serve(runtime_for_health, async {
        let _ = health_shutdown_rx.await;
    }));

    if once {
        controller.run(tokio::sync::mpsc::channel(1).1).await;
        let _ = health_shutdown_tx.send(());
        let _ = health_handle.await;
        return Ok(());
    }

    let (event_tx, event_rx) = tokio::sync::mpsc::channel(sherpa_dns::controller::EVENT_CHANNEL_CAPACITY);
    sherpa_dns::source::docker::spawn_event_watcher(
        sherpa_dns::source::docker::DEFAULT_SOCKET_PATH.to_string(),
        event_tx,
    );

    tokio::select! {
        _ = controller.run(event_rx) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                warn!("error waiting for shutdown signal: {e}");
            }
            info!("shutting down sherpa-dns");
        }
    }

    let _ = health_shutdown_tx.send(());
    let _ = health_handle.await;
    Ok(())
}
