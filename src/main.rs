#![deny(unsafe_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use directories_next::ProjectDirs;
use structopt::StructOpt;
use tokio::sync::mpsc;

use trestle_relayer::chain::EvmChain;
use trestle_relayer::config::{self, DecimalsSource};
use trestle_relayer::context::RelayerContext;
use trestle_relayer::processor::{
    AutoDecimalAdjustProcessor, DecimalAdjustProcessor, DecimalSource, MessageProcessor,
    ResourceDecimalAdjustProcessor,
};
use trestle_relayer::relayer::Relayer;
use trestle_relayer::store::sled::SledBlockStore;
use trestle_relayer::store::BlockStore;

const PACKAGE_ID: [&str; 3] = ["tools", "trestle", "trestle-relayer"];

/// The Trestle Relayer Command-line tool
///
/// Start the relayer from a config file:
///
///     $ trestle-relayer -vvv -c <CONFIG_FILE_PATH>
#[derive(StructOpt)]
#[structopt(name = "Trestle Relayer")]
struct Opts {
    /// A level of verbosity, and can be used multiple times
    #[structopt(short, long, parse(from_occurrences))]
    verbose: i32,
    /// File that contains configration.
    #[structopt(
        short = "c",
        long = "config-filename",
        value_name = "PATH",
        parse(from_os_str)
    )]
    config_filename: Option<PathBuf>,
    /// Directory for the block checkpoint database.
    #[structopt(long = "blockstore", value_name = "PATH", parse(from_os_str))]
    blockstore: Option<PathBuf>,
}

#[paw::main]
#[tokio::main]
async fn main(args: Opts) -> anyhow::Result<()> {
    setup_logger(args.verbose)?;
    let config = load_config(args.config_filename)?;
    tracing::debug!(
        "Loaded configuration: {}",
        serde_json::to_string_pretty(&config)?
    );
    let ctx = RelayerContext::new(config);
    let store = create_store(args.blockstore)?;

    let mut chains = Vec::new();
    let mut decimal_sources = HashMap::new();
    for (chain_name, chain_config) in &ctx.config.evm {
        if !chain_config.enabled {
            tracing::warn!(chain = %chain_name, "Chain is disabled, skipping");
            continue;
        }
        let chain = EvmChain::setup(chain_name, &ctx, store.clone())
            .await
            .with_context(|| format!("failed to set up chain {chain_name}"))?;
        decimal_sources.insert(
            chain.domain_id(),
            DecimalSource {
                client: chain.client(),
                bridge_address: chain.bridge_address(),
            },
        );
        chains.push(Arc::new(chain));
    }
    if chains.is_empty() {
        anyhow::bail!("no enabled chains in the configuration");
    }

    let decimals = &ctx.config.decimals;
    let processors: Vec<Box<dyn MessageProcessor>> = match decimals.source {
        DecimalsSource::Auto => {
            vec![Box::new(AutoDecimalAdjustProcessor::new(decimal_sources))]
        }
        DecimalsSource::Static => {
            vec![Box::new(DecimalAdjustProcessor::new(decimals.domain_table()))]
        }
        DecimalsSource::PerResource => vec![Box::new(ResourceDecimalAdjustProcessor::new(
            decimals.resource_table(),
        ))],
    };
    let relayer = Relayer::new(chains, processors)?;

    let (sys_err_tx, mut sys_err_rx) = mpsc::channel(4);
    relayer.start(&ctx, sys_err_tx);
    tracing::info!("Relayer started");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                tracing::error!("Unable to listen for shutdown signal: {}", err);
            }
            tracing::warn!("Shutting down...");
            ctx.shutdown();
            tracing::info!("Clean Exit ..");
            Ok(())
        }
        maybe_err = sys_err_rx.recv() => {
            ctx.shutdown();
            match maybe_err {
                Some(e) => {
                    tracing::error!("Fatal error: {}", e);
                    Err(e.into())
                }
                None => Ok(()),
            }
        }
    }
}

fn setup_logger(verbosity: i32) -> anyhow::Result<()> {
    use tracing::Level;
    let log_level = match verbosity {
        0 => Level::ERROR,
        1 => Level::WARN,
        2 => Level::INFO,
        3 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let env_filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("trestle_relayer={}", log_level).parse()?);
    tracing_subscriber::fmt()
        .with_target(true)
        .with_max_level(log_level)
        .with_env_filter(env_filter)
        .init();
    Ok(())
}

fn load_config<P>(config_filename: Option<P>) -> anyhow::Result<config::TrestleRelayerConfig>
where
    P: AsRef<Path>,
{
    tracing::debug!("Getting default dirs for the trestle relayer");
    let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
        .context("failed to get config")?;
    let config_path = match config_filename {
        Some(p) => p.as_ref().to_path_buf(),
        None => dirs.config_dir().join("config.toml"),
    };
    tracing::trace!("Loading Config from {} ..", config_path.display());
    config::load(config_path).context("failed to load the config file")
}

fn create_store(path: Option<PathBuf>) -> anyhow::Result<Arc<dyn BlockStore>> {
    let db_path = match path {
        Some(p) => p,
        None => {
            let dirs = ProjectDirs::from(PACKAGE_ID[0], PACKAGE_ID[1], PACKAGE_ID[2])
                .context("failed to get the data directory")?;
            dirs.data_local_dir().join("store")
        }
    };
    let store = SledBlockStore::open(&db_path)
        .with_context(|| format!("failed to open the block store at {}", db_path.display()))?;
    Ok(Arc::new(store))
}
