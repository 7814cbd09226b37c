use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::signal;
use tracing::{info, warn};

use hlkit::core::prelude::*;
use hlkit::core::utils::timestamp_to_datetime;
use hlkit::hyperliquid::{BookLevel, HyperliquidClient};
use hlkit::monitoring::setup_logging;

#[derive(Parser)]
#[command(name = "hlkit")]
#[command(about = "Symbol lookup and market data for the Hyperliquid venue")]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Overrides the configured network
    #[arg(short, long, global = true)]
    network: Option<Network>,

    /// Overrides the configured log level
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List known symbols
    Symbols {
        #[arg(long, value_enum)]
        class: Option<ClassArg>,
    },
    /// Show how a symbol maps onto the venue
    Resolve { symbol: String },
    /// Print mid prices for every listed coin
    Mids,
    /// Print an order book snapshot
    Book {
        symbol: String,
        #[arg(long, default_value_t = 10)]
        depth: usize,
    },
    /// Stream a live feed until interrupted
    Stream {
        symbol: String,
        #[arg(long, value_enum, default_value_t = Channel::L2book)]
        channel: Channel,
    },
    /// Show version information
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ClassArg {
    Perp,
    Spot,
}

impl From<ClassArg> for AssetClass {
    fn from(value: ClassArg) -> Self {
        match value {
            ClassArg::Perp => AssetClass::Perp,
            ClassArg::Spot => AssetClass::Spot,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Channel {
    L2book,
    Trades,
}

fn load_config(cli: &Cli) -> Result<HlConfig> {
    let mut config = match &cli.config {
        Some(path) => {
            HlConfig::from_file(path).with_context(|| format!("Failed to load configuration from {}", path))?
        }
        None => HlConfig::from_files(&["hlkit.toml"][..]).context("Failed to load configuration")?,
    };

    if let Some(network) = cli.network {
        config.network.network = network;
    }
    if let Some(level) = &cli.log_level {
        config.logging.level = level.clone();
    }
    Ok(config)
}

fn print_levels(label: &str, levels: &[BookLevel], depth: usize) {
    println!("{}:", label);
    for level in levels.iter().take(depth) {
        println!("  {:>16} {:>16} ({})", level.px, level.sz, level.n);
    }
}

async fn run(client: &HyperliquidClient, command: Commands) -> Result<()> {
    match command {
        Commands::Symbols { class } => {
            let classes = match class {
                Some(class) => vec![class.into()],
                None => vec![AssetClass::Perp, AssetClass::Spot],
            };
            for class in classes {
                for symbol in client.symbols().symbols(class) {
                    println!("{}\t{}", class, symbol);
                }
            }
        }
        Commands::Resolve { symbol } => {
            let internal = client.symbols().normalize_symbol(&symbol, NormalizationMode::Perp);
            match client.symbols().record(&internal)? {
                Lookup::Found(record) => {
                    println!("internal: {}", record.internal_symbol);
                    println!("exchange: {}", record.exchange_name);
                    println!("index:    {}", record.index);
                    println!("class:    {}", record.class);
                    if record.is_delisted {
                        println!("delisted");
                    }
                }
                Lookup::NotFound => bail!("Unknown symbol: {}", symbol),
            }
        }
        Commands::Mids => {
            let mids = client.info().all_mids().await?;
            let mut entries: Vec<_> = mids.mids.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            for (symbol, mid) in entries {
                println!("{}\t{}", symbol, mid);
            }
        }
        Commands::Book { symbol, depth } => {
            let book = client.info().l2_book(&symbol).await?;
            println!("{} @ {}", book.coin, timestamp_to_datetime(book.time));
            print_levels("asks", book.asks(), depth);
            print_levels("bids", book.bids(), depth);
        }
        Commands::Stream { symbol, channel } => {
            let handle = match channel {
                Channel::L2book => {
                    client
                        .ws()
                        .subscribe_l2_book(&symbol, |book| {
                            println!(
                                "{} bid {:?} ask {:?}",
                                book.coin,
                                book.best_bid(),
                                book.best_ask()
                            );
                        })
                        .await?
                }
                Channel::Trades => {
                    client
                        .ws()
                        .subscribe_trades(&symbol, |trades| {
                            for trade in trades {
                                println!("{} {} {} @ {}", trade.coin, trade.side, trade.sz, trade.px);
                            }
                        })
                        .await?
                }
            };
            info!("Streaming {}; press Ctrl+C to stop", handle.key());
            // Runs until the Ctrl+C branch in main wins the select.
            std::future::pending::<()>().await;
        }
        Commands::Version => {}
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Commands::Version) {
        println!("hlkit v{}", env!("CARGO_PKG_VERSION"));
        println!("Symbol lookup and market data for the Hyperliquid venue");
        return Ok(());
    }

    let config = load_config(&cli)?;
    let _guard = setup_logging(&config.logging)?;

    let client = HyperliquidClient::builder().config(config).build()?;
    client.initialize().await.context("Failed to load symbol metadata")?;

    let result = tokio::select! {
        result = run(&client, cli.command) => result,
        _ = signal::ctrl_c() => {
            warn!("Received Ctrl+C signal");
            Ok(())
        }
    };

    client.shutdown().await?;
    result
}
