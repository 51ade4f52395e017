//! BTC up/down Polymarket trend bot entry point.

use std::net::SocketAddr;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use rust_decimal::Decimal;
use time::OffsetDateTime;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use polymarket_trend::api::{create_router, AppState};
use polymarket_trend::config::{Config, Mode};
use polymarket_trend::driver::{Driver, Sources};
use polymarket_trend::ledger::{PortfolioLedger, TradeJournal};
use polymarket_trend::market::client::http_client;
use polymarket_trend::market::{discover_window, PolymarketClient};
use polymarket_trend::metrics;
use polymarket_trend::oracle::BinanceOracle;
use polymarket_trend::signing::{signature_type_label, ClobSigner};
use polymarket_trend::trading::{ExchangeGateway, LiveGateway, PaperGateway};
use polymarket_trend::utils::shutdown_signal;

/// BTC up/down Polymarket trend bot.
#[derive(Parser, Debug)]
#[command(name = "polymarket-trend")]
#[command(about = "Maker-only trend trading on BTC up/down windows on Polymarket")]
#[command(version)]
struct Args {
    /// Enable verbose logging.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the trading loop (default).
    Run {
        /// Trading mode: paper or live.
        #[arg(long)]
        mode: Option<Mode>,

        /// HTTP server port for health/status/metrics.
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Check configuration validity.
    CheckConfig,

    /// Discover the current BTC up/down window.
    DiscoverWindow,

    /// Print trade statistics from the trade journal.
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI arguments
    let args = Args::parse();

    // Initialize logging
    let filter = if args.verbose {
        EnvFilter::new("polymarket_trend=debug,info")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    // Handle subcommands
    match args.command {
        Some(Command::CheckConfig) => cmd_check_config().await,
        Some(Command::DiscoverWindow) => cmd_discover_window().await,
        Some(Command::Status) => cmd_status().await,
        Some(Command::Run { mode, port }) => cmd_run(mode, port).await,
        None => cmd_run(None, None).await,
    }
}

/// Check configuration validity.
async fn cmd_check_config() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BTC UP/DOWN TREND BOT - CONFIGURATION CHECK");
    println!("======================================================================");

    // Load configuration
    print!("Loading configuration... ");
    let config = match Config::load() {
        Ok(c) => {
            println!("OK");
            c
        }
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration load failed"));
        }
    };

    // Validate configuration
    print!("Validating configuration... ");
    match config.validate() {
        Ok(()) => println!("OK"),
        Err(e) => {
            println!("FAILED");
            println!("  Error: {}", e);
            return Err(anyhow::anyhow!("Configuration validation failed"));
        }
    }

    // Check private key
    if config.is_live() || !config.polymarket_private_key.is_empty() {
        print!("Checking private key... ");
        match ClobSigner::new(
            &config.polymarket_private_key,
            config.polymarket_signature_type,
            config.polymarket_funder.clone(),
        ) {
            Ok(signer) => {
                println!("OK");
                println!("  Wallet address: {}", signer.address());
                println!("  Maker address: {}", signer.maker_address());
                println!(
                    "  Signature type: {}",
                    signature_type_label(signer.signature_type())
                );
                if config.is_magic_link() && config.polymarket_funder.is_none() {
                    println!("  WARNING: Magic.link requires POLYMARKET_FUNDER to be set!");
                }
            }
            Err(e) => {
                println!("FAILED");
                println!("  Error: {}", e);
                return Err(anyhow::anyhow!("Private key invalid"));
            }
        }
    }

    // Show configuration summary
    println!("----------------------------------------------------------------------");
    println!("Configuration Summary:");
    println!("  Mode: {}", config.mode);
    println!("  Trade Size: ${}", config.trade_size);
    if !config.is_live() {
        println!("  Starting Cash: ${}", config.starting_cash);
    }
    println!("  Window: {} ({}s)", config.market_slug_prefix, config.window_seconds);
    println!("  Trend Window: {}s", config.trend_window_seconds);
    println!(
        "  Entry Band: {} - {} (tick {})",
        config.min_entry_price, config.max_entry_price, config.price_tick
    );
    println!(
        "  Take Profit: {}  Stop Loss: {} abs / {} pct  Reversal: {}",
        config.take_profit_min_pct, config.stop_loss_abs, config.stop_loss_pct, config.reversal_pct
    );
    println!("  Entry Safety Margin: {}s", config.entry_safety_margin_seconds);
    println!("  Tick Interval: {}ms", config.tick_interval_ms);
    println!("  Kill Switch: {}", config.kill_switch_path);
    println!("  Trade Log: {}", config.trade_log().unwrap_or("disabled"));
    println!("======================================================================");
    println!("CONFIGURATION CHECK PASSED");
    println!("======================================================================");

    Ok(())
}

/// Discover the current BTC up/down window.
async fn cmd_discover_window() -> anyhow::Result<()> {
    println!("======================================================================");
    println!("BTC UP/DOWN TREND BOT - WINDOW DISCOVERY");
    println!("======================================================================");

    let config = Config::load()?;
    let http = http_client(config.http_timeout_ms)?;
    let now = OffsetDateTime::now_utc();

    println!("\nSearching for the current {} window...\n", config.market_slug_prefix);

    match discover_window(
        &http,
        &config.polymarket_gamma_url,
        &config.market_slug_prefix,
        config.window_seconds,
        now,
    )
    .await
    {
        Ok(window) => {
            println!("WINDOW FOUND");
            println!("----------------------------------------------------------------------");
            println!("  Slug: {}", window.slug);
            println!("  Condition: {}", window.condition_id);
            println!("  UP Token: {}", window.up_token_id);
            println!("  DOWN Token: {}", window.down_token_id);
            println!("  Time Remaining: {}", window.time_remaining_str(now));
            if let Some(q) = &window.question {
                println!("  Question: {}", q);
            }
            println!("======================================================================");
        }
        Err(e) => {
            println!("NO WINDOW FOUND");
            println!("  Error: {}", e);
            println!(
                "\nWindows open every {} seconds. Try again shortly.",
                config.window_seconds
            );
            println!("======================================================================");
        }
    }

    Ok(())
}

/// Print trade statistics from the trade journal.
async fn cmd_status() -> anyhow::Result<()> {
    let config = Config::load()?;
    let Some(path) = config.trade_log() else {
        println!("Trade log disabled (TRADE_LOG_PATH is empty)");
        return Ok(());
    };

    let journal = TradeJournal::new(path);
    let summary = journal
        .summary()
        .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path, e))?;

    println!("======================================================================");
    println!("TRADE SUMMARY ({})", path);
    println!("======================================================================");
    println!("  Trades: {}", summary.trades);
    println!("  Wins: {}  Losses: {}", summary.wins, summary.losses);
    println!("  Win Rate: {}%", (summary.win_rate * Decimal::ONE_HUNDRED).round_dp(1));
    println!("  Avg Win: ${}", summary.avg_win.round_dp(4));
    println!("  Avg Loss: ${}", summary.avg_loss.round_dp(4));
    println!("  Total P&L: ${}", summary.total_pnl.round_dp(4));
    println!("======================================================================");

    Ok(())
}

/// Run the trading loop.
async fn cmd_run(mode_override: Option<Mode>, port_override: Option<u16>) -> anyhow::Result<()> {
    // Load configuration
    info!("Loading configuration...");
    let mut config = Config::load().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    // Override with CLI args if provided
    if let Some(mode) = mode_override {
        config.mode = mode;
    }
    if let Some(port) = port_override {
        config.port = port;
    }

    // Validate configuration
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        return Err(anyhow::anyhow!("Configuration validation failed: {}", e));
    }

    info!("Configuration loaded successfully");
    info!("Mode: {}", if config.is_live() { "LIVE TRADING" } else { "PAPER" });
    info!("Trade size: ${}", config.trade_size);
    info!("Market: {} ({}s windows)", config.market_slug_prefix, config.window_seconds);

    // Create app state
    let mut app_state = AppState::new();
    match metrics::install_recorder() {
        Ok(handle) => app_state = app_state.with_metrics(handle),
        Err(e) => warn!("Metrics disabled: {}", e),
    }

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(addr).await?;
    info!("HTTP server listening on {}", addr);

    let router = create_router(app_state.clone());

    // Spawn HTTP server
    let _server_handle = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await
    });

    // Create collaborators
    let client = Arc::new(PolymarketClient::new(&config)?);
    let oracle = Arc::new(BinanceOracle::new(client.http().clone(), &config));

    let (gateway, starting_cash): (Arc<dyn ExchangeGateway>, Decimal) = match config.mode {
        Mode::Paper => (
            Arc::new(PaperGateway::with_resolver(client.clone())),
            config.starting_cash,
        ),
        Mode::Live => {
            let live = LiveGateway::connect(client.as_ref().clone(), &config).await?;
            let balance = live.balance().await?;
            info!("Wallet: {} (maker {})", live.address(), live.maker_address());
            info!("USDC balance: ${}", balance);
            (Arc::new(live), balance)
        }
    };

    let ledger = PortfolioLedger::from_config(&config, starting_cash);
    let sources = Sources {
        prices: oracle,
        books: client.clone(),
        windows: client,
    };

    let mut driver = Driver::new(&config, ledger, sources, gateway).with_state(app_state);

    info!("========================================");
    info!("BTC UP/DOWN TREND BOT STARTED");
    info!("========================================");
    info!("Starting cash: ${}", starting_cash);
    info!("Kill switch: {}", config.kill_switch_path);
    info!("========================================");

    driver.run().await;
    Ok(())
}
