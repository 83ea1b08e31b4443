//! Apex engine CLI.
//!
//! Usage:
//!   apex [OPTIONS]
//!
//! Options:
//!   -c, --config <FILE>      Config file path (default: config/engine.toml)
//!   --symbol <SYMBOL>        Symbol to replay (default: BTC-USD)
//!   --bars <N>               Number of synthetic bars to generate
//!   --fast <N> / --slow <N>  Demo SMA windows
//!
//! Runs the demo SMA-cross strategy through the backtest engine on a
//! deterministic synthetic series and prints the performance report. The
//! live order path is exercised by the integration tests; this binary is a
//! replay harness.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use chrono::{Duration, TimeZone, Utc};
use clap::Parser;
use rust_decimal::Decimal;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use apex_common::{LiquidityLevel, MarketSnapshot};
use apex_engine::backtest::strategies::SmaCross;
use apex_engine::{BacktestConfig, BacktestEngine, EngineConfig};

/// CLI arguments for the apex engine.
#[derive(Parser, Debug)]
#[command(name = "apex")]
#[command(about = "Algorithmic trading core: backtest replay harness")]
#[command(version)]
struct Args {
    /// Config file path
    #[arg(short, long, default_value = "config/engine.toml")]
    config: PathBuf,

    /// Symbol to replay
    #[arg(long, default_value = "BTC-USD")]
    symbol: String,

    /// Number of synthetic bars to generate
    #[arg(long, default_value_t = 2000)]
    bars: usize,

    /// Fast SMA window for the demo strategy
    #[arg(long, default_value_t = 12)]
    fast: usize,

    /// Slow SMA window for the demo strategy
    #[arg(long, default_value_t = 48)]
    slow: usize,
}

#[tokio::main]
async fn main() -> ExitCode {
    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run() -> Result<()> {
    let _ = dotenvy::dotenv();
    let args = Args::parse();

    let mut config = if args.config.exists() {
        EngineConfig::from_file(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?
    } else {
        EngineConfig::default()
    };
    config.apply_env_overrides();

    let level: Level = config.log_level.0.parse().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    if !args.config.exists() {
        warn!(path = ?args.config, "config file not found, using defaults");
    }

    let data = synthetic_series(&args.symbol, args.bars);
    let start = data.first().map(|b| b.timestamp).unwrap_or_else(Utc::now);
    let end = data.last().map(|b| b.timestamp).unwrap_or_else(Utc::now);

    let backtest = BacktestConfig::new(
        "demo-1",
        "sma cross demo",
        &args.symbol,
        start,
        end + Duration::seconds(1),
        Decimal::new(100_000, 0),
    )
    .with_costs(Decimal::new(5, 4), Decimal::new(2, 4));

    let mut engine = BacktestEngine::new();
    engine.on_progress(|progress| {
        info!(
            pct = progress.pct,
            equity = %progress.equity,
            "backtest progress"
        );
    });
    engine.initialize(backtest)?;

    let mut strategy = SmaCross::new(args.fast, args.slow);
    let report = engine.run(&mut strategy, &data).await?;

    println!("== {} ({}) ==", report.name, report.symbol);
    println!("  bars            {}", report.equity_curve.len());
    println!("  trades          {} ({} won / {} lost)", report.total_trades, report.winning_trades, report.losing_trades);
    println!("  final balance   {}", report.final_balance);
    println!("  total return    {} ({}%)", report.total_return, report.total_return_pct.round_dp(3));
    println!("  annualized      {:.2}%", report.annualized_return_pct);
    println!("  max drawdown    {:.2}%", report.max_drawdown * 100.0);
    println!("  sharpe/sortino  {:.2} / {:.2}", report.sharpe_ratio, report.sortino_ratio);
    println!("  calmar          {:.2}", report.calmar_ratio);
    println!("  win rate        {:.1}%", report.win_rate * 100.0);
    println!("  profit factor   {:.2}", report.profit_factor);
    println!("  commissions     {}", report.total_commission.round_dp(2));
    println!("  slippage        {}", report.total_slippage.round_dp(2));
    Ok(())
}

/// Deterministic synthetic price series: a slow cycle with a faster ripple,
/// so the demo crossover actually trades.
fn synthetic_series(symbol: &str, bars: usize) -> Vec<MarketSnapshot> {
    let start = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
    (0..bars)
        .map(|i| {
            let t = i as f64;
            let price = 100.0 + 10.0 * (t / 120.0).sin() + 2.0 * (t / 17.0).sin();
            let price = Decimal::from_f64_retain(price).unwrap_or(Decimal::ONE_HUNDRED);
            let price = price.round_dp(4);
            MarketSnapshot {
                symbol: symbol.to_string(),
                price,
                volume: Decimal::new(1000, 0),
                volatility: Decimal::new(2, 2),
                bid: price - Decimal::new(5, 2),
                ask: price + Decimal::new(5, 2),
                liquidity: LiquidityLevel::Normal,
                timestamp: start + Duration::minutes(15 * i as i64),
            }
        })
        .collect()
}
