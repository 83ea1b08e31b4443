//! Integration tests for the backtest engine lifecycle: deterministic
//! replay results, cooperative pause/stop, and the demo strategy.

use chrono::{Duration, TimeZone, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use apex_common::{LiquidityLevel, MarketSnapshot};
use apex_engine::backtest::strategies::SmaCross;
use apex_engine::backtest::{ExitReason, StrategySignal};
use apex_engine::{BacktestConfig, BacktestEngine, BacktestState, Strategy};

fn bars(prices: &[Decimal]) -> Vec<MarketSnapshot> {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    prices
        .iter()
        .enumerate()
        .map(|(i, price)| MarketSnapshot {
            symbol: "ACME".to_string(),
            price: *price,
            volume: dec!(1000),
            volatility: dec!(0.02),
            bid: *price - dec!(0.01),
            ask: *price + dec!(0.01),
            liquidity: LiquidityLevel::Normal,
            timestamp: start + Duration::minutes(15 * i as i64),
        })
        .collect()
}

fn config(bar_count: usize) -> BacktestConfig {
    let start = Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap();
    BacktestConfig::new(
        "bt-int",
        "integration",
        "ACME",
        start,
        start + Duration::minutes(15 * bar_count as i64),
        dec!(10000),
    )
}

struct ZeroSignal;

impl Strategy for ZeroSignal {
    fn name(&self) -> &str {
        "zero_signal"
    }

    fn on_bar(&mut self, _bar: &MarketSnapshot) -> anyhow::Result<Vec<StrategySignal>> {
        Ok(Vec::new())
    }
}

/// Forced long at bar 0, forced exit at bar 10.
struct ForcedRoundTrip {
    bar: usize,
}

impl Strategy for ForcedRoundTrip {
    fn name(&self) -> &str {
        "forced_round_trip"
    }

    fn on_bar(&mut self, _bar: &MarketSnapshot) -> anyhow::Result<Vec<StrategySignal>> {
        let current = self.bar;
        self.bar += 1;
        match current {
            0 => Ok(vec![StrategySignal::EnterLong {
                quantity: Some(dec!(1)),
            }]),
            10 => Ok(vec![StrategySignal::Exit]),
            _ => Ok(Vec::new()),
        }
    }
}

// ============================================================================
// Scenario E: forced entry/exit, price 100 -> 110, quantity 1, zero costs
// ============================================================================

#[tokio::test]
async fn forced_round_trip_returns_exactly_ten() {
    let prices: Vec<Decimal> = (0..=10).map(|i| dec!(100) + Decimal::from(i as u64)).collect();
    let mut engine = BacktestEngine::new();
    engine.initialize(config(prices.len())).unwrap();

    let report = engine
        .run(&mut ForcedRoundTrip { bar: 0 }, &bars(&prices))
        .await
        .unwrap();

    assert_eq!(report.total_trades, 1);
    assert_eq!(report.winning_trades, 1);
    assert_eq!(report.total_return, dec!(10));
    assert_eq!(report.total_return_pct, dec!(0.1));
    assert_eq!(report.total_commission, Decimal::ZERO);
    assert_eq!(report.total_slippage, Decimal::ZERO);
}

// ============================================================================
// Zero-signal property: capital preserved to the cent
// ============================================================================

#[tokio::test]
async fn zero_signal_final_balance_equals_initial_capital() {
    let prices: Vec<Decimal> = (0..200)
        .map(|i| dec!(100) + Decimal::from(i % 7))
        .collect();
    let mut engine = BacktestEngine::new();
    engine.initialize(config(prices.len())).unwrap();

    let report = engine.run(&mut ZeroSignal, &bars(&prices)).await.unwrap();
    assert_eq!(report.final_balance, dec!(10000));
    assert_eq!(report.total_trades, 0);
    // Ratios degrade to zero, never NaN.
    assert!(report.sharpe_ratio.is_finite());
    assert!(report.sortino_ratio.is_finite());
    assert!(report.calmar_ratio.is_finite());
}

// ============================================================================
// Cooperative pause and stop from a supervising task
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pause_delays_completion_and_resume_finishes() {
    let prices: Vec<Decimal> = vec![dec!(100); 500];
    let data = bars(&prices);
    let mut engine = BacktestEngine::new();
    let mut run_config = config(prices.len());
    run_config.yield_every_bars = 8;
    engine.initialize(run_config).unwrap();

    let control = engine.control_handle();
    control.pause();

    let supervisor = tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(120)).await;
        control.resume();
    });

    let started = std::time::Instant::now();
    let report = engine.run(&mut ZeroSignal, &data).await.unwrap();
    supervisor.await.unwrap();

    // The loop idled at the pause poll until the supervisor resumed it.
    assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    assert_eq!(engine.state(), BacktestState::Completed);
    assert_eq!(report.equity_curve.len(), 500);
}

#[tokio::test]
async fn stop_short_circuits_the_run() {
    let prices: Vec<Decimal> = vec![dec!(100); 500];
    let mut engine = BacktestEngine::new();
    engine.initialize(config(prices.len())).unwrap();
    engine.stop();

    let report = engine.run(&mut ZeroSignal, &bars(&prices)).await.unwrap();
    assert_eq!(engine.state(), BacktestState::Stopped);
    assert!(report.equity_curve.len() < 500);
}

// ============================================================================
// Stop-loss exits feed the trade log with the configured contract
// ============================================================================

#[tokio::test]
async fn stop_loss_exit_reason_recorded() {
    let prices = vec![dec!(100), dec!(99), dec!(95), dec!(95), dec!(95)];
    let mut engine = BacktestEngine::new();
    engine
        .initialize(config(prices.len()).with_stop_loss(dec!(0.02)))
        .unwrap();

    struct EnterOnce {
        entered: bool,
    }
    impl Strategy for EnterOnce {
        fn name(&self) -> &str {
            "enter_once"
        }
        fn on_bar(&mut self, _bar: &MarketSnapshot) -> anyhow::Result<Vec<StrategySignal>> {
            if self.entered {
                Ok(Vec::new())
            } else {
                self.entered = true;
                Ok(vec![StrategySignal::EnterLong {
                    quantity: Some(dec!(2)),
                }])
            }
        }
    }

    let report = engine
        .run(&mut EnterOnce { entered: false }, &bars(&prices))
        .await
        .unwrap();

    assert_eq!(report.total_trades, 1);
    assert_eq!(report.losing_trades, 1);
    // Stop at 98 on quantity 2: exactly -4.
    assert_eq!(report.total_return, dec!(-4));
    assert!(report.max_drawdown > 0.0);
}

// ============================================================================
// Demo strategy drives a full run
// ============================================================================

#[tokio::test]
async fn sma_cross_trades_a_trending_series() {
    // Rise, fall, rise: at least one full crossover round trip.
    let mut prices = Vec::new();
    for i in 0..60 {
        prices.push(dec!(100) + Decimal::from(i as u64));
    }
    for i in 0..60 {
        prices.push(dec!(160) - Decimal::from(i as u64));
    }
    for i in 0..60 {
        prices.push(dec!(100) + Decimal::from(i as u64));
    }

    let mut engine = BacktestEngine::new();
    engine
        .initialize(config(prices.len()).with_costs(dec!(0.0005), dec!(0.0002)))
        .unwrap();
    let report = engine
        .run(&mut SmaCross::new(5, 20), &bars(&prices))
        .await
        .unwrap();

    assert!(report.total_trades >= 1);
    assert!(report.total_commission > Decimal::ZERO);
    assert_eq!(engine.state(), BacktestState::Completed);
    assert_eq!(report.equity_curve.len(), prices.len());
    // Long entries during rallies on a rising series should profit overall.
    assert!(report.final_balance != report.initial_capital);
}
