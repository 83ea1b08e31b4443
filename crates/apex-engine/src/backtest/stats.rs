//! Performance statistics for a completed backtest run.
//!
//! Every ratio is zero-guarded: degenerate inputs (no trades, flat equity,
//! zero variance) produce 0, never NaN or infinity.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::position::BacktestTrade;
use super::BacktestConfig;

/// Seconds in a Julian year, the annualization base.
const SECONDS_PER_YEAR: f64 = 31_557_600.0;

/// One point on the equity curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquityPoint {
    pub timestamp: DateTime<Utc>,
    pub equity: Decimal,
}

/// One point on the drawdown curve (fraction of peak, 0 = at peak).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrawdownPoint {
    pub timestamp: DateTime<Utc>,
    pub drawdown: Decimal,
}

/// Final report for a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestReport {
    pub id: String,
    pub name: String,
    pub symbol: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,

    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,

    pub initial_capital: Decimal,
    pub final_balance: Decimal,
    /// Absolute return in currency units.
    pub total_return: Decimal,
    pub total_return_pct: Decimal,
    pub annualized_return_pct: f64,

    /// Largest peak-to-trough decline, fraction of peak.
    pub max_drawdown: f64,
    pub max_drawdown_duration_secs: i64,

    pub sharpe_ratio: f64,
    pub sortino_ratio: f64,
    pub calmar_ratio: f64,

    pub win_rate: f64,
    pub profit_factor: f64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
    pub avg_holding_secs: f64,

    pub total_commission: Decimal,
    pub total_slippage: Decimal,

    /// Root-mean-square of the drawdown curve (percent).
    pub ulcer_index: f64,
    /// Mean of the drawdown curve (percent).
    pub pain_index: f64,

    pub equity_curve: Vec<EquityPoint>,
    pub drawdown_curve: Vec<DrawdownPoint>,
}

/// Build the report from the run's raw outputs.
pub(super) fn compute_report(
    config: &BacktestConfig,
    trades: &[BacktestTrade],
    equity_curve: Vec<EquityPoint>,
    drawdown_curve: Vec<DrawdownPoint>,
    final_balance: Decimal,
    total_commission: Decimal,
    total_slippage: Decimal,
) -> BacktestReport {
    let winning = trades.iter().filter(|t| t.is_winner()).count();
    let losing = trades
        .iter()
        .filter(|t| t.realized_pnl < Decimal::ZERO)
        .count();

    let total_return = final_balance - config.initial_capital;
    let total_return_pct = if config.initial_capital > Decimal::ZERO {
        total_return / config.initial_capital * Decimal::ONE_HUNDRED
    } else {
        Decimal::ZERO
    };

    let gross_profit: Decimal = trades
        .iter()
        .filter(|t| t.realized_pnl > Decimal::ZERO)
        .map(|t| t.realized_pnl)
        .sum();
    let gross_loss: Decimal = trades
        .iter()
        .filter(|t| t.realized_pnl < Decimal::ZERO)
        .map(|t| t.realized_pnl.abs())
        .sum();

    let avg_win = if winning > 0 {
        gross_profit / Decimal::from(winning as u64)
    } else {
        Decimal::ZERO
    };
    let avg_loss = if losing > 0 {
        gross_loss / Decimal::from(losing as u64)
    } else {
        Decimal::ZERO
    };
    let win_rate = if trades.is_empty() {
        0.0
    } else {
        winning as f64 / trades.len() as f64
    };
    let profit_factor = {
        let loss = gross_loss.to_f64().unwrap_or(0.0);
        if loss > 0.0 {
            gross_profit.to_f64().unwrap_or(0.0) / loss
        } else {
            0.0
        }
    };
    let avg_holding_secs = if trades.is_empty() {
        0.0
    } else {
        trades.iter().map(|t| t.holding_secs() as f64).sum::<f64>() / trades.len() as f64
    };

    let returns = period_returns(&equity_curve);
    let periods_per_year = periods_per_year(&equity_curve);
    let annualized_return_pct =
        annualized_return_pct(config, final_balance, equity_curve.as_slice());

    let rf_per_period = if periods_per_year > 0.0 {
        config.risk_free_rate / periods_per_year
    } else {
        0.0
    };
    let sharpe_ratio = sharpe(&returns, rf_per_period, periods_per_year);
    let sortino_ratio = sortino(&returns, rf_per_period, periods_per_year);

    let max_drawdown = drawdown_curve
        .iter()
        .map(|p| p.drawdown.to_f64().unwrap_or(0.0))
        .fold(0.0, f64::max);
    let max_drawdown_duration_secs = max_drawdown_duration(&drawdown_curve);
    let calmar_ratio = if max_drawdown > 0.0 {
        annualized_return_pct / (max_drawdown * 100.0)
    } else {
        0.0
    };

    let dd_pcts: Vec<f64> = drawdown_curve
        .iter()
        .map(|p| p.drawdown.to_f64().unwrap_or(0.0) * 100.0)
        .collect();
    let pain_index = if dd_pcts.is_empty() {
        0.0
    } else {
        dd_pcts.iter().sum::<f64>() / dd_pcts.len() as f64
    };
    let ulcer_index = if dd_pcts.is_empty() {
        0.0
    } else {
        (dd_pcts.iter().map(|d| d * d).sum::<f64>() / dd_pcts.len() as f64).sqrt()
    };

    BacktestReport {
        id: config.id.clone(),
        name: config.name.clone(),
        symbol: config.symbol.clone(),
        start: config.start,
        end: config.end,
        total_trades: trades.len(),
        winning_trades: winning,
        losing_trades: losing,
        initial_capital: config.initial_capital,
        final_balance,
        total_return,
        total_return_pct,
        annualized_return_pct,
        max_drawdown,
        max_drawdown_duration_secs,
        sharpe_ratio,
        sortino_ratio,
        calmar_ratio,
        win_rate,
        profit_factor,
        avg_win,
        avg_loss,
        avg_holding_secs,
        total_commission,
        total_slippage,
        ulcer_index,
        pain_index,
        equity_curve,
        drawdown_curve,
    }
}

/// Per-bar simple returns off the equity curve.
fn period_returns(curve: &[EquityPoint]) -> Vec<f64> {
    curve
        .windows(2)
        .filter_map(|w| {
            let prev = w[0].equity.to_f64()?;
            let next = w[1].equity.to_f64()?;
            if prev > 0.0 {
                Some(next / prev - 1.0)
            } else {
                None
            }
        })
        .collect()
}

/// Observation frequency inferred from the curve's average bar spacing.
fn periods_per_year(curve: &[EquityPoint]) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let span = (curve[curve.len() - 1].timestamp - curve[0].timestamp).num_seconds() as f64;
    let bar_secs = span / (curve.len() - 1) as f64;
    if bar_secs > 0.0 {
        SECONDS_PER_YEAR / bar_secs
    } else {
        0.0
    }
}

fn annualized_return_pct(
    config: &BacktestConfig,
    final_balance: Decimal,
    curve: &[EquityPoint],
) -> f64 {
    if curve.len() < 2 {
        return 0.0;
    }
    let initial = config.initial_capital.to_f64().unwrap_or(0.0);
    let final_ = final_balance.to_f64().unwrap_or(0.0);
    if initial <= 0.0 || final_ <= 0.0 {
        return 0.0;
    }
    let span_secs = (curve[curve.len() - 1].timestamp - curve[0].timestamp).num_seconds() as f64;
    if span_secs <= 0.0 {
        return 0.0;
    }
    let years = span_secs / SECONDS_PER_YEAR;
    ((final_ / initial).powf(1.0 / years) - 1.0) * 100.0
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

fn sharpe(returns: &[f64], rf_per_period: f64, periods_per_year: f64) -> f64 {
    if returns.is_empty() || periods_per_year <= 0.0 {
        return 0.0;
    }
    let mean_excess = mean(returns) - rf_per_period;
    let variance = returns
        .iter()
        .map(|r| {
            let d = r - mean(returns);
            d * d
        })
        .sum::<f64>()
        / returns.len() as f64;
    let std = variance.sqrt();
    if std > 0.0 {
        mean_excess / std * periods_per_year.sqrt()
    } else {
        0.0
    }
}

fn sortino(returns: &[f64], rf_per_period: f64, periods_per_year: f64) -> f64 {
    if returns.is_empty() || periods_per_year <= 0.0 {
        return 0.0;
    }
    let mean_excess = mean(returns) - rf_per_period;
    let downside: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
    if downside.is_empty() {
        return 0.0;
    }
    let downside_var =
        downside.iter().map(|r| r * r).sum::<f64>() / returns.len() as f64;
    let downside_std = downside_var.sqrt();
    if downside_std > 0.0 {
        mean_excess / downside_std * periods_per_year.sqrt()
    } else {
        0.0
    }
}

/// Longest continuous stretch spent below a prior equity peak.
fn max_drawdown_duration(curve: &[DrawdownPoint]) -> i64 {
    let mut longest: i64 = 0;
    let mut underwater_since: Option<DateTime<Utc>> = None;
    for point in curve {
        if point.drawdown > Decimal::ZERO {
            let since = underwater_since.get_or_insert(point.timestamp);
            longest = longest.max((point.timestamp - *since).num_seconds());
        } else {
            underwater_since = None;
        }
    }
    longest
}
