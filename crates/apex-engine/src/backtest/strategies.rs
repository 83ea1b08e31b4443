//! Test-scaffolding strategies.
//!
//! Signal generation is external to the core; these exist so the CLI and
//! the integration tests have something deterministic to drive the replay
//! loop with. They are not product strategies.

use std::collections::VecDeque;

use rust_decimal::Decimal;

use apex_common::MarketSnapshot;

use super::{Strategy, StrategySignal};

/// Moving-average crossover: long while the fast average is above the slow
/// one, flat otherwise.
pub struct SmaCross {
    fast_window: usize,
    slow_window: usize,
    prices: VecDeque<Decimal>,
    long: bool,
}

impl SmaCross {
    pub fn new(fast_window: usize, slow_window: usize) -> Self {
        assert!(fast_window < slow_window, "fast window must be shorter");
        Self {
            fast_window,
            slow_window,
            prices: VecDeque::new(),
            long: false,
        }
    }

    fn sma(&self, window: usize) -> Option<Decimal> {
        if self.prices.len() < window {
            return None;
        }
        let sum: Decimal = self.prices.iter().rev().take(window).copied().sum();
        Some(sum / Decimal::from(window as u64))
    }
}

impl Strategy for SmaCross {
    fn name(&self) -> &str {
        "sma_cross"
    }

    fn on_bar(&mut self, bar: &MarketSnapshot) -> anyhow::Result<Vec<StrategySignal>> {
        if self.prices.len() == self.slow_window {
            self.prices.pop_front();
        }
        self.prices.push_back(bar.price);

        let (Some(fast), Some(slow)) = (self.sma(self.fast_window), self.sma(self.slow_window))
        else {
            return Ok(Vec::new());
        };

        if fast > slow && !self.long {
            self.long = true;
            return Ok(vec![StrategySignal::enter_long()]);
        }
        if fast < slow && self.long {
            self.long = false;
            return Ok(vec![StrategySignal::Exit]);
        }
        Ok(Vec::new())
    }
}
