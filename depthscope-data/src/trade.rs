use crate::books::Side;
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::VecDeque, ops::Range};
use tracing::debug;

/// Normalised aggregated trade print. `time` is the exchange trade time in epoch millis.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Trade {
    pub price: Decimal,
    pub quantity: Decimal,
    pub time: u64,
    pub is_buyer_maker: bool,
}

impl Trade {
    /// Side of the aggressor. A taker buy is reported as [`Side::Bid`].
    pub fn aggressor(&self) -> Side {
        if self.is_buyer_maker {
            Side::Ask
        } else {
            Side::Bid
        }
    }

    pub fn is_taker_buy(&self) -> bool {
        !self.is_buyer_maker
    }
}

/// Time span of the chart the [`TradeLedger`] must keep populated.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct EvictionWindow {
    /// Currently visible time window.
    pub visible: Range<u64>,
    /// Open time of the live candle. Trades at or after it are never evicted.
    pub live_open: Option<u64>,
    /// Interval currently being backfilled.
    pub protected: Option<Range<u64>>,
}

impl EvictionWindow {
    fn retains(&self, time: u64) -> bool {
        let span = self.visible.end.saturating_sub(self.visible.start);
        let start = self.visible.start.saturating_sub(span);
        let end = self.visible.end.saturating_add(span);

        (start..end).contains(&time)
            || self.live_open.is_some_and(|live_open| time >= live_open)
            || self
                .protected
                .as_ref()
                .is_some_and(|protected| protected.contains(&time))
    }
}

/// Chronological store of historical and live trades backing the bubble overlay.
#[derive(Debug, Clone, Default)]
pub struct TradeLedger {
    trades: VecDeque<Trade>,
}

impl TradeLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn last_time(&self) -> Option<u64> {
        self.trades.back().map(|trade| trade.time)
    }

    /// Insert a trade keeping time order. In-order trades are pushed to the back.
    pub fn append(&mut self, trade: Trade) {
        match self.trades.back() {
            Some(last) if last.time > trade.time => {
                let index = self.trades.partition_point(|existing| existing.time <= trade.time);
                self.trades.insert(index, trade);
            }
            _ => self.trades.push_back(trade),
        }
    }

    /// Trades with `start <= time < end`, oldest first.
    pub fn trades_in_window(&self, start: u64, end: u64) -> impl Iterator<Item = &Trade> + '_ {
        let (lower, upper) = self.bounds(start, end);
        self.trades.range(lower..upper)
    }

    /// Replace everything held for `start..end` with `trades`, ignoring any that fall outside.
    ///
    /// Returns the number of trades stored for the window.
    pub fn replace_window(&mut self, start: u64, end: u64, trades: &[Trade]) -> usize {
        let (lower, upper) = self.bounds(start, end);
        let replaced = upper - lower;
        self.trades.drain(lower..upper);

        let mut incoming = trades
            .iter()
            .copied()
            .filter(|trade| (start..end).contains(&trade.time))
            .collect::<Vec<_>>();
        incoming.sort_by_key(|trade| trade.time);
        let stored = incoming.len();

        let tail = self.trades.split_off(lower);
        self.trades.extend(incoming);
        self.trades.extend(tail);

        debug!(start, end, replaced, stored, "trade ledger window replaced");
        stored
    }

    /// Drop every trade the [`EvictionWindow`] does not retain. Returns the number evicted.
    pub fn evict(&mut self, window: &EvictionWindow) -> usize {
        let before = self.trades.len();
        self.trades.retain(|trade| window.retains(trade.time));
        let evicted = before - self.trades.len();

        if evicted > 0 {
            debug!(evicted, remaining = self.trades.len(), "trade ledger evicted");
        }
        evicted
    }

    fn bounds(&self, start: u64, end: u64) -> (usize, usize) {
        let lower = self.trades.partition_point(|trade| trade.time < start);
        let upper = self.trades.partition_point(|trade| trade.time < end).max(lower);
        (lower, upper)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(time: u64) -> Trade {
        Trade::new(dec!(100), dec!(1), time, false)
    }

    fn times(ledger: &TradeLedger) -> Vec<u64> {
        ledger.trades.iter().map(|trade| trade.time).collect()
    }

    #[test]
    fn test_append_keeps_time_order() {
        let mut ledger = TradeLedger::new();
        for time in [10, 30, 20, 40, 5] {
            ledger.append(trade(time));
        }

        assert_eq!(times(&ledger), vec![5, 10, 20, 30, 40]);
    }

    #[test]
    fn test_trades_in_window_is_half_open() {
        let mut ledger = TradeLedger::new();
        for time in [0, 59_999, 60_000, 61_000] {
            ledger.append(trade(time));
        }

        let actual = ledger
            .trades_in_window(0, 60_000)
            .map(|trade| trade.time)
            .collect::<Vec<_>>();
        assert_eq!(actual, vec![0, 59_999]);
    }

    #[test]
    fn test_replace_window_is_idempotent() {
        let mut ledger = TradeLedger::new();
        for time in [1_000, 60_500, 120_100] {
            ledger.append(trade(time));
        }

        let backfill = vec![trade(60_200), trade(60_100), trade(130_000)];
        assert_eq!(ledger.replace_window(60_000, 120_000, &backfill), 2);
        let once = times(&ledger);

        ledger.replace_window(60_000, 120_000, &backfill);
        assert_eq!(times(&ledger), once);
        assert_eq!(once, vec![1_000, 60_100, 60_200, 120_100]);
    }

    #[test]
    fn test_evict_retains_buffer_live_and_protected() {
        let mut ledger = TradeLedger::new();
        for time in [0, 50, 100, 150, 250, 320, 400, 500] {
            ledger.append(trade(time));
        }

        let window = EvictionWindow {
            visible: 200..300,
            live_open: Some(480),
            protected: Some(40..60),
        };

        assert_eq!(ledger.evict(&window), 2);
        assert_eq!(times(&ledger), vec![50, 100, 150, 250, 320, 500]);
    }

    #[test]
    fn test_trade_aggressor() {
        assert_eq!(Trade::new(dec!(1), dec!(1), 0, false).aggressor(), Side::Bid);
        assert_eq!(Trade::new(dec!(1), dec!(1), 0, true).aggressor(), Side::Ask);
    }
}
