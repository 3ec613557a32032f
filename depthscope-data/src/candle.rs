//! One-minute OHLCV candles built from kline seeds, live trades and historical trade backfill.
//!
//! Interval boundaries come from trade timestamps, never the wall clock, so backfilled and live
//! prints land in the same candle.

use crate::{error::DataError, trade::Trade};
use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::Range};
use tracing::debug;

/// Candle interval in milliseconds (1 minute).
pub const KLINE_INTERVAL_MS: u64 = 60_000;

/// OHLCV candle. `close_time` is exclusive: `close_time == open_time + interval`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct Candle {
    pub open_time: u64,
    pub close_time: u64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    /// Taker buy volume. `volume - buy_volume` is the taker sell volume.
    pub buy_volume: Decimal,
}

impl Candle {
    /// Candle opened by its first print.
    pub fn opened_by(trade: &Trade, open_time: u64, interval_ms: u64) -> Self {
        Self {
            open_time,
            close_time: open_time + interval_ms,
            open: trade.price,
            high: trade.price,
            low: trade.price,
            close: trade.price,
            volume: trade.quantity,
            buy_volume: if trade.is_taker_buy() {
                trade.quantity
            } else {
                Decimal::ZERO
            },
        }
    }

    /// Zero volume candle carrying `price` forward across an interval with no trades.
    pub fn flat(price: Decimal, open_time: u64, interval_ms: u64) -> Self {
        Self {
            open_time,
            close_time: open_time + interval_ms,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ZERO,
            buy_volume: Decimal::ZERO,
        }
    }

    pub fn sell_volume(&self) -> Decimal {
        self.volume - self.buy_volume
    }

    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    fn update(&mut self, trade: &Trade) {
        self.high = self.high.max(trade.price);
        self.low = self.low.min(trade.price);
        self.close = trade.price;
        self.volume += trade.quantity;
        if trade.is_taker_buy() {
            self.buy_volume += trade.quantity;
        }
    }
}

/// Gapless sequence of candles keyed by open time. The last candle is live, every earlier one
/// is sealed.
#[derive(Debug, Clone)]
pub struct CandleAggregator {
    interval_ms: u64,
    candles: BTreeMap<u64, Candle>,
}

impl Default for CandleAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl CandleAggregator {
    pub fn new() -> Self {
        Self::with_interval(KLINE_INTERVAL_MS)
    }

    pub fn with_interval(interval_ms: u64) -> Self {
        Self {
            interval_ms: interval_ms.max(1),
            candles: BTreeMap::new(),
        }
    }

    pub fn interval_ms(&self) -> u64 {
        self.interval_ms
    }

    /// Align a timestamp to its interval open time.
    #[inline]
    pub fn align(&self, time: u64) -> u64 {
        time - time % self.interval_ms
    }

    /// Replace the sequence with historical candles.
    ///
    /// Candles opened by live trades after the last seeded interval are kept, and holes are
    /// filled with flat candles.
    pub fn seed(&mut self, candles: impl IntoIterator<Item = Candle>) {
        let interval_ms = self.interval_ms;
        let mut seeded = candles
            .into_iter()
            .map(|candle| {
                let open_time = self.align(candle.open_time);
                (
                    open_time,
                    Candle {
                        open_time,
                        close_time: open_time + interval_ms,
                        ..candle
                    },
                )
            })
            .collect::<BTreeMap<_, _>>();

        if let Some(&last_seeded) = seeded.keys().next_back() {
            let newer = self.candles.split_off(&(last_seeded + 1));
            seeded.extend(newer);
        }

        self.candles = seeded;
        self.fill_gaps();

        debug!(
            candles = self.candles.len(),
            first = ?self.candles.keys().next(),
            last = ?self.candles.keys().next_back(),
            "candles seeded"
        );
    }

    /// Fold a live trade into the sequence.
    ///
    /// Returns the open time of the candle sealed by this trade, if it opened a new interval.
    pub fn ingest_trade(&mut self, trade: &Trade) -> Result<Option<u64>, DataError> {
        let open_time = self.align(trade.time);

        let Some(mut live) = self.candles.last_entry() else {
            self.candles
                .insert(open_time, Candle::opened_by(trade, open_time, self.interval_ms));
            return Ok(None);
        };

        let live_open = *live.key();
        if open_time == live_open {
            live.get_mut().update(trade);
            return Ok(None);
        }

        if open_time < live_open {
            return Err(DataError::SealedInterval { open_time });
        }

        let carried = live.get().close;
        let mut gap_open = live_open + self.interval_ms;
        while gap_open < open_time {
            self.candles
                .insert(gap_open, Candle::flat(carried, gap_open, self.interval_ms));
            gap_open += self.interval_ms;
        }

        self.candles
            .insert(open_time, Candle::opened_by(trade, open_time, self.interval_ms));

        Ok(Some(live_open))
    }

    /// Recompute the sealed candle opening at `window_start` from its historical trades.
    ///
    /// The result does not depend on the order of `trades`: prints are ranked by
    /// `(time, price, quantity)` before open and close are taken. An empty trade set leaves the
    /// candle unchanged.
    pub fn ingest_historical_trades(
        &mut self,
        trades: &[Trade],
        window_start: u64,
    ) -> Result<(), DataError> {
        let live_open = self
            .live()
            .map(|candle| candle.open_time)
            .ok_or(DataError::UnknownInterval { window_start })?;

        if window_start == live_open {
            return Err(DataError::LiveInterval {
                open_time: window_start,
            });
        }

        let window_end = window_start + self.interval_ms;
        let candle = self
            .candles
            .get_mut(&window_start)
            .ok_or(DataError::UnknownInterval { window_start })?;

        let mut prints = trades
            .iter()
            .filter(|trade| (window_start..window_end).contains(&trade.time))
            .collect::<Vec<_>>();

        if prints.is_empty() {
            debug!(window_start, "historical trade window empty, candle unchanged");
            return Ok(());
        }

        prints.sort_by(|a, b| {
            (a.time, a.price, a.quantity).cmp(&(b.time, b.price, b.quantity))
        });

        let mut recomputed = Candle::opened_by(prints[0], window_start, self.interval_ms);
        for trade in &prints[1..] {
            recomputed.update(trade);
        }

        *candle = recomputed;
        Ok(())
    }

    /// The live (last) candle.
    pub fn live(&self) -> Option<&Candle> {
        self.candles.values().next_back()
    }

    pub fn get(&self, open_time: u64) -> Option<&Candle> {
        self.candles.get(&open_time)
    }

    pub fn is_sealed(&self, open_time: u64) -> bool {
        self.live()
            .is_some_and(|live| open_time < live.open_time && self.candles.contains_key(&open_time))
    }

    /// Ascending open times of every candle.
    pub fn open_times(&self) -> Vec<u64> {
        self.candles.keys().copied().collect()
    }

    /// Candles opening inside `range`, oldest first.
    pub fn candles_in(&self, range: Range<u64>) -> impl DoubleEndedIterator<Item = &Candle> + '_ {
        let start = self.align(range.start);
        let end = range.end.max(start);
        self.candles.range(start..end).map(|(_, candle)| candle)
    }

    pub fn candles(&self) -> impl DoubleEndedIterator<Item = &Candle> + '_ {
        self.candles.values()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    fn fill_gaps(&mut self) {
        let mut flats = Vec::new();
        let mut previous: Option<&Candle> = None;

        for candle in self.candles.values() {
            if let Some(prior) = previous {
                let mut gap_open = prior.close_time;
                while gap_open < candle.open_time {
                    flats.push(Candle::flat(prior.close, gap_open, self.interval_ms));
                    gap_open += self.interval_ms;
                }
            }
            previous = Some(candle);
        }

        self.candles
            .extend(flats.into_iter().map(|candle| (candle.open_time, candle)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn trade(price: Decimal, quantity: Decimal, time: u64) -> Trade {
        Trade::new(price, quantity, time, false)
    }

    fn kline(open_time: u64, close: Decimal) -> Candle {
        Candle::new(
            open_time,
            open_time + 59_999,
            close,
            close,
            close,
            close,
            dec!(1),
            dec!(0.5),
        )
    }

    fn assert_gapless(aggregator: &CandleAggregator) {
        let candles = aggregator.candles().collect::<Vec<_>>();
        assert!(
            candles
                .windows(2)
                .all(|pair| pair[1].open_time == pair[0].close_time),
            "sequence has gaps: {:?}",
            aggregator.open_times()
        );
    }

    #[test]
    fn test_trades_in_one_interval_build_ohlcv() {
        let mut aggregator = CandleAggregator::new();

        for (price, time) in [(dec!(10), 0), (dec!(12), 30_000), (dec!(11), 59_999)] {
            assert_eq!(aggregator.ingest_trade(&trade(price, dec!(1), time)), Ok(None));
        }

        let live = aggregator.live().unwrap();
        assert_eq!(live.open, dec!(10));
        assert_eq!(live.high, dec!(12));
        assert_eq!(live.low, dec!(10));
        assert_eq!(live.close, dec!(11));
        assert_eq!(live.volume, dec!(3));
        assert_eq!(live.close_time, 60_000);
    }

    #[test]
    fn test_later_trade_seals_and_fills_gaps() {
        let mut aggregator = CandleAggregator::new();
        aggregator.ingest_trade(&trade(dec!(10), dec!(1), 1_000)).unwrap();

        let sealed = aggregator
            .ingest_trade(&trade(dec!(15), dec!(2), 185_000))
            .unwrap();

        assert_eq!(sealed, Some(0));
        assert_eq!(aggregator.open_times(), vec![0, 60_000, 120_000, 180_000]);
        assert_eq!(aggregator.get(60_000), Some(&Candle::flat(dec!(10), 60_000, 60_000)));
        assert_eq!(aggregator.live().unwrap().open, dec!(15));
        assert!(aggregator.is_sealed(0));
        assert!(!aggregator.is_sealed(180_000));
        assert_gapless(&aggregator);
    }

    #[test]
    fn test_trade_for_sealed_interval_is_rejected() {
        let mut aggregator = CandleAggregator::new();
        aggregator.ingest_trade(&trade(dec!(10), dec!(1), 61_000)).unwrap();

        let actual = aggregator.ingest_trade(&trade(dec!(9), dec!(1), 1_000));
        assert_eq!(actual, Err(DataError::SealedInterval { open_time: 0 }));
        assert_eq!(aggregator.live().unwrap().low, dec!(10));
    }

    #[test]
    fn test_seed_normalises_close_time_and_fills_holes() {
        let mut aggregator = CandleAggregator::new();
        aggregator.seed(vec![kline(0, dec!(1)), kline(180_000, dec!(2))]);

        assert_eq!(aggregator.open_times(), vec![0, 60_000, 120_000, 180_000]);
        assert_eq!(aggregator.get(0).unwrap().close_time, 60_000);
        assert_eq!(aggregator.get(120_000).unwrap().close, dec!(1));
        assert_gapless(&aggregator);
    }

    #[test]
    fn test_seed_keeps_newer_live_candles() {
        let mut aggregator = CandleAggregator::new();
        aggregator.ingest_trade(&trade(dec!(5), dec!(1), 125_000)).unwrap();

        aggregator.seed(vec![kline(0, dec!(4)), kline(60_000, dec!(4))]);

        assert_eq!(aggregator.open_times(), vec![0, 60_000, 120_000]);
        assert_eq!(aggregator.live().unwrap().close, dec!(5));
    }

    #[test]
    fn test_historical_trades_are_permutation_independent() {
        let trades = vec![
            trade(dec!(10), dec!(1), 60_000),
            trade(dec!(13), dec!(2), 70_000),
            trade(dec!(9), dec!(0.5), 80_000),
            trade(dec!(11), dec!(1), 80_000),
            trade(dec!(12), dec!(3), 119_999),
            // Outside the window
            trade(dec!(99), dec!(1), 120_000),
        ];

        let mut reversed = trades.clone();
        reversed.reverse();
        let mut rotated = trades.clone();
        rotated.rotate_left(2);

        let recompute = |input: &[Trade]| {
            let mut aggregator = CandleAggregator::new();
            aggregator.seed(vec![kline(0, dec!(1)), kline(60_000, dec!(1)), kline(120_000, dec!(1))]);
            aggregator.ingest_historical_trades(input, 60_000).unwrap();
            *aggregator.get(60_000).unwrap()
        };

        let expected = recompute(&trades);
        assert_eq!(expected.open, dec!(10));
        assert_eq!(expected.high, dec!(13));
        assert_eq!(expected.low, dec!(9));
        assert_eq!(expected.close, dec!(12));
        assert_eq!(expected.volume, dec!(7.5));
        assert_eq!(recompute(&reversed), expected);
        assert_eq!(recompute(&rotated), expected);

        // Idempotent
        let mut aggregator = CandleAggregator::new();
        aggregator.seed(vec![kline(60_000, dec!(1)), kline(120_000, dec!(1))]);
        aggregator.ingest_historical_trades(&trades, 60_000).unwrap();
        aggregator.ingest_historical_trades(&reversed, 60_000).unwrap();
        assert_eq!(aggregator.get(60_000), Some(&expected));
    }

    #[test]
    fn test_historical_trades_targeting() {
        struct TestCase {
            window_start: u64,
            trades: Vec<Trade>,
            expected: Result<(), DataError>,
        }

        let tests = vec![
            TestCase {
                // TC0: live interval cannot be recomputed
                window_start: 120_000,
                trades: vec![trade(dec!(1), dec!(1), 120_001)],
                expected: Err(DataError::LiveInterval { open_time: 120_000 }),
            },
            TestCase {
                // TC1: interval outside the sequence
                window_start: 600_000,
                trades: vec![],
                expected: Err(DataError::UnknownInterval {
                    window_start: 600_000,
                }),
            },
            TestCase {
                // TC2: empty set leaves the sealed candle unchanged
                window_start: 0,
                trades: vec![],
                expected: Ok(()),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut aggregator = CandleAggregator::new();
            aggregator.seed(vec![kline(0, dec!(7)), kline(60_000, dec!(7)), kline(120_000, dec!(7))]);
            let before = aggregator.get(0).copied();

            let actual = aggregator.ingest_historical_trades(&test.trades, test.window_start);
            assert_eq!(actual, test.expected, "TC{} failed", index);
            assert_eq!(aggregator.get(0).copied(), before, "TC{} mutated candle", index);
        }
    }
}
