use crate::error::SyncError;
use derive_more::{Constructor, Display};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use smol_str::SmolStr;
use std::{
    cmp::Reverse,
    collections::{BTreeMap, btree_map},
    ops::RangeInclusive,
};
use tracing::debug;

/// Diff-depth synchronisation of an [`OrderBook`] against a REST snapshot.
pub mod sync;

/// Normalised price level. A zero `quantity` removes the level.
#[derive(
    Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Default, Deserialize, Serialize, Constructor,
)]
pub struct Level {
    pub price: Decimal,
    pub quantity: Decimal,
}

/// Side of the [`OrderBook`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Deserialize, Serialize, Display)]
pub enum Side {
    #[display("bid")]
    Bid,
    #[display("ask")]
    Ask,
}

/// Full order book state as returned by the REST depth endpoint.
#[derive(Debug, Clone, Eq, PartialEq, Default, Constructor)]
pub struct DepthSnapshot {
    pub last_update_id: u64,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

/// Incremental depth update covering the sequence `first_update_id..=final_update_id`.
///
/// Streams that skip update ids between frames (eg/ Binance USD-M futures) also carry the
/// `final_update_id` of the preceding frame, which then defines continuity.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct DepthDiff {
    pub first_update_id: u64,
    pub final_update_id: u64,
    pub prev_final_update_id: Option<u64>,
    pub bids: Vec<Level>,
    pub asks: Vec<Level>,
}

impl DepthDiff {
    pub fn new(first_update_id: u64, final_update_id: u64, bids: Vec<Level>, asks: Vec<Level>) -> Self {
        Self {
            first_update_id,
            final_update_id,
            prev_final_update_id: None,
            bids,
            asks,
        }
    }

    pub fn with_prev_final_update_id(mut self, prev_final_update_id: u64) -> Self {
        self.prev_final_update_id = Some(prev_final_update_id);
        self
    }
}

/// One point of a cumulative depth curve.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Constructor)]
pub struct DepthPoint {
    pub price: Decimal,
    pub cumulative_quantity: Decimal,
}

/// Sorted bid/ask ladder for a single symbol.
///
/// Bids are keyed by [`Reverse`] price so both sides iterate best price first. Zero quantity
/// levels are never stored.
#[derive(Debug, Clone, Eq, PartialEq, Default)]
pub struct OrderBook {
    symbol: SmolStr,
    last_update_id: u64,
    /// Set once a diff has been applied on top of the current snapshot.
    chained: bool,
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    asks: BTreeMap<Decimal, Decimal>,
}

impl OrderBook {
    pub fn new(symbol: impl Into<SmolStr>) -> Self {
        Self {
            symbol: symbol.into(),
            ..Default::default()
        }
    }

    pub fn symbol(&self) -> &SmolStr {
        &self.symbol
    }

    pub fn last_update_id(&self) -> u64 {
        self.last_update_id
    }

    /// Replace both sides of the book with the provided snapshot.
    pub fn apply_snapshot(&mut self, snapshot: DepthSnapshot) {
        let DepthSnapshot {
            last_update_id,
            bids,
            asks,
        } = snapshot;

        self.bids = bids
            .into_iter()
            .filter(|level| !level.quantity.is_zero())
            .map(|level| (Reverse(level.price), level.quantity))
            .collect();

        self.asks = asks
            .into_iter()
            .filter(|level| !level.quantity.is_zero())
            .map(|level| (level.price, level.quantity))
            .collect();

        self.last_update_id = last_update_id;
        self.chained = false;
    }

    /// Apply a [`DepthDiff`], upserting or removing each changed level.
    ///
    /// Sequencing is validated before any level is touched, so a rejected diff leaves the book
    /// unchanged. The first diff over a snapshot must bridge it (`first_update_id <= last + 1`).
    /// After that, a diff carrying `prev_final_update_id` must chain onto the last applied diff
    /// exactly, while one without it falls back to the bridging rule.
    pub fn apply_diff(&mut self, diff: &DepthDiff) -> Result<(), SyncError> {
        if diff.final_update_id <= self.last_update_id {
            return Err(SyncError::StaleDiff {
                final_update_id: diff.final_update_id,
                last_update_id: self.last_update_id,
            });
        }

        let gap = match diff.prev_final_update_id {
            Some(prev_final_update_id) if self.chained => prev_final_update_id != self.last_update_id,
            _ => diff.first_update_id > self.last_update_id.saturating_add(1),
        };

        if gap {
            return Err(SyncError::Gap {
                first_update_id: diff.first_update_id,
                last_update_id: self.last_update_id,
            });
        }

        for level in &diff.bids {
            if level.quantity.is_zero() {
                self.bids.remove(&Reverse(level.price));
            } else {
                self.bids.insert(Reverse(level.price), level.quantity);
            }
        }

        for level in &diff.asks {
            if level.quantity.is_zero() {
                self.asks.remove(&level.price);
            } else {
                self.asks.insert(level.price, level.quantity);
            }
        }

        self.last_update_id = diff.final_update_id;
        self.chained = true;
        Ok(())
    }

    /// Lazily accumulate quantity from the best price outward on `side`, emitting only the
    /// points whose price falls inside `range`.
    pub fn cumulative_depth(&self, side: Side, range: RangeInclusive<Decimal>) -> CumulativeDepth<'_> {
        let levels = match side {
            Side::Bid => LevelIter::Bids(self.bids.iter()),
            Side::Ask => LevelIter::Asks(self.asks.iter()),
        };

        if range.start() > range.end() {
            debug!(symbol = %self.symbol, %side, "cumulative depth requested for an empty range");
        }

        CumulativeDepth {
            levels,
            side,
            low: *range.start(),
            high: *range.end(),
            total: Decimal::ZERO,
            done: false,
        }
    }

    /// Iterate bids best (highest) price first.
    pub fn bids(&self) -> impl Iterator<Item = Level> + '_ {
        self.bids
            .iter()
            .map(|(Reverse(price), quantity)| Level::new(*price, *quantity))
    }

    /// Iterate asks best (lowest) price first.
    pub fn asks(&self) -> impl Iterator<Item = Level> + '_ {
        self.asks
            .iter()
            .map(|(price, quantity)| Level::new(*price, *quantity))
    }

    pub fn best_bid(&self) -> Option<Level> {
        self.bids().next()
    }

    pub fn best_ask(&self) -> Option<Level> {
        self.asks().next()
    }

    pub fn mid_price(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some((bid.price + ask.price) / Decimal::TWO),
            _ => None,
        }
    }

    pub fn spread(&self) -> Option<Decimal> {
        match (self.best_bid(), self.best_ask()) {
            (Some(bid), Some(ask)) => Some(ask.price - bid.price),
            _ => None,
        }
    }

    pub fn level_count(&self, side: Side) -> usize {
        match side {
            Side::Bid => self.bids.len(),
            Side::Ask => self.asks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bids.is_empty() && self.asks.is_empty()
    }
}

#[derive(Debug, Clone)]
enum LevelIter<'a> {
    Bids(btree_map::Iter<'a, Reverse<Decimal>, Decimal>),
    Asks(btree_map::Iter<'a, Decimal, Decimal>),
}

impl Iterator for LevelIter<'_> {
    type Item = (Decimal, Decimal);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            LevelIter::Bids(iter) => iter.next().map(|(Reverse(price), qty)| (*price, *qty)),
            LevelIter::Asks(iter) => iter.next().map(|(price, qty)| (*price, *qty)),
        }
    }
}

/// Lazy cumulative depth curve produced by [`OrderBook::cumulative_depth`].
///
/// A clone taken before iteration replays the same curve, so a renderer can walk it twice.
#[derive(Debug, Clone)]
pub struct CumulativeDepth<'a> {
    levels: LevelIter<'a>,
    side: Side,
    low: Decimal,
    high: Decimal,
    total: Decimal,
    done: bool,
}

impl Iterator for CumulativeDepth<'_> {
    type Item = DepthPoint;

    fn next(&mut self) -> Option<Self::Item> {
        while !self.done {
            let Some((price, quantity)) = self.levels.next() else {
                self.done = true;
                break;
            };

            let (before_range, past_range) = match self.side {
                Side::Bid => (price > self.high, price < self.low),
                Side::Ask => (price < self.low, price > self.high),
            };

            if past_range {
                self.done = true;
                break;
            }

            self.total += quantity;

            if !before_range {
                return Some(DepthPoint::new(price, self.total));
            }
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn book(last_update_id: u64, bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> OrderBook {
        let mut book = OrderBook::new("BTCUSDT");
        book.apply_snapshot(DepthSnapshot::new(
            last_update_id,
            bids.iter().map(|(p, q)| Level::new(*p, *q)).collect(),
            asks.iter().map(|(p, q)| Level::new(*p, *q)).collect(),
        ));
        book
    }

    #[test]
    fn test_apply_snapshot_drops_zero_quantity_levels() {
        let book = book(
            10,
            &[(dec!(100), dec!(5)), (dec!(99), dec!(0))],
            &[(dec!(101), dec!(0)), (dec!(102), dec!(3))],
        );

        assert_eq!(book.last_update_id(), 10);
        assert_eq!(book.level_count(Side::Bid), 1);
        assert_eq!(book.level_count(Side::Ask), 1);
        assert_eq!(book.best_ask(), Some(Level::new(dec!(102), dec!(3))));
    }

    #[test]
    fn test_apply_diff_removes_and_upserts() {
        let mut book = book(100, &[(dec!(100), dec!(5))], &[(dec!(101), dec!(3))]);

        let diff = DepthDiff::new(
            99,
            102,
            vec![Level::new(dec!(100), dec!(0))],
            vec![Level::new(dec!(102), dec!(1))],
        );

        book.apply_diff(&diff).unwrap();

        assert_eq!(book.bids().count(), 0);
        assert_eq!(
            book.asks().collect::<Vec<_>>(),
            vec![Level::new(dec!(101), dec!(3)), Level::new(dec!(102), dec!(1))]
        );
        assert_eq!(book.last_update_id(), 102);
    }

    #[test]
    fn test_apply_diff_sequencing() {
        struct TestCase {
            input: DepthDiff,
            expected: Result<(), SyncError>,
        }

        let tests = vec![
            TestCase {
                // TC0: contiguous diff applies
                input: DepthDiff::new(101, 103, vec![Level::new(dec!(99), dec!(1))], vec![]),
                expected: Ok(()),
            },
            TestCase {
                // TC1: diff overlapping the book applies
                input: DepthDiff::new(95, 101, vec![Level::new(dec!(99), dec!(1))], vec![]),
                expected: Ok(()),
            },
            TestCase {
                // TC2: diff ending at the book id is stale
                input: DepthDiff::new(90, 100, vec![Level::new(dec!(99), dec!(1))], vec![]),
                expected: Err(SyncError::StaleDiff {
                    final_update_id: 100,
                    last_update_id: 100,
                }),
            },
            TestCase {
                // TC3: diff starting beyond last + 1 is a gap
                input: DepthDiff::new(105, 110, vec![Level::new(dec!(99), dec!(1))], vec![]),
                expected: Err(SyncError::Gap {
                    first_update_id: 105,
                    last_update_id: 100,
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut book = book(100, &[(dec!(100), dec!(5))], &[(dec!(101), dec!(3))]);
            let before = book.clone();

            let actual = book.apply_diff(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);

            if actual.is_err() {
                assert_eq!(book, before, "TC{} mutated the book", index);
            }
        }
    }

    #[test]
    fn test_apply_diff_chains_on_prev_final_update_id() {
        struct TestCase {
            input: DepthDiff,
            expected: Result<(), SyncError>,
        }

        let tests = vec![
            TestCase {
                // TC0: ids jump but pu matches the last applied diff
                input: DepthDiff::new(157, 160, vec![Level::new(dec!(99), dec!(1))], vec![])
                    .with_prev_final_update_id(151),
                expected: Ok(()),
            },
            TestCase {
                // TC1: pu does not match, a frame was lost
                input: DepthDiff::new(157, 160, vec![Level::new(dec!(99), dec!(1))], vec![])
                    .with_prev_final_update_id(149),
                expected: Err(SyncError::Gap {
                    first_update_id: 157,
                    last_update_id: 151,
                }),
            },
            TestCase {
                // TC2: contiguous ids but pu does not match
                input: DepthDiff::new(152, 155, vec![Level::new(dec!(99), dec!(1))], vec![])
                    .with_prev_final_update_id(150),
                expected: Err(SyncError::Gap {
                    first_update_id: 152,
                    last_update_id: 151,
                }),
            },
            TestCase {
                // TC3: no pu falls back to the id rule
                input: DepthDiff::new(157, 160, vec![Level::new(dec!(99), dec!(1))], vec![]),
                expected: Err(SyncError::Gap {
                    first_update_id: 157,
                    last_update_id: 151,
                }),
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let mut book = book(150, &[(dec!(100), dec!(5))], &[]);
            book.apply_diff(&DepthDiff::new(140, 151, vec![], vec![]).with_prev_final_update_id(139))
                .unwrap();
            let before = book.clone();

            let actual = book.apply_diff(&test.input);
            assert_eq!(actual, test.expected, "TC{} failed", index);

            if actual.is_err() {
                assert_eq!(book, before, "TC{} mutated the book", index);
            }
        }
    }

    #[test]
    fn test_bridging_diff_ignores_prev_final_update_id() {
        // pu of the first diff over a snapshot predates the snapshot
        let mut book = book(150, &[], &[]);
        let diff = DepthDiff::new(140, 151, vec![Level::new(dec!(99), dec!(1))], vec![])
            .with_prev_final_update_id(139);

        assert_eq!(book.apply_diff(&diff), Ok(()));
        assert_eq!(book.last_update_id(), 151);

        // A fresh snapshot resets the chain
        book.apply_snapshot(DepthSnapshot::new(200, vec![], vec![]));
        let diff = DepthDiff::new(195, 205, vec![], vec![]).with_prev_final_update_id(190);
        assert_eq!(book.apply_diff(&diff), Ok(()));
    }

    #[test]
    fn test_gapless_replay_yields_replayed_levels() {
        let mut book = book(10, &[], &[]);

        for (id, price) in (11..=20).zip(1..) {
            let diff = DepthDiff::new(
                id,
                id,
                vec![Level::new(Decimal::from(price), dec!(1))],
                vec![Level::new(Decimal::from(100 + price), dec!(2))],
            );
            book.apply_diff(&diff).unwrap();
        }

        assert_eq!(book.last_update_id(), 20);
        assert_eq!(book.level_count(Side::Bid), 10);
        assert_eq!(book.level_count(Side::Ask), 10);
        assert_eq!(book.best_bid(), Some(Level::new(dec!(10), dec!(1))));
        assert_eq!(book.best_ask(), Some(Level::new(dec!(101), dec!(2))));
    }

    #[test]
    fn test_cumulative_depth_accumulates_outside_range_but_only_emits_inside() {
        let book = book(
            1,
            &[
                (dec!(100), dec!(1)),
                (dec!(99), dec!(2)),
                (dec!(98), dec!(3)),
                (dec!(97), dec!(4)),
            ],
            &[(dec!(101), dec!(1)), (dec!(102), dec!(1)), (dec!(103), dec!(5))],
        );

        let bids = book
            .cumulative_depth(Side::Bid, dec!(98)..=dec!(99))
            .collect::<Vec<_>>();
        assert_eq!(
            bids,
            vec![
                DepthPoint::new(dec!(99), dec!(3)),
                DepthPoint::new(dec!(98), dec!(6)),
            ]
        );

        let asks = book
            .cumulative_depth(Side::Ask, dec!(100)..=dec!(102))
            .collect::<Vec<_>>();
        assert_eq!(
            asks,
            vec![
                DepthPoint::new(dec!(101), dec!(1)),
                DepthPoint::new(dec!(102), dec!(2)),
            ]
        );
    }

    #[test]
    fn test_cumulative_depth_is_monotonic_and_restartable() {
        let book = book(
            1,
            &[(dec!(10), dec!(1)), (dec!(9), dec!(0.5)), (dec!(8), dec!(2))],
            &[],
        );

        let depth = book.cumulative_depth(Side::Bid, dec!(0)..=dec!(20));
        let first = depth.clone().collect::<Vec<_>>();
        let second = depth.collect::<Vec<_>>();

        assert_eq!(first, second);
        assert!(
            first
                .windows(2)
                .all(|pair| pair[0].cumulative_quantity <= pair[1].cumulative_quantity)
        );
    }

    #[test]
    fn test_mid_price_and_spread() {
        let book = book(1, &[(dec!(100), dec!(1))], &[(dec!(101), dec!(1))]);
        assert_eq!(book.mid_price(), Some(dec!(100.5)));
        assert_eq!(book.spread(), Some(dec!(1)));
        assert_eq!(OrderBook::new("ETHUSDT").mid_price(), None);
    }
}
