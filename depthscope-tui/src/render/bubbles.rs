use crate::viewport::quantize;
use depthscope_data::{books::Side, trade::Trade};
use fnv::FnvHashMap;
use itertools::Itertools;
use rust_decimal::{Decimal, prelude::ToPrimitive};

/// Trades of one candle interval summed by quantized price and aggressor side.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Bubble {
    pub open_time: u64,
    pub price: Decimal,
    pub aggressor: Side,
    pub quantity: Decimal,
}

impl Bubble {
    pub fn is_taker_buy(&self) -> bool {
        self.aggressor == Side::Bid
    }
}

/// Group `trades` per candle interval, quantized price and aggressor side, ordered by interval
/// then price.
pub fn group_trades<'a>(
    trades: impl IntoIterator<Item = &'a Trade>,
    interval_ms: u64,
    tick_size: Decimal,
) -> Vec<Bubble> {
    let interval_ms = interval_ms.max(1);
    let mut groups = FnvHashMap::<(u64, Decimal, Side), Decimal>::default();

    for trade in trades {
        let open_time = trade.time - trade.time % interval_ms;
        let price = quantize(trade.price, tick_size);
        *groups
            .entry((open_time, price, trade.aggressor()))
            .or_default() += trade.quantity;
    }

    groups
        .into_iter()
        .map(|((open_time, price, aggressor), quantity)| Bubble {
            open_time,
            price,
            aggressor,
            quantity,
        })
        .sorted_by_key(|bubble| (bubble.open_time, bubble.price, bubble.aggressor))
        .collect()
}

pub fn max_quantity(bubbles: &[Bubble]) -> Decimal {
    bubbles
        .iter()
        .map(|bubble| bubble.quantity)
        .max()
        .unwrap_or_default()
}

/// Radius proportional to the square root of the quantity, so bubble area tracks volume.
pub fn radius(quantity: Decimal, max_quantity: Decimal, max_radius: f64) -> f64 {
    if max_quantity <= Decimal::ZERO {
        return 0.0;
    }
    let ratio = (quantity / max_quantity).to_f64().unwrap_or_default().max(0.0);
    ratio.sqrt() * max_radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_group_trades() {
        let trades = vec![
            Trade::new(dec!(100.04), dec!(1), 1_000, false),
            Trade::new(dec!(99.96), dec!(2), 2_000, false),
            Trade::new(dec!(100.02), dec!(5), 3_000, true),
            Trade::new(dec!(100.01), dec!(1), 61_000, false),
        ];

        let bubbles = group_trades(&trades, 60_000, dec!(0.1));

        assert_eq!(
            bubbles,
            vec![
                Bubble {
                    open_time: 0,
                    price: dec!(100.0),
                    aggressor: Side::Bid,
                    quantity: dec!(3),
                },
                Bubble {
                    open_time: 0,
                    price: dec!(100.0),
                    aggressor: Side::Ask,
                    quantity: dec!(5),
                },
                Bubble {
                    open_time: 60_000,
                    price: dec!(100.0),
                    aggressor: Side::Bid,
                    quantity: dec!(1),
                },
            ]
        );
        assert_eq!(max_quantity(&bubbles), dec!(5));
    }

    #[test]
    fn test_radius() {
        struct TestCase {
            quantity: Decimal,
            max: Decimal,
            expected: f64,
        }

        let tests = vec![
            TestCase {
                // TC0: largest bubble gets the full radius
                quantity: dec!(4),
                max: dec!(4),
                expected: 10.0,
            },
            TestCase {
                // TC1: quarter of the volume, half the radius
                quantity: dec!(1),
                max: dec!(4),
                expected: 5.0,
            },
            TestCase {
                // TC2: no volume at all
                quantity: dec!(0),
                max: dec!(0),
                expected: 0.0,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = radius(test.quantity, test.max, 10.0);
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }
}
