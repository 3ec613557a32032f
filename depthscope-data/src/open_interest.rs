use derive_more::Constructor;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, ops::Range};

/// Normalised open interest reading. `time` is epoch millis.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, Deserialize, Serialize, Constructor)]
pub struct OpenInterestPoint {
    pub time: u64,
    pub open_interest: Decimal,
}

/// Time series of open interest readings for the indicator pane. Later readings for the same
/// timestamp replace earlier ones.
#[derive(Debug, Clone, Default)]
pub struct OpenInterestSeries {
    points: BTreeMap<u64, Decimal>,
}

impl OpenInterestSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&mut self, point: OpenInterestPoint) {
        self.points.insert(point.time, point.open_interest);
    }

    pub fn extend(&mut self, points: impl IntoIterator<Item = OpenInterestPoint>) {
        points.into_iter().for_each(|point| self.upsert(point));
    }

    pub fn latest(&self) -> Option<OpenInterestPoint> {
        self.points
            .iter()
            .next_back()
            .map(|(time, open_interest)| OpenInterestPoint::new(*time, *open_interest))
    }

    /// Readings inside `range`, oldest first, plus the last reading before it so a line can be
    /// drawn from the left edge.
    pub fn points_in(&self, range: Range<u64>) -> Vec<OpenInterestPoint> {
        let end = range.end.max(range.start);
        let before = self.points.range(..range.start).next_back();

        before
            .into_iter()
            .chain(self.points.range(range.start..end))
            .map(|(time, open_interest)| OpenInterestPoint::new(*time, *open_interest))
            .collect()
    }

    /// Drop readings older than `time`, keeping the last one before it.
    pub fn prune_before(&mut self, time: u64) {
        let Some((&anchor, _)) = self.points.range(..time).next_back() else {
            return;
        };
        self.points = self.points.split_off(&anchor);
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn series() -> OpenInterestSeries {
        let mut series = OpenInterestSeries::new();
        series.extend([
            OpenInterestPoint::new(0, dec!(100)),
            OpenInterestPoint::new(300_000, dec!(110)),
            OpenInterestPoint::new(600_000, dec!(105)),
        ]);
        series
    }

    #[test]
    fn test_upsert_replaces_same_timestamp() {
        let mut series = series();
        series.upsert(OpenInterestPoint::new(600_000, dec!(120)));

        assert_eq!(series.len(), 3);
        assert_eq!(series.latest(), Some(OpenInterestPoint::new(600_000, dec!(120))));
    }

    #[test]
    fn test_points_in_includes_left_anchor() {
        let actual = series().points_in(400_000..700_000);
        assert_eq!(
            actual,
            vec![
                OpenInterestPoint::new(300_000, dec!(110)),
                OpenInterestPoint::new(600_000, dec!(105)),
            ]
        );
    }

    #[test]
    fn test_prune_before_keeps_anchor() {
        let mut series = series();
        series.prune_before(400_000);
        assert_eq!(series.len(), 2);
        assert_eq!(series.points_in(0..u64::MAX).first().map(|point| point.time), Some(300_000));
    }
}
