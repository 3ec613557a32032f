use crate::session::Generation;
use thiserror::Error;

/// Sequencing failures raised when a depth diff cannot be applied to an
/// [`OrderBook`](crate::books::OrderBook).
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Error)]
pub enum SyncError {
    /// Diff is entirely covered by the book already and must be skipped.
    #[error(
        "StaleDiff: final_update_id {final_update_id} is not beyond book last_update_id {last_update_id}"
    )]
    StaleDiff {
        final_update_id: u64,
        last_update_id: u64,
    },

    /// Updates between the book and the diff were lost.
    #[error(
        "\
        Gap: first_update_id {first_update_id} does not follow on from the \
        book last_update_id {last_update_id} \
    "
    )]
    Gap {
        first_update_id: u64,
        last_update_id: u64,
    },
}

impl SyncError {
    /// Determine if an error requires the order book to be re-initialised from a fresh snapshot.
    pub fn requires_resync(&self) -> bool {
        matches!(self, SyncError::Gap { .. })
    }
}

/// All errors generated in `depthscope-data`.
#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum DataError {
    #[error("malformed payload: {0}")]
    MalformedPayload(String),

    #[error("result for generation {received} arrived while generation {active} is active")]
    SymbolMismatch {
        active: Generation,
        received: Generation,
    },

    #[error("no active symbol")]
    NoActiveSymbol,

    #[error("order book sequencing: {0}")]
    Sync(#[from] SyncError),

    #[error("trade belongs to sealed interval opening at {open_time}")]
    SealedInterval { open_time: u64 },

    #[error("interval opening at {open_time} is still live and cannot be recomputed")]
    LiveInterval { open_time: u64 },

    #[error("no candle opens at {window_start}")]
    UnknownInterval { window_start: u64 },
}

impl DataError {
    /// Determine if an error only signals a late result for a replaced session.
    pub fn is_stale_generation(&self) -> bool {
        matches!(self, DataError::SymbolMismatch { .. })
    }
}

impl From<serde_json::Error> for DataError {
    fn from(value: serde_json::Error) -> Self {
        Self::MalformedPayload(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_error_requires_resync() {
        struct TestCase {
            input: SyncError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: Gap requires resync
                input: SyncError::Gap {
                    first_update_id: 105,
                    last_update_id: 100,
                },
                expected: true,
            },
            TestCase {
                // TC1: StaleDiff is skipped without resync
                input: SyncError::StaleDiff {
                    final_update_id: 90,
                    last_update_id: 100,
                },
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.requires_resync();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_data_error_is_stale_generation() {
        struct TestCase {
            input: DataError,
            expected: bool,
        }

        let tests = vec![
            TestCase {
                // TC0: SymbolMismatch is a late result
                input: DataError::SymbolMismatch {
                    active: Generation::new(2),
                    received: Generation::new(1),
                },
                expected: true,
            },
            TestCase {
                // TC1: MalformedPayload keeps prior state
                input: DataError::MalformedPayload("missing field `U`".to_string()),
                expected: false,
            },
            TestCase {
                // TC2: sequencing errors are not generation related
                input: DataError::from(SyncError::Gap {
                    first_update_id: 105,
                    last_update_id: 100,
                }),
                expected: false,
            },
        ];

        for (index, test) in tests.into_iter().enumerate() {
            let actual = test.input.is_stale_generation();
            assert_eq!(actual, test.expected, "TC{} failed", index);
        }
    }

    #[test]
    fn test_malformed_payload_from_serde_json() {
        let error = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let actual = DataError::from(error);
        assert!(matches!(actual, DataError::MalformedPayload(_)));
        assert!(!actual.is_stale_generation());
    }
}
