use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// A wall-clock reading, microsecond resolution, taken immediately after a
/// `Multiplexer::poll` call returns.
///
/// Only used to annotate "readiness observed at" on the read callback; never
/// compared for ordering across threads.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct Timestamp {
    micros_since_epoch: i64,
}

impl Timestamp {
    pub fn now() -> Timestamp {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp {
            micros_since_epoch: now.as_micros() as i64,
        }
    }

    pub fn from_micros_since_epoch(micros: i64) -> Timestamp {
        Timestamp {
            micros_since_epoch: micros,
        }
    }

    pub fn micros_since_epoch(self) -> i64 {
        self.micros_since_epoch
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.micros_since_epoch / 1_000_000;
        let micros = self.micros_since_epoch % 1_000_000;
        write!(f, "{secs}.{micros:06}")
    }
}
