//! Entity types stored in the arena's tables.
//!
//! Records are flat JSON objects. Every field carries a serde default so that
//! partially written or older records still load.

pub mod bet;
pub mod prediction;
pub mod round;
pub mod user;

pub use bet::{Bet, BetStatus};
pub use prediction::Prediction;
pub use round::{Round, RoundStatus};
pub use user::{Role, User};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A record type that lives in its own table.
pub trait Entity: Serialize + DeserializeOwned + Send + Sync {
    /// Name of the backing table, also the persisted file stem.
    const TABLE: &'static str;

    fn id(&self) -> &str;
}

/// Which way the price is expected to move.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    #[default]
    Up,
    Down,
}

impl Direction {
    /// The direction the price actually took, or `None` when it did not move.
    pub fn of_move(start: f64, end: f64) -> Option<Direction> {
        if end > start {
            Some(Direction::Up)
        } else if end < start {
            Some(Direction::Down)
        } else {
            None
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "up" | "long" | "higher" => Ok(Direction::Up),
            "down" | "short" | "lower" => Ok(Direction::Down),
            other => Err(crate::Error::InvalidRequest(format!("unknown direction '{}'", other))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_direction_of_move() {
        assert_eq!(Direction::of_move(100.0, 101.5), Some(Direction::Up));
        assert_eq!(Direction::of_move(100.0, 99.0), Some(Direction::Down));
        assert_eq!(Direction::of_move(100.0, 100.0), None);
    }

    #[test]
    fn test_direction_parse() {
        assert_eq!("UP".parse::<Direction>().unwrap(), Direction::Up);
        assert_eq!("short".parse::<Direction>().unwrap(), Direction::Down);
        assert!("sideways".parse::<Direction>().is_err());
    }
}
