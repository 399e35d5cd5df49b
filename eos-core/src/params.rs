//! Scenario parameters: the failure matrix.
//!
//! A scenario run is parameterized by one [`FailureMode`] and one
//! [`BounceTarget`]. Both parse from and render to the snake-case names used
//! on the command line (`hard_bounce`, `clean_bounce`, `brokers`, `clients`).

use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// How a fault is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureMode {
    /// Graceful shutdown and restart, preserving membership continuity.
    CleanBounce,
    /// Abrupt termination simulating a crash.
    HardBounce,
}

impl FailureMode {
    /// Every failure mode, in matrix order.
    pub const ALL: [Self; 2] = [Self::HardBounce, Self::CleanBounce];

    /// Returns true for a graceful bounce.
    #[must_use]
    pub const fn is_clean(self) -> bool {
        matches!(self, Self::CleanBounce)
    }

    /// Returns the command-line name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::CleanBounce => "clean_bounce",
            Self::HardBounce => "hard_bounce",
        }
    }
}

impl fmt::Display for FailureMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FailureMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "clean_bounce" => Ok(Self::CleanBounce),
            "hard_bounce" => Ok(Self::HardBounce),
            other => Err(Error::UnknownVariant {
                kind: "failure mode",
                value: other.to_string(),
            }),
        }
    }
}

/// Which population the fault injector mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BounceTarget {
    /// The broker fleet.
    Brokers,
    /// The transactional copier processes.
    Clients,
}

impl BounceTarget {
    /// Every bounce target, in matrix order.
    pub const ALL: [Self; 2] = [Self::Brokers, Self::Clients];

    /// Returns the command-line name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Brokers => "brokers",
            Self::Clients => "clients",
        }
    }
}

impl fmt::Display for BounceTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BounceTarget {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "brokers" => Ok(Self::Brokers),
            "clients" => Ok(Self::Clients),
            other => Err(Error::UnknownVariant {
                kind: "bounce target",
                value: other.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_mode_parse() {
        assert_eq!("hard_bounce".parse::<FailureMode>().unwrap(), FailureMode::HardBounce);
        assert_eq!("clean_bounce".parse::<FailureMode>().unwrap(), FailureMode::CleanBounce);
        assert!("soft_bounce".parse::<FailureMode>().is_err());
    }

    #[test]
    fn test_bounce_target_parse() {
        assert_eq!("brokers".parse::<BounceTarget>().unwrap(), BounceTarget::Brokers);
        assert_eq!("clients".parse::<BounceTarget>().unwrap(), BounceTarget::Clients);
        assert!("zookeeper".parse::<BounceTarget>().is_err());
    }

    #[test]
    fn test_names_match_display() {
        for mode in FailureMode::ALL {
            assert_eq!(mode.to_string().parse::<FailureMode>().unwrap(), mode);
        }
        for target in BounceTarget::ALL {
            assert_eq!(target.to_string().parse::<BounceTarget>().unwrap(), target);
        }
    }

    #[test]
    fn test_is_clean() {
        assert!(FailureMode::CleanBounce.is_clean());
        assert!(!FailureMode::HardBounce.is_clean());
    }
}
