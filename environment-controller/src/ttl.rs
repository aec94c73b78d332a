//! Time-to-live expiry for environments
//!
//! An environment with a ttl is armed the first time it is observed fully ready,
//! by stamping the current time into its status. While it stays ready, each pass
//! compares the elapsed time against the ttl and requests deletion once it has
//! been exceeded. Losing readiness disarms the timer, which restarts from zero
//! once readiness is regained.
use chrono::{DateTime, TimeDelta, Utc};
use std::{fmt, str::FromStr};
use thiserror::Error;

/// Errors from parsing a ttl string
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TtlError {
    #[error("ttl is empty")]
    Empty,
    #[error("ttl {0:?} has no amount before its unit")]
    MissingAmount(String),
    #[error("ttl {0:?} has a non-numeric amount")]
    InvalidAmount(String),
    #[error("ttl {ttl:?} has unknown unit {unit:?}, expected one of m, h, d, y")]
    UnknownUnit { ttl: String, unit: char },
    #[error("ttl {0:?} is too large")]
    OutOfRange(String),
}

/// Unit suffix of a ttl
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlUnit {
    Minutes,
    Hours,
    Days,
    /// 365 days, leap years are not accounted for
    Years,
}

impl TtlUnit {
    fn from_suffix(c: char) -> Option<Self> {
        match c {
            'm' => Some(TtlUnit::Minutes),
            'h' => Some(TtlUnit::Hours),
            'd' => Some(TtlUnit::Days),
            'y' => Some(TtlUnit::Years),
            _ => None,
        }
    }

    fn suffix(self) -> char {
        match self {
            TtlUnit::Minutes => 'm',
            TtlUnit::Hours => 'h',
            TtlUnit::Days => 'd',
            TtlUnit::Years => 'y',
        }
    }

    fn delta(self, amount: i64) -> Option<TimeDelta> {
        match self {
            TtlUnit::Minutes => TimeDelta::try_minutes(amount),
            TtlUnit::Hours => TimeDelta::try_hours(amount),
            TtlUnit::Days => TimeDelta::try_days(amount),
            TtlUnit::Years => amount.checked_mul(365).and_then(TimeDelta::try_days),
        }
    }
}

/// A parsed ttl such as `2h` or `30d`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ttl {
    amount: i64,
    unit: TtlUnit,
    duration: TimeDelta,
}

impl Ttl {
    /// How long an environment may live once it became ready
    pub fn duration(&self) -> TimeDelta {
        self.duration
    }
}

impl FromStr for Ttl {
    type Err = TtlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let suffix = s.chars().last().ok_or(TtlError::Empty)?;
        let digits = &s[..s.len() - suffix.len_utf8()];
        let unit = TtlUnit::from_suffix(suffix).ok_or_else(|| TtlError::UnknownUnit {
            ttl: s.to_string(),
            unit: suffix,
        })?;
        if digits.is_empty() {
            return Err(TtlError::MissingAmount(s.to_string()));
        }
        // i64::from_str would also take a sign
        if !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TtlError::InvalidAmount(s.to_string()));
        }
        let amount: i64 = digits.parse().map_err(|_| TtlError::OutOfRange(s.to_string()))?;
        let duration = unit.delta(amount).ok_or_else(|| TtlError::OutOfRange(s.to_string()))?;
        Ok(Ttl {
            amount,
            unit,
            duration,
        })
    }
}

impl fmt::Display for Ttl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.amount, self.unit.suffix())
    }
}

/// What the expiry policy wants done on this pass
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expiry {
    /// No ttl configured
    Disabled,
    /// Not ready, any recorded start must be cleared
    Disarmed,
    /// Ready for the first time, stamp this instant as the start
    Arm(DateTime<Utc>),
    /// Armed and still within the ttl
    Pending { remaining: TimeDelta },
    /// Armed and past the ttl, the environment should be deleted
    Expired { elapsed: TimeDelta },
}

/// Decide the ttl transition for one pass
///
/// Expiry is strict: an environment whose elapsed time equals the ttl is kept.
pub fn evaluate(
    ttl: Option<&Ttl>,
    ready: bool,
    started: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Expiry {
    let Some(ttl) = ttl else {
        return Expiry::Disabled;
    };
    if !ready {
        return Expiry::Disarmed;
    }
    let Some(started) = started else {
        return Expiry::Arm(now);
    };
    let elapsed = now - started;
    if elapsed > ttl.duration() {
        Expiry::Expired { elapsed }
    } else {
        Expiry::Pending {
            remaining: ttl.duration() - elapsed,
        }
    }
}
