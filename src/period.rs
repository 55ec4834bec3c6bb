use crate::config::ConfigError;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, Utc};
use std::fmt;

/// Timestamp format used throughout the configuration and on-disk file
/// names, e.g. `2022020100` for 2022-02-01 00:00 UTC.
pub const STAMP_FORMAT: &str = "%Y%m%d%H";

/// Parse a configuration date, either `YYYYMMDDHH` or `YYYYMMDD`
/// (midnight assumed).
pub fn parse_stamp(text: &str) -> Result<DateTime<Utc>, ConfigError> {
    let naive = match text.len() {
        // chrono refuses to build a NaiveDateTime without minutes, so
        // pad the stamp with "00" before parsing.
        10 => NaiveDateTime::parse_from_str(&format!("{text}00"), "%Y%m%d%H%M")
            .map_err(|_| ConfigError::BadDate(text.to_string()))?,
        8 => NaiveDate::parse_from_str(text, "%Y%m%d")
            .map_err(|_| ConfigError::BadDate(text.to_string()))?
            .and_hms_opt(0, 0, 0)
            .unwrap(),
        _ => return Err(ConfigError::BadDate(text.to_string())),
    };
    Ok(naive.and_utc())
}

/// The three named dataset periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodName {
    Train,
    Valid,
    Test,
}

impl PeriodName {
    pub fn parse(name: &str) -> Result<Self, ConfigError> {
        match name {
            "train" => Ok(PeriodName::Train),
            "valid" => Ok(PeriodName::Valid),
            "test" => Ok(PeriodName::Test),
            other => Err(ConfigError::Invalid(format!(
                "unknown period '{other}', expected train, valid or test"
            ))),
        }
    }
}

impl fmt::Display for PeriodName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PeriodName::Train => write!(f, "train"),
            PeriodName::Valid => write!(f, "valid"),
            PeriodName::Test => write!(f, "test"),
        }
    }
}

/// A named, bounded time range sampled at a fixed cadence. Constructed
/// from configuration at startup and never mutated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodSpec {
    pub name: PeriodName,
    pub start: DateTime<Utc>,
    /// Inclusive end of the period.
    pub end: DateTime<Utc>,
    pub obs_step_secs: i64,
}

/// The ordered timestamps of one period: start, start+step, ... up to
/// and including end when it falls on the cadence.
///
/// Pure derivation of the spec; consumers index by position, there is no
/// cursor state.
#[derive(Debug, Clone)]
pub struct PeriodIndex {
    name: PeriodName,
    timestamps: Vec<DateTime<Utc>>,
}

impl PeriodIndex {
    pub fn build(spec: &PeriodSpec) -> Result<Self, ConfigError> {
        if spec.obs_step_secs <= 0 {
            return Err(ConfigError::Period {
                name: spec.name.to_string(),
                reason: format!("obs_step must be positive, got {}", spec.obs_step_secs),
            });
        }
        if spec.start > spec.end {
            return Err(ConfigError::Period {
                name: spec.name.to_string(),
                reason: format!("start {} is after end {}", spec.start, spec.end),
            });
        }
        let step = Duration::seconds(spec.obs_step_secs);
        let mut timestamps = Vec::new();
        let mut t = spec.start;
        while t <= spec.end {
            timestamps.push(t);
            t += step;
        }
        Ok(Self {
            name: spec.name,
            timestamps,
        })
    }

    pub fn name(&self) -> PeriodName {
        self.name
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn get(&self, position: usize) -> Option<DateTime<Utc>> {
        self.timestamps.get(position).copied()
    }

    pub fn timestamps(&self) -> &[DateTime<Utc>] {
        &self.timestamps
    }
}
