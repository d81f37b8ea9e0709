use std::{num::ParseFloatError, ops::Range, str::FromStr};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mzquant::FeatureSelector;

/// A closed retention time interval, in the same units as the feature table
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: f64,
    pub end: f64,
}

impl TimeRange {
    pub fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: f64) -> bool {
        self.start <= time && time <= self.end
    }

    pub fn is_unbounded(&self) -> bool {
        self.start <= 0.0 && self.end.is_infinite()
    }

    /// Restrict `selector` to this interval
    pub fn apply(&self, selector: FeatureSelector) -> FeatureSelector {
        selector.with_time_range(self.start, self.end)
    }
}

impl Default for TimeRange {
    fn default() -> Self {
        Self {
            start: 0.0,
            end: f64::INFINITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TimeRangeParseError {
    #[error("Failed to parse time range start {0}")]
    MalformedStart(ParseFloatError),
    #[error("Failed to parse time range end {0}")]
    MalformedEnd(ParseFloatError),
    #[error("A time range must separate its bounds with '-', ':' or ' ', got \"{0}\"")]
    MissingSeparator(String),
    #[error("The time range start {0} is after its end {1}")]
    Inverted(f64, f64),
}

fn parse_bound(token: &str, default: f64) -> Result<f64, ParseFloatError> {
    let token = token.trim();
    if token.is_empty() {
        Ok(default)
    } else {
        token.parse()
    }
}

impl FromStr for TimeRange {
    type Err = TimeRangeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let split = [' ', ':', '-']
            .into_iter()
            .find_map(|sep| s.split_once(sep))
            .ok_or_else(|| TimeRangeParseError::MissingSeparator(s.to_string()))?;

        let start = parse_bound(split.0, 0.0).map_err(TimeRangeParseError::MalformedStart)?;
        let end = parse_bound(split.1, f64::INFINITY).map_err(TimeRangeParseError::MalformedEnd)?;
        if start > end {
            return Err(TimeRangeParseError::Inverted(start, end));
        }
        Ok(TimeRange { start, end })
    }
}

impl From<Range<f64>> for TimeRange {
    fn from(value: Range<f64>) -> Self {
        Self::new(value.start, value.end)
    }
}

impl From<(f64, f64)> for TimeRange {
    fn from(value: (f64, f64)) -> Self {
        Self::new(value.0, value.1)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_time_fromstr() -> Result<(), TimeRangeParseError> {
        let t: TimeRange = "52.0-".parse()?;
        assert_eq!(t.start, 52.0);
        assert_eq!(t.end, f64::INFINITY);

        let t: TimeRange = "-52.0".parse()?;
        assert_eq!(t.start, 0.0);
        assert_eq!(t.end, 52.0);

        let t: TimeRange = "32:52.0".parse()?;
        assert_eq!(t, TimeRange::new(32.0, 52.0));
        assert!(t.contains(32.0));
        assert!(t.contains(52.0));
        assert!(!t.contains(52.5));

        let t: TimeRange = "-".parse()?;
        assert!(t.is_unbounded());
        assert_eq!(t, TimeRange::default());

        Ok(())
    }

    #[test]
    fn test_time_fromstr_malformed() {
        assert!(matches!(
            "a-".parse::<TimeRange>(),
            Err(TimeRangeParseError::MalformedStart(_))
        ));
        assert!(matches!(
            "-b".parse::<TimeRange>(),
            Err(TimeRangeParseError::MalformedEnd(_))
        ));
        // Both ends are bad, the start is reported first
        assert!(matches!(
            "a-b".parse::<TimeRange>(),
            Err(TimeRangeParseError::MalformedStart(_))
        ));
        assert!(matches!(
            "52".parse::<TimeRange>(),
            Err(TimeRangeParseError::MissingSeparator(_))
        ));
        assert!(matches!(
            "60-30".parse::<TimeRange>(),
            Err(TimeRangeParseError::Inverted(_, _))
        ));
    }

    #[test]
    fn test_apply() {
        let selector = TimeRange::new(10.0, 20.0).apply(FeatureSelector::default());
        assert_eq!(selector.min_time, Some(10.0));
        assert_eq!(selector.max_time, Some(20.0));
    }
}
