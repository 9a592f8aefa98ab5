use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Normal,
    Warning,
    Critical,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Normal => "normal",
            Status::Warning => "warning",
            Status::Critical => "critical",
        }
    }

    pub fn is_alert(self) -> bool {
        !matches!(self, Status::Normal)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive `(min, max)` band.
pub type Range = (f64, f64);

fn within(range: Range, v: f64) -> bool {
    v >= range.0 && v <= range.1
}

/// Classify a value against a device's bands.
///
/// `warning` is expected to contain `normal`. Values inside `normal` are normal,
/// values inside `warning` but outside `normal` are warnings, everything else
/// (including NaN) is critical.
pub fn classify(value: f64, normal: Range, warning: Range) -> Status {
    if within(normal, value) {
        Status::Normal
    } else if within(warning, value) {
        Status::Warning
    } else {
        Status::Critical
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NORMAL: Range = (15.0, 30.0);
    const WARNING: Range = (10.0, 35.0);

    #[test]
    fn bands_are_inclusive() {
        assert_eq!(classify(15.0, NORMAL, WARNING), Status::Normal);
        assert_eq!(classify(30.0, NORMAL, WARNING), Status::Normal);
        assert_eq!(classify(10.0, NORMAL, WARNING), Status::Warning);
        assert_eq!(classify(35.0, NORMAL, WARNING), Status::Warning);
    }

    #[test]
    fn outside_warning_is_critical() {
        assert_eq!(classify(9.99, NORMAL, WARNING), Status::Critical);
        assert_eq!(classify(35.01, NORMAL, WARNING), Status::Critical);
        assert_eq!(classify(f64::NAN, NORMAL, WARNING), Status::Critical);
        assert_eq!(classify(f64::INFINITY, NORMAL, WARNING), Status::Critical);
    }

    #[test]
    fn sweep_has_no_gaps() {
        let mut v = 0.0;
        while v <= 45.0 {
            let expected = if (15.0..=30.0).contains(&v) {
                Status::Normal
            } else if (10.0..=35.0).contains(&v) {
                Status::Warning
            } else {
                Status::Critical
            };
            assert_eq!(classify(v, NORMAL, WARNING), expected, "v = {v}");
            v += 0.25;
        }
    }

    #[test]
    fn serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Status::Critical).unwrap(), "\"critical\"");
        let s: Status = serde_json::from_str("\"warning\"").unwrap();
        assert_eq!(s, Status::Warning);
    }
}
