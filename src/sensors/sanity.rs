use crate::bus::ValueType;
use crate::sensors::core::History;
use crate::utils::error::GatewayError;

/// Immutable per-sensor validation policy.
///
/// With both bounds unset every reading passes. In delta mode the bounds
/// apply to `raw - previous` instead of the absolute value, and a reading
/// with no numeric predecessor passes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SanityCheck {
    min_raw: Option<f64>,
    max_raw: Option<f64>,
    delta_mode: bool,
}

impl SanityCheck {
    pub fn unbounded() -> Self {
        Self {
            min_raw: None,
            max_raw: None,
            delta_mode: false,
        }
    }

    pub fn new(min_raw: Option<f64>, max_raw: Option<f64>, delta_mode: bool) -> Self {
        Self {
            min_raw,
            max_raw,
            delta_mode,
        }
    }

    /// Defaults derived from the register width and signedness.
    pub fn for_value_type(value_type: ValueType) -> Self {
        let (min_raw, max_raw) = value_type.default_bounds();
        Self {
            min_raw,
            max_raw,
            delta_mode: false,
        }
    }

    pub fn is_sane(&self, raw: f64, history: &History) -> Result<(), GatewayError> {
        if self.min_raw.is_none() && self.max_raw.is_none() {
            return Ok(());
        }

        let checked = if self.delta_mode {
            match history.last() {
                Some(prev) if prev.raw.is_finite() => raw - prev.raw,
                _ => return Ok(()),
            }
        } else {
            raw
        };

        if let Some(min) = self.min_raw {
            if checked < min {
                return Err(GatewayError::Validation(format!(
                    "{} below minimum {} ({})",
                    checked,
                    min,
                    if self.delta_mode { "delta" } else { "absolute" }
                )));
            }
        }
        if let Some(max) = self.max_raw {
            if checked > max {
                return Err(GatewayError::Validation(format!(
                    "{} above maximum {} ({})",
                    checked,
                    max,
                    if self.delta_mode { "delta" } else { "absolute" }
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::core::Reading;
    use chrono::Utc;

    fn history_with(raw: f64) -> History {
        let mut h = History::new();
        h.push(Reading {
            at: Utc::now(),
            raw,
        });
        h
    }

    #[test]
    fn test_unbounded_accepts_anything() {
        let check = SanityCheck::unbounded();
        assert!(check.is_sane(f64::MAX, &History::new()).is_ok());
        assert!(check.is_sane(-1e300, &History::new()).is_ok());
    }

    #[test]
    fn test_absolute_bounds() {
        let check = SanityCheck::new(Some(0.0), Some(100.0), false);
        assert!(check.is_sane(50.0, &History::new()).is_ok());
        assert!(check.is_sane(-0.1, &History::new()).is_err());
        assert!(check.is_sane(100.1, &History::new()).is_err());
    }

    #[test]
    fn test_one_sided_bound() {
        let check = SanityCheck::new(Some(0.0), None, false);
        assert!(check.is_sane(1e12, &History::new()).is_ok());
        assert!(check.is_sane(-1.0, &History::new()).is_err());
    }

    #[test]
    fn test_delta_mode_checks_difference() {
        let check = SanityCheck::new(Some(-10.0), Some(10.0), true);
        let history = history_with(1000.0);
        // Absolute value far outside the bounds, delta within them.
        assert!(check.is_sane(1005.0, &history).is_ok());
        assert!(check.is_sane(1011.0, &history).is_err());
        assert!(check.is_sane(989.0, &history).is_err());
    }

    #[test]
    fn test_delta_mode_without_previous_passes() {
        let check = SanityCheck::new(Some(-1.0), Some(1.0), true);
        assert!(check.is_sane(12345.0, &History::new()).is_ok());
    }

    #[test]
    fn test_width_defaults() {
        let check = SanityCheck::for_value_type(ValueType::U16);
        assert!(check.is_sane(65535.0, &History::new()).is_ok());
        assert!(check.is_sane(65536.0, &History::new()).is_err());
        assert!(check.is_sane(-1.0, &History::new()).is_err());

        let signed = SanityCheck::for_value_type(ValueType::I16);
        assert!(signed.is_sane(-32768.0, &History::new()).is_ok());
        assert!(signed.is_sane(-32769.0, &History::new()).is_err());
    }
}
