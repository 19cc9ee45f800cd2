use std::time::Duration;

use crate::sensors::SanityCheck;

use super::settings::{OverrideConfig, PollingConfig, SensorConfig, SensorKindConfig};

/// Fully resolved per-sensor settings: global polling defaults, then every
/// matching override in order (later wins field by field), then the sensor's
/// own explicit fields.
#[derive(Debug, Clone)]
pub struct ResolvedSettings {
    pub scan_interval: Duration,
    pub gain: f64,
    pub precision: Option<u32>,
    pub publishable: bool,
    pub sanity: SanityCheck,
    pub max_failures: u32,
    pub retry_interval: Duration,
}

/// `*`-wildcard match over a sensor key; no regex engine, no reflection.
pub fn wildcard_match(pattern: &str, key: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let key: Vec<char> = key.chars().collect();

    let (mut p, mut k) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;

    while k < key.len() {
        if p < pattern.len() && (pattern[p] == key[k]) {
            p += 1;
            k += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            star = Some((p, k));
            p += 1;
        } else if let Some((star_p, star_k)) = star {
            // Backtrack: let the last '*' swallow one more character.
            p = star_p + 1;
            k = star_k + 1;
            star = Some((star_p, star_k + 1));
        } else {
            return false;
        }
    }
    while p < pattern.len() && pattern[p] == '*' {
        p += 1;
    }
    p == pattern.len()
}

pub fn resolve(
    polling: &PollingConfig,
    overrides: &[OverrideConfig],
    sensor: &SensorConfig,
) -> ResolvedSettings {
    let mut scan_interval_seconds = polling.default_scan_interval_seconds;
    let mut gain: Option<f64> = None;
    let mut precision: Option<u32> = None;
    let mut min_raw: Option<f64> = None;
    let mut max_raw: Option<f64> = None;
    let mut delta_check: Option<bool> = None;
    let mut max_failures = polling.max_failures;
    let mut retry_interval_seconds = polling.retry_interval_seconds;

    for record in overrides {
        if !wildcard_match(&record.pattern, &sensor.key) {
            continue;
        }
        if let Some(v) = record.scan_interval_seconds {
            scan_interval_seconds = v;
        }
        if record.gain.is_some() {
            gain = record.gain;
        }
        if record.precision.is_some() {
            precision = record.precision;
        }
        if record.min_raw.is_some() {
            min_raw = record.min_raw;
        }
        if record.max_raw.is_some() {
            max_raw = record.max_raw;
        }
        if record.delta_check.is_some() {
            delta_check = record.delta_check;
        }
        if let Some(v) = record.max_failures {
            max_failures = v;
        }
        if let Some(v) = record.retry_interval_seconds {
            retry_interval_seconds = v;
        }
    }

    // The sensor's own declaration has the last word.
    if let Some(v) = sensor.scan_interval_seconds {
        scan_interval_seconds = v;
    }
    if sensor.gain.is_some() {
        gain = sensor.gain;
    }
    if sensor.precision.is_some() {
        precision = sensor.precision;
    }
    if sensor.min_raw.is_some() {
        min_raw = sensor.min_raw;
    }
    if sensor.max_raw.is_some() {
        max_raw = sensor.max_raw;
    }
    if sensor.delta_check.is_some() {
        delta_check = sensor.delta_check;
    }
    if let Some(v) = sensor.max_failures {
        max_failures = v;
    }
    if let Some(v) = sensor.retry_interval_seconds {
        retry_interval_seconds = v;
    }

    let sanity = match (&sensor.kind, min_raw, max_raw) {
        // No explicit bounds on a register sensor: width defaults apply.
        (SensorKindConfig::Register { value_type, .. }, None, None) => {
            let (min, max) = value_type.default_bounds();
            SanityCheck::new(min, max, delta_check.unwrap_or(false))
        }
        (_, min, max) => SanityCheck::new(min, max, delta_check.unwrap_or(false)),
    };

    ResolvedSettings {
        scan_interval: Duration::from_secs(scan_interval_seconds.max(1)),
        gain: gain.unwrap_or(1.0),
        precision,
        publishable: sensor.publishable.unwrap_or(!is_reserved(sensor)),
        sanity,
        max_failures,
        retry_interval: Duration::from_secs(retry_interval_seconds),
    }
}

fn is_reserved(sensor: &SensorConfig) -> bool {
    matches!(
        sensor.kind,
        SensorKindConfig::Register { reserved: true, .. }
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::{RegisterKind, ValueType};
    use crate::sensors::Access;

    fn sensor(key: &str) -> SensorConfig {
        SensorConfig {
            key: key.to_string(),
            name: key.to_string(),
            kind: SensorKindConfig::Register {
                register: 100,
                count: None,
                register_kind: RegisterKind::Holding,
                value_type: ValueType::U16,
                access: Access::ReadOnly,
                reserved: false,
            },
            unit: None,
            topic: None,
            scan_interval_seconds: None,
            gain: None,
            precision: None,
            publishable: None,
            scan_group: None,
            min_raw: None,
            max_raw: None,
            delta_check: None,
            max_failures: None,
            retry_interval_seconds: None,
        }
    }

    fn polling() -> PollingConfig {
        PollingConfig {
            default_scan_interval_seconds: 10,
            max_failures: 3,
            retry_interval_seconds: 300,
            count_sanity_failures: false,
            announce_interval_seconds: 300,
        }
    }

    fn record(pattern: &str) -> OverrideConfig {
        OverrideConfig {
            pattern: pattern.to_string(),
            scan_interval_seconds: None,
            gain: None,
            precision: None,
            min_raw: None,
            max_raw: None,
            delta_check: None,
            max_failures: None,
            retry_interval_seconds: None,
        }
    }

    #[test]
    fn test_wildcard_match() {
        assert!(wildcard_match("meter.*", "meter.power_l1"));
        assert!(wildcard_match("*.power_*", "meter.power_l1"));
        assert!(wildcard_match("meter.power_l1", "meter.power_l1"));
        assert!(wildcard_match("*", "anything"));
        assert!(!wildcard_match("meter.*", "inverter.power"));
        assert!(!wildcard_match("meter.power", "meter.power_l1"));
        assert!(!wildcard_match("", "x"));
        assert!(wildcard_match("", ""));
    }

    #[test]
    fn test_defaults_apply_without_matches() {
        let resolved = resolve(&polling(), &[], &sensor("meter.power"));
        assert_eq!(resolved.scan_interval, Duration::from_secs(10));
        assert_eq!(resolved.max_failures, 3);
        assert_eq!(resolved.gain, 1.0);
        assert!(resolved.publishable);
    }

    #[test]
    fn test_later_matching_pattern_wins_per_field() {
        let mut first = record("meter.*");
        first.max_failures = Some(5);
        first.gain = Some(0.5);
        let mut second = record("*.power");
        second.max_failures = Some(8);

        let resolved = resolve(&polling(), &[first, second], &sensor("meter.power"));
        // Second record wins on max_failures, first still supplies gain.
        assert_eq!(resolved.max_failures, 8);
        assert_eq!(resolved.gain, 0.5);
    }

    #[test]
    fn test_non_matching_pattern_leaves_defaults() {
        let mut rec = record("inverter.*");
        rec.max_failures = Some(99);
        let resolved = resolve(&polling(), &[rec], &sensor("meter.power"));
        assert_eq!(resolved.max_failures, 3);
    }

    #[test]
    fn test_sensor_declaration_beats_overrides() {
        let mut rec = record("meter.*");
        rec.scan_interval_seconds = Some(120);
        let mut s = sensor("meter.power");
        s.scan_interval_seconds = Some(5);
        let resolved = resolve(&polling(), &[rec], &s);
        assert_eq!(resolved.scan_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_width_default_bounds_used_without_explicit_bounds() {
        let resolved = resolve(&polling(), &[], &sensor("meter.power"));
        let history = crate::sensors::History::new();
        assert!(resolved.sanity.is_sane(65535.0, &history).is_ok());
        assert!(resolved.sanity.is_sane(65536.0, &history).is_err());
    }
}
