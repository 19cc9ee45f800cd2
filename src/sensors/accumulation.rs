use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Local, NaiveDate};
use log::{info, warn};

use super::core::{History, SensorCore};
use crate::utils::error::GatewayError;

/// One scalar persisted as decimal text, opened and closed per write.
/// One process owns one device fleet, so no cross-process locking is needed.
pub struct ScalarStore {
    path: PathBuf,
}

impl ScalarStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    pub fn load(&self) -> Result<Option<f64>, GatewayError> {
        if !self.path.exists() {
            return Ok(None);
        }
        let text = std::fs::read_to_string(&self.path)?;
        let value = text.trim().parse::<f64>().map_err(|e| {
            GatewayError::PersistenceError(format!(
                "Corrupt scalar file {}: {}",
                self.path.display(),
                e
            ))
        })?;
        Ok(Some(value))
    }

    pub fn save(&self, value: f64) -> Result<(), GatewayError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, format!("{}\n", value))?;
        Ok(())
    }

    /// Local calendar date of the file's last modification, if it exists.
    pub fn modified_date(&self) -> Option<NaiveDate> {
        let modified = std::fs::metadata(&self.path).ok()?.modified().ok()?;
        Some(DateTime::<Local>::from(modified).date_naive())
    }
}

/// Running total computed by integrating a source rate sensor over time.
///
/// Each push adds the trapezoidal integral of the last two source readings
/// over elapsed wall-clock hours. Negative source readings clamp to zero
/// before integration. The total persists to disk only when it actually
/// changes.
pub struct AccumulationSensor {
    core: SensorCore,
    monotonic: bool,
    total: Mutex<f64>,
    store: ScalarStore,
}

impl AccumulationSensor {
    pub fn new(core: SensorCore, monotonic: bool, store: ScalarStore) -> Result<Self, GatewayError> {
        let total = match store.load() {
            Ok(Some(value)) => {
                info!(
                    "💾 Restored total {} for sensor '{}' from {}",
                    value,
                    core.key(),
                    store.path().display()
                );
                value
            }
            Ok(None) => 0.0,
            Err(e) => {
                warn!(
                    "⚠️  Discarding unreadable total for sensor '{}': {}",
                    core.key(),
                    e
                );
                0.0
            }
        };
        Ok(Self {
            core,
            monotonic,
            total: Mutex::new(total),
            store,
        })
    }

    pub fn core(&self) -> &SensorCore {
        &self.core
    }

    pub fn total(&self) -> f64 {
        *self.total.lock().unwrap()
    }

    pub fn push(&self, source_key: &str, history: &History) {
        let (Some(prev), Some(last)) = (history.previous(), history.last()) else {
            return;
        };

        let elapsed_hours = (last.at - prev.at).num_milliseconds() as f64 / 3_600_000.0;
        if elapsed_hours <= 0.0 {
            return;
        }

        let increment = 0.5 * (prev.raw.max(0.0) + last.raw.max(0.0)) * elapsed_hours;
        let new_total = {
            let mut total = self.total.lock().unwrap();
            let candidate = *total + increment;
            if self.monotonic && candidate < *total {
                warn!(
                    "⚠️  Sensor '{}' rejected non-monotonic total {} (keeping {})",
                    self.core.key(),
                    candidate,
                    *total
                );
            } else if candidate != *total {
                *total = candidate;
                if let Err(e) = self.store.save(candidate) {
                    warn!(
                        "❌ Failed to persist total for sensor '{}': {}",
                        self.core.key(),
                        e
                    );
                }
            }
            *total
        };

        if let Err(e) = self.core.accept(new_total, last.at) {
            warn!(
                "⚠️  Accumulation sensor '{}' rejected push from '{}': {}",
                self.core.key(),
                source_key,
                e
            );
        }
    }

    /// External reset command: overwrite the total unconditionally and
    /// persist it.
    pub fn reset(&self, new_total: f64) -> Result<(), GatewayError> {
        {
            let mut total = self.total.lock().unwrap();
            *total = new_total;
        }
        self.store.save(new_total)?;
        info!(
            "🔄 Sensor '{}' total reset to {}",
            self.core.key(),
            new_total
        );
        self.core.accept(new_total, chrono::Utc::now()).ok();
        Ok(())
    }
}

/// Daily consumption against a midnight baseline.
///
/// The baseline is the source value at the most recent local midnight,
/// persisted separately; a persisted baseline is only trusted when its file
/// was written today (file modification date).
pub struct DailyAccumulationSensor {
    core: SensorCore,
    baseline: Mutex<Option<f64>>,
    store: ScalarStore,
}

impl DailyAccumulationSensor {
    pub fn new(core: SensorCore, store: ScalarStore) -> Self {
        let baseline = Self::load_fresh_baseline(&store, Local::now().date_naive());
        if let Some(value) = baseline {
            info!(
                "💾 Restored today's baseline {} for sensor '{}'",
                value,
                core.key()
            );
        }
        Self {
            core,
            baseline: Mutex::new(baseline),
            store,
        }
    }

    /// A persisted baseline is authoritative only when the file was last
    /// modified on `today`; anything older is stale and discarded.
    fn load_fresh_baseline(store: &ScalarStore, today: NaiveDate) -> Option<f64> {
        match store.modified_date() {
            Some(date) if date == today => store.load().ok().flatten(),
            Some(_) => None,
            None => None,
        }
    }

    pub fn core(&self) -> &SensorCore {
        &self.core
    }

    pub fn baseline(&self) -> Option<f64> {
        *self.baseline.lock().unwrap()
    }

    pub fn push(&self, source_key: &str, history: &History) {
        let Some(last) = history.last() else {
            return;
        };

        let baseline = {
            let mut baseline = self.baseline.lock().unwrap();

            if let Some(prev) = history.previous() {
                let prev_date = prev.at.with_timezone(&Local).date_naive();
                let last_date = last.at.with_timezone(&Local).date_naive();
                if prev_date != last_date {
                    // Midnight crossing: the later reading becomes the new
                    // baseline and the visible value restarts near zero.
                    *baseline = Some(last.raw);
                    if let Err(e) = self.store.save(last.raw) {
                        warn!(
                            "❌ Failed to persist baseline for sensor '{}': {}",
                            self.core.key(),
                            e
                        );
                    }
                    self.core.clear_history();
                    info!(
                        "🌅 Sensor '{}' captured new midnight baseline {}",
                        self.core.key(),
                        last.raw
                    );
                }
            }

            if baseline.is_none() {
                *baseline = Some(last.raw);
                if let Err(e) = self.store.save(last.raw) {
                    warn!(
                        "❌ Failed to persist baseline for sensor '{}': {}",
                        self.core.key(),
                        e
                    );
                }
            }
            baseline.unwrap()
        };

        if let Err(e) = self.core.accept(last.raw - baseline, last.at) {
            warn!(
                "⚠️  Daily sensor '{}' rejected push from '{}': {}",
                self.core.key(),
                source_key,
                e
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::core::{CoreSpec, Reading};
    use crate::sensors::sanity::SanityCheck;
    use chrono::{TimeZone, Utc};
    use std::time::Duration;

    fn core(key: &str) -> SensorCore {
        SensorCore::new(CoreSpec {
            key: key.to_string(),
            topic: format!("test/{}", key),
            unit: None,
            scan_interval: Duration::from_secs(60),
            gain: 1.0,
            precision: None,
            publishable: true,
            sanity: SanityCheck::unbounded(),
            max_failures: 3,
            retry_interval: Duration::from_secs(60),
        })
    }

    fn history(pairs: &[(DateTime<chrono::Utc>, f64)]) -> History {
        let mut h = History::new();
        for (at, raw) in pairs {
            h.push(Reading { at: *at, raw: *raw });
        }
        h
    }

    fn temp_store(dir: &tempfile::TempDir, name: &str) -> ScalarStore {
        ScalarStore::new(dir.path().join(name))
    }

    #[test]
    fn test_trapezoidal_increment() {
        let dir = tempfile::tempdir().unwrap();
        let sensor =
            AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat")).unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(1);
        sensor.push("power", &history(&[(t0, 100.0), (t1, 200.0)]));

        assert_eq!(sensor.total(), 150.0);
        assert_eq!(sensor.core().last_reading().unwrap().raw, 150.0);
    }

    #[test]
    fn test_negative_source_clamped_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let sensor =
            AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat")).unwrap();

        let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        let t1 = t0 + chrono::Duration::hours(1);
        sensor.push("power", &history(&[(t0, -50.0), (t1, 100.0)]));

        assert_eq!(sensor.total(), 50.0);
    }

    #[test]
    fn test_single_reading_contributes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sensor =
            AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat")).unwrap();
        let t0 = Utc.with_ymd_and_hms(2026, 3, 10, 10, 0, 0).unwrap();
        sensor.push("power", &history(&[(t0, 100.0)]));
        assert_eq!(sensor.total(), 0.0);
    }

    #[test]
    fn test_total_survives_reconstruction() {
        let dir = tempfile::tempdir().unwrap();
        {
            let sensor =
                AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat"))
                    .unwrap();
            sensor.reset(123.5).unwrap();
        }
        let restored =
            AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat")).unwrap();
        assert_eq!(restored.total(), 123.5);
    }

    #[test]
    fn test_reset_overwrites_unconditionally() {
        let dir = tempfile::tempdir().unwrap();
        let sensor =
            AccumulationSensor::new(core("energy"), true, temp_store(&dir, "energy.dat")).unwrap();
        sensor.reset(500.0).unwrap();
        // Lower than the current total, monotonic policy notwithstanding.
        sensor.reset(0.0).unwrap();
        assert_eq!(sensor.total(), 0.0);
    }

    #[test]
    fn test_daily_baseline_captured_on_midnight_crossing() {
        let dir = tempfile::tempdir().unwrap();
        let sensor = DailyAccumulationSensor::new(core("daily"), temp_store(&dir, "daily.dat"));

        // Late evening local time, then just past the next local midnight.
        let before = Local
            .with_ymd_and_hms(2026, 3, 10, 23, 55, 0)
            .unwrap()
            .with_timezone(&Utc);
        let after = Local
            .with_ymd_and_hms(2026, 3, 11, 0, 5, 0)
            .unwrap()
            .with_timezone(&Utc);

        sensor.push("total", &history(&[(before, 1000.0)]));
        assert_eq!(sensor.baseline(), Some(1000.0));
        assert_eq!(sensor.core().last_reading().unwrap().raw, 0.0);

        sensor.push("total", &history(&[(before, 1000.0), (after, 1010.0)]));
        assert_eq!(sensor.baseline(), Some(1010.0));
        assert_eq!(sensor.core().last_reading().unwrap().raw, 0.0);

        let later = after + chrono::Duration::hours(2);
        sensor.push("total", &history(&[(after, 1010.0), (later, 1060.0)]));
        assert_eq!(sensor.core().last_reading().unwrap().raw, 50.0);
    }

    #[test]
    fn test_stale_baseline_discarded() {
        let dir = tempfile::tempdir().unwrap();
        let store = temp_store(&dir, "daily.dat");
        store.save(999.0).unwrap();

        // The file was written "today" as far as the filesystem goes, so
        // pretend construction happens tomorrow.
        let tomorrow = Local::now().date_naive() + chrono::Duration::days(1);
        assert_eq!(
            DailyAccumulationSensor::load_fresh_baseline(&store, tomorrow),
            None
        );
        assert_eq!(
            DailyAccumulationSensor::load_fresh_baseline(&store, Local::now().date_naive()),
            Some(999.0)
        );
    }
}
