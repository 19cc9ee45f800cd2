use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::warn;
use tokio::time::Instant;

use super::derived::DerivedRef;
use super::sanity::SanityCheck;
use crate::utils::error::GatewayError;

/// One accepted raw reading.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reading {
    pub at: DateTime<Utc>,
    pub raw: f64,
}

/// Bounded history of the two most recent accepted readings.
#[derive(Debug, Clone, Default)]
pub struct History {
    entries: VecDeque<Reading>,
}

impl History {
    pub fn new() -> Self {
        Self {
            entries: VecDeque::with_capacity(2),
        }
    }

    pub fn push(&mut self, reading: Reading) {
        if self.entries.len() == 2 {
            self.entries.pop_front();
        }
        self.entries.push_back(reading);
    }

    /// Most recent reading.
    pub fn last(&self) -> Option<&Reading> {
        self.entries.back()
    }

    /// Reading before the most recent one.
    pub fn previous(&self) -> Option<&Reading> {
        if self.entries.len() == 2 {
            self.entries.front()
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Per-sensor retry accounting.
///
/// Ordinary failures count toward `max_failures`; hitting the ceiling blocks
/// the sensor for `retry_interval × ceiling_hits`. A zero interval, or a
/// permanent failure (illegal address), disables the sensor until restart.
#[derive(Debug)]
pub struct FailureBudget {
    max_failures: u32,
    retry_interval: Duration,
    failures: u32,
    ceiling_hits: u32,
    blocked_until: Option<Instant>,
    permanent: bool,
}

impl FailureBudget {
    pub fn new(max_failures: u32, retry_interval: Duration) -> Self {
        Self {
            max_failures: max_failures.max(1),
            retry_interval,
            failures: 0,
            ceiling_hits: 0,
            blocked_until: None,
            permanent: false,
        }
    }

    pub fn record_success(&mut self) {
        self.failures = 0;
        self.ceiling_hits = 0;
        self.blocked_until = None;
    }

    pub fn record_failure(&mut self) {
        if self.permanent {
            return;
        }
        self.failures += 1;
        if self.failures >= self.max_failures {
            self.failures = 0;
            self.ceiling_hits += 1;
            if self.retry_interval.is_zero() {
                self.permanent = true;
            } else {
                self.blocked_until =
                    Some(Instant::now() + self.retry_interval * self.ceiling_hits);
            }
        }
    }

    /// Zero the budget immediately; the sensor stays disabled until restart.
    pub fn record_permanent(&mut self) {
        self.permanent = true;
    }

    pub fn is_blocked(&self) -> bool {
        if self.permanent {
            return true;
        }
        match self.blocked_until {
            Some(until) => Instant::now() < until,
            None => false,
        }
    }

    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}

struct CoreState {
    history: History,
    force_publish: bool,
}

/// Construction parameters shared by every sensor flavor.
#[derive(Debug, Clone)]
pub struct CoreSpec {
    pub key: String,
    pub topic: String,
    pub unit: Option<String>,
    pub scan_interval: Duration,
    pub gain: f64,
    pub precision: Option<u32>,
    pub publishable: bool,
    pub sanity: SanityCheck,
    pub max_failures: u32,
    pub retry_interval: Duration,
}

/// State common to every sensor flavor: identity, bounded history, the
/// sanity gate, the failure budget and the synchronous fan-out list.
///
/// `accept` is the single mutation path for the history; it runs entirely
/// between suspension points, so it is atomic with respect to every other
/// task.
pub struct SensorCore {
    spec: CoreSpec,
    state: Mutex<CoreState>,
    budget: Mutex<FailureBudget>,
    dependents: Mutex<Vec<DerivedRef>>,
}

impl SensorCore {
    pub fn new(spec: CoreSpec) -> Self {
        let budget = FailureBudget::new(spec.max_failures, spec.retry_interval);
        Self {
            spec,
            state: Mutex::new(CoreState {
                history: History::new(),
                force_publish: false,
            }),
            budget: Mutex::new(budget),
            dependents: Mutex::new(Vec::new()),
        }
    }

    pub fn key(&self) -> &str {
        &self.spec.key
    }

    pub fn topic(&self) -> &str {
        &self.spec.topic
    }

    pub fn unit(&self) -> Option<&str> {
        self.spec.unit.as_deref()
    }

    pub fn scan_interval(&self) -> Duration {
        self.spec.scan_interval
    }

    pub fn publishable(&self) -> bool {
        self.spec.publishable
    }

    pub fn gain(&self) -> f64 {
        self.spec.gain
    }

    /// Public representation of a raw value: gain applied, then rounded to
    /// the configured precision.
    pub fn scaled(&self, raw: f64) -> f64 {
        let value = raw * self.spec.gain;
        match self.spec.precision {
            Some(digits) => {
                let factor = 10f64.powi(digits as i32);
                (value * factor).round() / factor
            }
            None => value,
        }
    }

    /// Run the sanity gate, append to history and fan out synchronously.
    /// A rejected reading leaves all state untouched.
    pub fn accept(&self, raw: f64, at: DateTime<Utc>) -> Result<(), GatewayError> {
        let snapshot = {
            let mut state = self.state.lock().unwrap();
            self.spec.sanity.is_sane(raw, &state.history)?;
            state.history.push(Reading { at, raw });
            state.history.clone()
        };

        let dependents: Vec<DerivedRef> = self.dependents.lock().unwrap().clone();
        for dependent in dependents {
            dependent.push(&self.spec.key, &snapshot);
        }
        Ok(())
    }

    pub fn last_reading(&self) -> Option<Reading> {
        self.state.lock().unwrap().history.last().copied()
    }

    pub fn history_snapshot(&self) -> History {
        self.state.lock().unwrap().history.clone()
    }

    pub fn clear_history(&self) {
        self.state.lock().unwrap().history.clear();
    }

    pub fn set_force_publish(&self) {
        self.state.lock().unwrap().force_publish = true;
    }

    pub fn clear_force_publish(&self) {
        self.state.lock().unwrap().force_publish = false;
    }

    pub fn is_force_publish(&self) -> bool {
        self.state.lock().unwrap().force_publish
    }

    pub fn register_dependent(&self, dependent: DerivedRef) {
        self.dependents.lock().unwrap().push(dependent);
    }

    /// True when a DailyAccumulationSensor sits anywhere downstream of this
    /// sensor's fan-out, so the scheduler can force a prompt baseline
    /// recalculation on a date rollover.
    pub fn feeds_daily(&self) -> bool {
        self.dependents
            .lock()
            .unwrap()
            .iter()
            .any(|d| d.leads_to_daily())
    }

    pub fn record_success(&self) {
        self.budget.lock().unwrap().record_success();
    }

    pub fn record_failure(&self) {
        let mut budget = self.budget.lock().unwrap();
        budget.record_failure();
        if budget.is_blocked() {
            warn!(
                "🚫 Sensor '{}' reached its failure ceiling and is backing off",
                self.spec.key
            );
        }
    }

    pub fn record_permanent_failure(&self) {
        self.budget.lock().unwrap().record_permanent();
        warn!(
            "🚫 Sensor '{}' disabled permanently (register does not exist)",
            self.spec.key
        );
    }

    pub fn is_blocked(&self) -> bool {
        self.budget.lock().unwrap().is_blocked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(key: &str) -> CoreSpec {
        CoreSpec {
            key: key.to_string(),
            topic: format!("test/{}", key),
            unit: None,
            scan_interval: Duration::from_secs(10),
            gain: 1.0,
            precision: None,
            publishable: true,
            sanity: SanityCheck::unbounded(),
            max_failures: 3,
            retry_interval: Duration::from_secs(60),
        }
    }

    #[test]
    fn test_history_keeps_two_most_recent() {
        let core = SensorCore::new(spec("a"));
        for v in [1.0, 2.0, 3.0] {
            core.accept(v, Utc::now()).unwrap();
        }
        let history = core.history_snapshot();
        assert_eq!(history.len(), 2);
        assert_eq!(history.previous().unwrap().raw, 2.0);
        assert_eq!(history.last().unwrap().raw, 3.0);
    }

    #[test]
    fn test_rejected_reading_leaves_state_untouched() {
        let mut s = spec("a");
        s.sanity = SanityCheck::new(Some(0.0), Some(10.0), false);
        let core = SensorCore::new(s);
        core.accept(5.0, Utc::now()).unwrap();
        assert!(core.accept(99.0, Utc::now()).is_err());
        assert_eq!(core.last_reading().unwrap().raw, 5.0);
        assert_eq!(core.history_snapshot().len(), 1);
    }

    #[test]
    fn test_scaled_applies_gain_and_precision() {
        let mut s = spec("a");
        s.gain = 0.1;
        s.precision = Some(2);
        let core = SensorCore::new(s);
        assert_eq!(core.scaled(123.456), 12.35);
    }

    #[test]
    fn test_budget_blocks_at_ceiling() {
        let mut budget = FailureBudget::new(2, Duration::from_secs(3600));
        assert!(!budget.is_blocked());
        budget.record_failure();
        assert!(!budget.is_blocked());
        budget.record_failure();
        assert!(budget.is_blocked());
        assert!(!budget.is_permanent());
    }

    #[test]
    fn test_budget_zero_interval_disables_until_restart() {
        let mut budget = FailureBudget::new(1, Duration::ZERO);
        budget.record_failure();
        assert!(budget.is_blocked());
        assert!(budget.is_permanent());
    }

    #[test]
    fn test_budget_permanent_failure() {
        let mut budget = FailureBudget::new(5, Duration::from_secs(60));
        budget.record_permanent();
        assert!(budget.is_blocked());
        budget.record_success();
        // Success does not resurrect a permanently failed sensor.
        assert!(budget.is_blocked());
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_backoff_is_linear() {
        let mut budget = FailureBudget::new(1, Duration::from_secs(10));
        budget.record_failure();
        assert!(budget.is_blocked());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(!budget.is_blocked());

        // Second ceiling hit doubles the wait.
        budget.record_failure();
        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(budget.is_blocked());
        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(!budget.is_blocked());
    }
}
