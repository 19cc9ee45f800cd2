use std::collections::HashMap;
use std::time::Duration;

use chrono::Local;
use log::{debug, error, info, warn};
use rand::Rng;
use tokio::sync::watch;
use tokio::time::{self, Instant};

use super::groups::ScanGroup;
use crate::sensors::{PublishContext, PublishOutcome, RegisterSensor, SensorNode};
use crate::utils::error::GatewayError;

/// Upper bound on the startup stagger; the effective bound per sensor is
/// `min(MAX_STAGGER, scan_interval)`.
const MAX_STAGGER: Duration = Duration::from_secs(5);

/// Longest one iteration may sleep; this bounded sleep is the single
/// cancellation point that lets the loop notice an offline transition
/// promptly.
const PASS_SLEEP_CAP: Duration = Duration::from_secs(1);

/// The long-lived poll loop for one scan group.
///
/// Runs while the owning device reports online: computes the due set,
/// performs one read-ahead over the combined span when it pays off,
/// publishes each due sensor, and answers a transport-level disconnection
/// with the reconnection sub-loop under the unbounded connection lock.
pub struct PollScheduler {
    group: ScanGroup,
    ctx: PublishContext,
    online: watch::Receiver<bool>,
    max_span: u16,
    reconnect_delay: Duration,
}

impl PollScheduler {
    pub fn new(
        group: ScanGroup,
        ctx: PublishContext,
        online: watch::Receiver<bool>,
        max_span: u16,
        reconnect_delay: Duration,
    ) -> Self {
        Self {
            group,
            ctx,
            online,
            max_span,
            reconnect_delay,
        }
    }

    pub async fn run(mut self) {
        info!(
            "🌀 Scan group '{}' started ({} sensors)",
            self.group.name,
            self.group.sensors.len()
        );

        // Small random stagger so groups sharing a connection do not issue
        // synchronized bursts at startup.
        let mut next_due: HashMap<String, Instant> = HashMap::new();
        let now = Instant::now();
        for sensor in &self.group.sensors {
            let cap = MAX_STAGGER.min(sensor.core().scan_interval());
            let jitter = if cap.is_zero() {
                Duration::ZERO
            } else {
                Duration::from_secs_f64(rand::rng().random_range(0.0..cap.as_secs_f64()))
            };
            next_due.insert(sensor.key().to_string(), now + jitter);
        }

        let mut read_ahead_enabled = true;
        let mut last_date = Local::now().date_naive();

        while *self.online.borrow() {
            let now = Instant::now();

            // A calendar-date rollover forces every feeder of a daily
            // accumulation sensor, so baselines recalculate promptly instead
            // of waiting out their natural interval.
            let today = Local::now().date_naive();
            if today != last_date {
                last_date = today;
                let mut forced = 0;
                for sensor in &self.group.sensors {
                    if sensor.core().feeds_daily() {
                        sensor.core().set_force_publish();
                        forced += 1;
                    }
                }
                if forced > 0 {
                    info!(
                        "📅 Date rollover: forcing {} daily-feeding sensors in group '{}'",
                        forced, self.group.name
                    );
                }
            }

            let due: Vec<SensorNode> = self
                .group
                .sensors
                .iter()
                .filter(|s| {
                    s.is_readable()
                        && s.core().publishable()
                        && !s.core().is_blocked()
                        && (s.core().is_force_publish()
                            || next_due.get(s.key()).map_or(true, |due| *due <= now))
                })
                .cloned()
                .collect();

            if read_ahead_enabled && !due.is_empty() {
                self.read_ahead_pass(&due, &mut read_ahead_enabled).await;
            }

            let mut disconnected = false;
            for sensor in &due {
                if !*self.online.borrow() {
                    break;
                }
                let key = sensor.key().to_string();
                match sensor.publish(&self.ctx).await {
                    Ok(PublishOutcome::Published) => {
                        sensor.core().clear_force_publish();
                        next_due
                            .insert(key, Instant::now() + sensor.core().scan_interval());
                    }
                    Ok(PublishOutcome::Skipped) => {
                        next_due
                            .insert(key, Instant::now() + sensor.core().scan_interval());
                    }
                    Err(e) if e.is_disconnection() => {
                        error!(
                            "🔌 Connection lost in group '{}' at sensor '{}': {}",
                            self.group.name, key, e
                        );
                        disconnected = true;
                        break;
                    }
                    Err(e) => {
                        warn!("⚠️  Sensor '{}' failed to publish: {}", key, e);
                        next_due
                            .insert(key, Instant::now() + sensor.core().scan_interval());
                    }
                }
            }

            if disconnected {
                self.reconnect().await;
                continue;
            }

            let now = Instant::now();
            let earliest = next_due
                .values()
                .copied()
                .min()
                .unwrap_or(now + PASS_SLEEP_CAP);
            let wake = earliest.clamp(now, now + PASS_SLEEP_CAP);
            tokio::select! {
                _ = time::sleep_until(wake) => {}
                changed = self.online.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("🛑 Scan group '{}' stopped (device offline)", self.group.name);
    }

    /// One read-ahead request spanning the full range the due set covers,
    /// issued before the sensors resolve individually. Exception code 2
    /// disables read-ahead for this group for the rest of the run; any other
    /// failure just skips it for this pass.
    async fn read_ahead_pass(&self, due: &[SensorNode], enabled: &mut bool) {
        let registers: Vec<&RegisterSensor> = due.iter().filter_map(|s| s.register()).collect();
        if registers.len() < 2 {
            return;
        }

        let device = registers[0].device_address();
        let kind = registers[0].kind();
        if registers
            .iter()
            .any(|r| r.device_address() != device || r.kind() != kind)
        {
            return;
        }

        let first = registers.iter().map(|r| r.address()).min().unwrap();
        let end = registers.iter().map(|r| r.end_address()).max().unwrap();
        let span = end.saturating_sub(first);
        if span > self.max_span {
            return;
        }

        let guard = match self.ctx.lock.acquire(self.ctx.lock_timeout).await {
            Ok(guard) => guard,
            Err(_) => return,
        };
        let result = self.ctx.bus.read_ahead(first, span, device, kind).await;
        drop(guard);

        match result {
            Ok(()) => {
                debug!(
                    "📦 Read-ahead of {} registers from {} for group '{}'",
                    span, first, self.group.name
                );
            }
            Err(GatewayError::Exception(code)) if code.is_permanent() => {
                *enabled = false;
                warn!(
                    "📦 Read-ahead permanently disabled for group '{}' (exception {})",
                    self.group.name, code
                );
            }
            Err(e) => {
                warn!(
                    "📦 Read-ahead skipped for group '{}' this pass: {}",
                    self.group.name, e
                );
            }
        }
    }

    /// Close/reopen the transport with a fixed delay between attempts until
    /// connected or the device goes offline. Holds the connection lock in
    /// unbounded-wait mode for the whole sub-loop so no other caller touches
    /// the half-open transport.
    async fn reconnect(&mut self) {
        warn!(
            "🔁 Group '{}' entering reconnection loop ({} waiting on lock)",
            self.group.name,
            self.ctx.lock.waiting()
        );
        let _guard = self.ctx.lock.acquire_unbounded().await;

        loop {
            if !*self.online.borrow() {
                return;
            }
            match self.ctx.bus.reopen().await {
                Ok(()) => {
                    info!("✅ Group '{}' reconnected", self.group.name);
                    return;
                }
                Err(e) => {
                    warn!("🔁 Reconnect attempt failed for group '{}': {}", self.group.name, e);
                }
            }
            tokio::select! {
                _ = time::sleep(self.reconnect_delay) => {}
                changed = self.online.changed() => {
                    if changed.is_err() || !*self.online.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
