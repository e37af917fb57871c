use std::sync::Arc;

use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use tracing::{debug, error};

use crate::gateway::FloGateway;
use crate::types::Interval;

/// Rounding policy for gallon arithmetic: every interval query result is
/// rounded once to two decimal places before it is added to the running
/// total, and presentation uses the same precision. One rule everywhere, so
/// rounding error never compounds across hours.
fn round_gallons(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn hour_floor(t: DateTime<Utc>) -> DateTime<Utc> {
    t.duration_trunc(TimeDelta::hours(1)).unwrap_or(t)
}

/// Running "gallons consumed since the start of the reporting period" for
/// one device, maintained from windowed interval queries instead of
/// re-querying the whole period on every poll.
///
/// One expensive minute-granularity query seeds the total at startup; after
/// that the meter issues one hour-granularity query per hour boundary
/// crossed, plus one query for the in-progress hour each cycle. Period
/// rollover (day/year change) is not automatic: the assembling host drops
/// the meter and starts a fresh one with the new `period_start`.
pub struct ConsumptionMeter {
    gateway: Arc<FloGateway>,
    location_id: String,
    mac_address: String,
    period_start: DateTime<Utc>,
    running_total: f64,
    last_boundary: DateTime<Utc>,
    last_reported: f64,
}

impl ConsumptionMeter {
    /// Seed the meter with one coarse query covering `period_start..now`.
    pub async fn start(
        gateway: Arc<FloGateway>,
        location_id: impl Into<String>,
        mac_address: impl Into<String>,
        period_start: DateTime<Utc>,
    ) -> Self {
        Self::start_at(gateway, location_id, mac_address, period_start, Utc::now()).await
    }

    /// Clock-injected variant of [`ConsumptionMeter::start`].
    pub async fn start_at(
        gateway: Arc<FloGateway>,
        location_id: impl Into<String>,
        mac_address: impl Into<String>,
        period_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Self {
        let mut meter = Self {
            gateway,
            location_id: location_id.into(),
            mac_address: mac_address.into(),
            period_start,
            running_total: 0.0,
            last_boundary: now,
            last_reported: 0.0,
        };
        let seed = meter
            .interval_total(&period_start, &now, Interval::Minute)
            .await;
        meter.running_total = seed;
        meter.last_reported = seed;
        debug!(
            mac = %meter.mac_address,
            period_start = %period_start,
            gallons = seed,
            "consumption meter seeded"
        );
        meter
    }

    /// Steady-state update, invoked once per poll cycle. Returns the value
    /// to report: completed-hour total plus the in-progress hour.
    pub async fn update(&mut self) -> f64 {
        self.update_at(Utc::now()).await
    }

    /// Clock-injected variant of [`ConsumptionMeter::update`].
    pub async fn update_at(&mut self, now: DateTime<Utc>) -> f64 {
        let prev_floor = hour_floor(self.last_boundary);
        let now_floor = hour_floor(now);

        // Fold in each hour completed since the last cycle. Usually zero or
        // one iteration; more when polls were missed.
        let mut hour_end = prev_floor + TimeDelta::hours(1);
        while hour_end <= now_floor {
            let hour_start = hour_end - TimeDelta::hours(1);
            let contribution = self
                .interval_total(&hour_start, &hour_end, Interval::Hour)
                .await;
            self.running_total += contribution;
            hour_end += TimeDelta::hours(1);
        }

        // Flo reports the entire prior hour's total in the first instant of
        // a new hour; querying the partial hour at exactly that instant
        // would count the just-folded hour twice.
        let crossed = now_floor != prev_floor;
        let partial = if crossed && now == now_floor {
            0.0
        } else {
            self.interval_total(&now_floor, &now, Interval::Hour).await
        };

        self.last_boundary = now;
        self.last_reported = self.running_total + partial;
        self.last_reported
    }

    /// Last reported value (unrounded sum of 2 dp contributions).
    pub fn value(&self) -> f64 {
        self.last_reported
    }

    /// Presentation value, rounded to the crate's gallon precision.
    pub fn state(&self) -> f64 {
        round_gallons(self.last_reported)
    }

    /// Gallons accumulated for completed hours since `period_start`.
    pub fn running_total(&self) -> f64 {
        self.running_total
    }

    pub fn period_start(&self) -> DateTime<Utc> {
        self.period_start
    }

    pub fn mac_address(&self) -> &str {
        &self.mac_address
    }

    /// One interval query, with the zero-contribution failure policy: a
    /// transport error, a missing aggregation, or a non-finite/negative
    /// total all contribute nothing and must not poison the running total.
    async fn interval_total(
        &self,
        start: &DateTime<Utc>,
        end: &DateTime<Utc>,
        interval: Interval,
    ) -> f64 {
        match self
            .gateway
            .consumption(&self.location_id, &self.mac_address, start, end, interval)
            .await
        {
            Ok(Some(report)) => {
                let total = report.total_gallons;
                if total.is_finite() && total >= 0.0 {
                    round_gallons(total)
                } else {
                    error!(
                        mac = %self.mac_address,
                        start = %start, end = %end,
                        "unusable consumption total {total}, treating as zero"
                    );
                    0.0
                }
            }
            Ok(None) => {
                error!(
                    mac = %self.mac_address,
                    start = %start, end = %end,
                    "consumption response missing aggregation, treating as zero"
                );
                0.0
            }
            Err(e) => {
                error!(
                    mac = %self.mac_address,
                    start = %start, end = %end,
                    "consumption query failed, treating as zero: {e}"
                );
                0.0
            }
        }
    }
}
