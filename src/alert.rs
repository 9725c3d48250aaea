//! Apparent-power alert debouncing.
//!
//! A recurring threshold breach must produce exactly one notification per
//! episode, not one per sampling tick. [`PowerAlert`] tracks whether the
//! current excursion above threshold has already been notified, and
//! [`CheckWindow`] decides whether the rule is armed at all (within one
//! minute of the configured daily check time).
//!
//! # State machine
//!
//! ```text
//!            armed && value > threshold
//!   Idle ──────────────────────────────► Notified   (fires once)
//!    ▲                                      │
//!    │       armed && value <= threshold    │
//!    └──────────────────────────────────────┘
//!
//!   not armed: state frozen, never fires
//! ```

use chrono::{DateTime, Local, NaiveTime, TimeDelta};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, warn};

use crate::bus::RingPublisher;
use crate::core::topics;
use crate::mailer::MailSender;

/// Strikes requested from the chime when the power alert fires.
const ALERT_STRIKES: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Episode {
    /// No active excursion above threshold.
    Idle,
    /// Excursion active and its one-shot notification already sent.
    Notified,
}

/// One-notification-per-episode gate for the apparent power rule.
#[derive(Debug)]
pub struct PowerAlert {
    threshold: i64,
    episode: Episode,
}

impl PowerAlert {
    pub fn new(threshold: i64) -> Self {
        Self {
            threshold,
            episode: Episode::Idle,
        }
    }

    /// Feed one sample into the gate.
    ///
    /// Returns `true` exactly once per contiguous run of samples above the
    /// threshold while armed. While not armed the episode state is left
    /// untouched, so a breach that straddles the window does not re-fire
    /// when the window reopens unless the value dropped to or below the
    /// threshold in between.
    pub fn observe(&mut self, armed: bool, value: i64) -> bool {
        if !armed {
            return false;
        }
        if value > self.threshold {
            match self.episode {
                Episode::Idle => {
                    self.episode = Episode::Notified;
                    true
                }
                Episode::Notified => false,
            }
        } else {
            self.episode = Episode::Idle;
            false
        }
    }
}

/// Daily time-of-day window during which the apparent power rule is armed.
#[derive(Debug, Clone, Copy)]
pub struct CheckWindow {
    at: NaiveTime,
    tolerance: TimeDelta,
}

impl CheckWindow {
    pub fn new(at: NaiveTime) -> Self {
        Self {
            at,
            tolerance: TimeDelta::minutes(1),
        }
    }

    /// Whether `now` falls within the window. The window instant is
    /// recombined with the current date on every call, never cached as a
    /// fixed timestamp.
    pub fn armed(&self, now: DateTime<Local>) -> bool {
        let check = now.date_naive().and_time(self.at);
        (now.naive_local() - check).abs() < self.tolerance
    }
}

/// The apparent-power instance of the poller alert hook: evaluates each
/// energy sample against the window and the gate, and performs the one-shot
/// ring-and-email side effects when the gate opens.
///
/// The ring goes out over a short-lived connection of its own, independent
/// of the listener's long-lived one.
pub struct PowerMonitor {
    window: CheckWindow,
    gate: PowerAlert,
    ring: Arc<dyn RingPublisher>,
    mailer: Arc<dyn MailSender>,
}

impl PowerMonitor {
    pub fn new(
        window: CheckWindow,
        gate: PowerAlert,
        ring: Arc<dyn RingPublisher>,
        mailer: Arc<dyn MailSender>,
    ) -> Self {
        Self {
            window,
            gate,
            ring,
            mailer,
        }
    }

    /// Evaluate one apparent-power sample against the current wall clock.
    pub async fn observe(&mut self, sinst: i64) {
        self.evaluate(Local::now(), sinst).await;
    }

    /// Split from [`observe`](Self::observe) so tests can control the clock.
    pub async fn evaluate(&mut self, now: DateTime<Local>, sinst: i64) {
        if !self.gate.observe(self.window.armed(now), sinst) {
            return;
        }
        warn!(sinst, "apparent power alert");

        let payload = json!({ "number": ALERT_STRIKES }).to_string();
        if let Err(e) = self
            .ring
            .publish_once(topics::DOORBELL_RING, payload.into_bytes())
            .await
        {
            error!(error = %e, "alert ring publish failed");
        }
        if let Err(e) = self
            .mailer
            .send("Power consumption alert!", "Unusual apparent power draw")
            .await
        {
            error!(error = %e, "alert mail failed");
        }
    }
}
