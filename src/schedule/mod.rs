//! Dosing schedule for the pill box compartments
//!
//! Each box has a dosing period. When a box becomes due its LED is switched
//! on; marking the dose as taken switches it off and resets the device-side
//! timer. Commands go out through a [`CommandSubmitter`]; a dropped LED-on
//! is retried on the next tick, and a dropped LED-off or reset stays pending
//! on the box until a tick or period sync delivers it.

use crate::config::PillBoxConfig;
use crate::protocol::Command;
use crate::relay::{CommandSubmitter, SubmitOutcome};
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn, Instrument};

/// One pill box compartment and its dosing state
#[derive(Debug, Clone, PartialEq)]
pub struct PillBox {
    pub id: u32,
    pub pin: u8,
    pub period_secs: u32,
    pub last_taken: Option<DateTime<Utc>>,
    pub active: bool,
    /// LED-on already delivered for the current due period
    alerted: bool,
    /// LED-off from the last dose not yet delivered
    pending_off: bool,
    /// Timer reset from the last dose not yet delivered
    pending_reset: bool,
}

impl PillBox {
    pub fn new(id: u32, pin: u8, period_secs: u32) -> Self {
        Self {
            id,
            pin,
            period_secs,
            last_taken: None,
            active: true,
            alerted: false,
            pending_off: false,
            pending_reset: false,
        }
    }

    pub fn period(&self) -> chrono::Duration {
        chrono::Duration::seconds(i64::from(self.period_secs))
    }

    /// When the next dose is due; a box never taken is due immediately
    pub fn next_due(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        match self.last_taken {
            Some(taken) => taken + self.period(),
            None => now,
        }
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.active && now >= self.next_due(now)
    }

    pub fn is_alerted(&self) -> bool {
        self.alerted
    }

    /// A taken dose whose LED-off or reset has not reached the device
    pub fn has_pending_commands(&self) -> bool {
        self.pending_off || self.pending_reset
    }
}

impl From<&PillBoxConfig> for PillBox {
    fn from(config: &PillBoxConfig) -> Self {
        Self {
            active: config.active,
            ..Self::new(config.id, config.pin, config.period_secs)
        }
    }
}

/// Schedule errors
#[derive(Debug, Error, PartialEq)]
pub enum ScheduleError {
    #[error("Unknown pill box {0}")]
    UnknownBox(u32),
    #[error("Dosing period must be greater than zero (box {0})")]
    InvalidPeriod(u32),
}

/// Evaluates the dosing schedule and drives box LEDs through a submitter
pub struct ScheduleEvaluator<S: CommandSubmitter> {
    boxes: Mutex<Vec<PillBox>>,
    submitter: S,
}

impl<S: CommandSubmitter> ScheduleEvaluator<S> {
    pub fn new(submitter: S, boxes: Vec<PillBox>) -> Self {
        Self {
            boxes: Mutex::new(boxes),
            submitter,
        }
    }

    pub fn from_config(submitter: S, boxes: &[PillBoxConfig]) -> Self {
        Self::new(submitter, boxes.iter().map(PillBox::from).collect())
    }

    /// Snapshot of all boxes
    pub async fn boxes(&self) -> Vec<PillBox> {
        self.boxes.lock().await.clone()
    }

    pub async fn get(&self, id: u32) -> Option<PillBox> {
        self.boxes.lock().await.iter().find(|b| b.id == id).cloned()
    }

    /// Switch on the LED of every box that became due since the last tick
    ///
    /// Returns the ids of boxes whose LED command was delivered.
    pub async fn tick(&self, now: DateTime<Utc>) -> Vec<u32> {
        self.resend_pending().await;

        let due: Vec<(u32, u8)> = self
            .boxes
            .lock()
            .await
            .iter()
            .filter(|b| b.is_due(now) && !b.alerted)
            .map(|b| (b.id, b.pin))
            .collect();

        let mut signalled = Vec::new();
        for (id, pin) in due {
            match self.submitter.submit(Command::SetLed { pin, on: true }).await {
                SubmitOutcome::Published => {
                    info!(box_id = id, pin, "Dose due, LED switched on");
                    signalled.push(id);
                }
                SubmitOutcome::Dropped => {
                    debug!(box_id = id, pin, "Dose due, LED command dropped; retrying next tick");
                }
            }
        }

        if !signalled.is_empty() {
            let mut boxes = self.boxes.lock().await;
            for pill_box in boxes.iter_mut().filter(|b| signalled.contains(&b.id)) {
                pill_box.alerted = true;
            }
        }

        signalled
    }

    /// Record a dose, switch the LED off and reset the device timer
    ///
    /// Returns `Dropped` when either command did not go out; the undelivered
    /// ones stay pending on the box and are resent by `tick` and `sync_periods`.
    pub async fn mark_taken(
        &self,
        id: u32,
        at: DateTime<Utc>,
    ) -> Result<SubmitOutcome, ScheduleError> {
        let pin = {
            let mut boxes = self.boxes.lock().await;
            let pill_box = boxes
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or(ScheduleError::UnknownBox(id))?;
            pill_box.last_taken = Some(at);
            pill_box.alerted = false;
            pill_box.pending_off = true;
            pill_box.pending_reset = true;
            pill_box.pin
        };

        info!(box_id = id, pin, "Dose taken");
        let outcome = self.deliver_dose_taken(id, pin, true, true).await;
        if outcome == SubmitOutcome::Dropped {
            warn!(box_id = id, pin, "LED-off or reset not delivered; will resend");
        }
        Ok(outcome)
    }

    /// Send the LED-off and reset commands still owed for a taken dose
    async fn deliver_dose_taken(
        &self,
        id: u32,
        pin: u8,
        led_off: bool,
        reset: bool,
    ) -> SubmitOutcome {
        let off_sent = !led_off
            || self.submitter.submit(Command::SetLed { pin, on: false }).await
                == SubmitOutcome::Published;
        let reset_sent = !reset
            || self.submitter.submit(Command::Reset { pin }).await == SubmitOutcome::Published;

        if let Some(pill_box) = self.boxes.lock().await.iter_mut().find(|b| b.id == id) {
            if off_sent {
                pill_box.pending_off = false;
            }
            if reset_sent {
                pill_box.pending_reset = false;
            }
        }

        if off_sent && reset_sent {
            SubmitOutcome::Published
        } else {
            SubmitOutcome::Dropped
        }
    }

    /// Retry LED-off and reset commands an earlier `mark_taken` could not deliver
    async fn resend_pending(&self) {
        let pending: Vec<(u32, u8, bool, bool)> = self
            .boxes
            .lock()
            .await
            .iter()
            .filter(|b| b.has_pending_commands())
            .map(|b| (b.id, b.pin, b.pending_off, b.pending_reset))
            .collect();

        for (id, pin, led_off, reset) in pending {
            if self.deliver_dose_taken(id, pin, led_off, reset).await == SubmitOutcome::Published {
                info!(box_id = id, pin, "Pending dose commands delivered");
            }
        }
    }

    /// Change a box's dosing period and push it to the device
    pub async fn set_period(&self, id: u32, seconds: u32) -> Result<SubmitOutcome, ScheduleError> {
        if seconds == 0 {
            return Err(ScheduleError::InvalidPeriod(id));
        }

        let pin = {
            let mut boxes = self.boxes.lock().await;
            let pill_box = boxes
                .iter_mut()
                .find(|b| b.id == id)
                .ok_or(ScheduleError::UnknownBox(id))?;
            pill_box.period_secs = seconds;
            pill_box.pin
        };

        Ok(self
            .submitter
            .submit(Command::SetPeriod { pin, seconds })
            .await)
    }

    /// Push the period of every active box to the device
    ///
    /// Returns how many updates were delivered.
    pub async fn sync_periods(&self) -> usize {
        self.resend_pending().await;

        let periods: Vec<(u8, u32)> = self
            .boxes
            .lock()
            .await
            .iter()
            .filter(|b| b.active)
            .map(|b| (b.pin, b.period_secs))
            .collect();

        let mut delivered = 0;
        for (pin, seconds) in periods {
            if self
                .submitter
                .submit(Command::SetPeriod { pin, seconds })
                .await
                == SubmitOutcome::Published
            {
                delivered += 1;
            }
        }
        debug!(delivered, "Dosing periods synchronised");
        delivered
    }

    /// Tick at a fixed interval until `shutdown` turns true or its sender is dropped
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        let span = crate::schedule_span!(interval_secs = interval.as_secs());
        async {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        self.tick(Utc::now()).await;
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            info!("Schedule loop stopped");
        }
        .instrument(span)
        .await
    }
}
