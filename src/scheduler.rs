// Device-side daily reminders: fixed clock times or random draws inside the
// daytime window, submitted to the local notification subsystem as a full
// replacement of whatever this feature scheduled before.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, NaiveTime, Timelike};
use log::{debug, info, warn};
use rand::Rng;

use crate::clock::Clock;
use crate::errors::{ReminderError, ReminderResult};
use crate::messages::{encouragement_for_slot, REMINDER_TITLE};
use crate::models::{ReminderMode, ReminderPreference};
use crate::store::PreferenceStore;

pub const NOTIFICATION_ID_PREFIX: &str = "intention-reminder-";

/// Random draws fall in `[08:00, 20:00)`.
pub const WINDOW_START_MINUTE: u32 = 8 * 60;
pub const WINDOW_END_MINUTE: u32 = 20 * 60;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionStatus {
    Granted,
    Denied,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LocalNotificationRequest {
    pub id: String,
    pub title: String,
    pub body: String,
    pub fire_at: DateTime<FixedOffset>,
    pub repeat_daily: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ScheduledInstant {
    pub slot: usize,
    pub minute_of_day: u32,
    pub fire_at: DateTime<FixedOffset>,
}

/// The device's local notification subsystem.
#[async_trait]
pub trait LocalNotifier: Send + Sync {
    async fn request_permission(&self) -> ReminderResult<PermissionStatus>;

    async fn cancel_all(&self, ids: &[String]) -> ReminderResult<()>;

    async fn schedule(&self, requests: &[LocalNotificationRequest]) -> ReminderResult<()>;

    /// Ids of every pending notification, this feature's or not.
    async fn list_pending(&self) -> ReminderResult<Vec<String>>;
}

pub fn notification_id(slot: usize) -> String {
    format!("{NOTIFICATION_ID_PREFIX}{slot}")
}

/// Today's occurrence of `minute_of_day`, or tomorrow's if that has already passed.
fn next_occurrence(now: DateTime<FixedOffset>, minute_of_day: u32) -> DateTime<FixedOffset> {
    let offset = *now.offset();
    let local = now.date_naive().and_time(NaiveTime::MIN) + Duration::minutes(minute_of_day as i64);
    let utc = local - Duration::seconds(offset.local_minus_utc() as i64);
    let today = DateTime::<FixedOffset>::from_naive_utc_and_offset(utc, offset);
    if today <= now {
        today + Duration::days(1)
    } else {
        today
    }
}

pub fn plan_instants<R: Rng + ?Sized>(
    preference: &ReminderPreference,
    now: DateTime<FixedOffset>,
    rng: &mut R,
) -> Vec<ScheduledInstant> {
    let minutes: Vec<u32> = match preference.mode {
        ReminderMode::Random => (0..preference.count)
            .map(|_| rng.gen_range(WINDOW_START_MINUTE..WINDOW_END_MINUTE))
            .collect(),
        ReminderMode::Fixed => preference
            .active_fixed_times()
            .iter()
            .map(|t| t.hour() * 60 + t.minute())
            .collect(),
    };

    minutes
        .into_iter()
        .enumerate()
        .map(|(slot, minute_of_day)| ScheduledInstant {
            slot,
            minute_of_day,
            fire_at: next_occurrence(now, minute_of_day),
        })
        .collect()
}

pub struct LocalReminderScheduler {
    notifier: Arc<dyn LocalNotifier>,
    clock: Arc<dyn Clock>,
    offset: FixedOffset,
}

impl LocalReminderScheduler {
    pub fn new(notifier: Arc<dyn LocalNotifier>, clock: Arc<dyn Clock>, offset: FixedOffset) -> Self {
        LocalReminderScheduler { notifier, clock, offset }
    }

    /// Replaces this feature's pending notifications with the ones `preference` calls for.
    /// Callers must not run two of these concurrently for the same user.
    pub async fn apply(&self, preference: &ReminderPreference) -> ReminderResult<Vec<ScheduledInstant>> {
        if !preference.enabled {
            self.cancel_existing().await?;
            return Ok(Vec::new());
        }
        preference.validate()?;

        if self.notifier.request_permission().await? == PermissionStatus::Denied {
            warn!("scheduler:: notification permission denied, nothing scheduled");
            return Err(ReminderError::PermissionDenied);
        }

        self.cancel_existing().await?;

        let now = self.clock.now().with_timezone(&self.offset);
        let instants = {
            let mut rng = rand::thread_rng();
            plan_instants(preference, now, &mut rng)
        };

        let requests: Vec<LocalNotificationRequest> = instants
            .iter()
            .map(|instant| LocalNotificationRequest {
                id: notification_id(instant.slot),
                title: REMINDER_TITLE.to_string(),
                body: encouragement_for_slot(instant.slot).to_string(),
                fire_at: instant.fire_at,
                repeat_daily: true,
            })
            .collect();

        if let Err(e) = self.notifier.schedule(&requests).await {
            warn!("scheduler:: scheduling {} reminders failed: {}", requests.len(), e);
            return Err(match e {
                ReminderError::Scheduling(_) => e,
                other => ReminderError::Scheduling(other.to_string()),
            });
        }

        info!("scheduler:: {} {:?} reminders scheduled", instants.len(), preference.mode);
        Ok(instants)
    }

    pub async fn cancel_existing(&self) -> ReminderResult<usize> {
        let ids: Vec<String> = self
            .notifier
            .list_pending()
            .await?
            .into_iter()
            .filter(|id| id.starts_with(NOTIFICATION_ID_PREFIX))
            .collect();
        if !ids.is_empty() {
            self.notifier.cancel_all(&ids).await?;
        }
        debug!("scheduler:: canceled {} pending reminders", ids.len());
        Ok(ids.len())
    }
}

/// Turns reminders off on both sides: local notifications first, then the stored preference
/// so the next dispatch tick skips the user.
pub async fn disable_reminders(
    scheduler: &LocalReminderScheduler,
    preferences: &dyn PreferenceStore,
    user_id: &str,
) -> ReminderResult<()> {
    scheduler.cancel_existing().await?;
    if !preferences.set_enabled(user_id, false).await? {
        debug!("scheduler:: no stored preference for {user_id}, nothing to disable");
    }
    Ok(())
}
