use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::{ReminderError, ReminderResult};

pub const MAX_REMINDERS_PER_DAY: u8 = 10;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReminderMode {
    Fixed,
    Random,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReminderPreference {
    pub enabled: bool,
    pub mode: ReminderMode,
    pub count: u8,
    #[serde(default, with = "hhmm_list")]
    pub fixed_times: Vec<NaiveTime>,
}

impl ReminderPreference {
    pub fn validate(&self) -> ReminderResult<()> {
        if self.count == 0 || self.count > MAX_REMINDERS_PER_DAY {
            return Err(ReminderError::InvalidPreference(format!(
                "count must be between 1 and {MAX_REMINDERS_PER_DAY}, got {}",
                self.count
            )));
        }
        if self.mode == ReminderMode::Fixed && self.fixed_times.len() < self.count as usize {
            return Err(ReminderError::InvalidPreference(format!(
                "{} fixed times given for {} reminders",
                self.fixed_times.len(),
                self.count
            )));
        }
        Ok(())
    }

    /// The fixed slots actually in use: the first `count` entries.
    pub fn active_fixed_times(&self) -> &[NaiveTime] {
        let used = (self.count as usize).min(self.fixed_times.len());
        &self.fixed_times[..used]
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Success,
    Failed,
    Error,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationSlot {
    First,
    Second,
}

#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub user_id: String,
    pub channel_id: String,
    pub message: String,
    pub sent_at: DateTime<Utc>,
    pub status: DeliveryStatus,
    pub slot: NotificationSlot,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTimerRow {
    pub id: Uuid,
    pub user_id: String,
    pub min_seconds: u32,
    pub max_seconds: u32,
    pub next_notification_at: DateTime<Utc>,
    pub is_active: bool,
    pub is_paused: bool,
}

impl ServerTimerRow {
    pub fn is_running(&self) -> bool {
        self.is_active && !self.is_paused
    }
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PushChannelData {
    pub channel_id: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TimerRequest {
    pub min_seconds: u32,
    pub max_seconds: u32,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct TimerStateRequest {
    pub is_active: bool,
    pub is_paused: bool,
}

/// `"HH:MM"` strings on the wire, `NaiveTime` in memory.
mod hhmm_list {
    use chrono::NaiveTime;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(times: &[NaiveTime], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(times.iter().map(|t| t.format("%H:%M").to_string()))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<NaiveTime>, D::Error> {
        let raw = Vec::<String>::deserialize(deserializer)?;
        raw.iter()
            .map(|s| NaiveTime::parse_from_str(s, "%H:%M").map_err(|_| D::Error::custom(format!("invalid time of day: {s}"))))
            .collect()
    }
}
