use std::collections::HashMap;
use std::path::PathBuf;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::errors::ReminderResult;
use crate::models::{DeliveryLogEntry, ReminderPreference, ServerTimerRow};

#[async_trait]
pub trait PreferenceStore: Send + Sync {
    async fn save_preference(&self, user_id: &str, preference: ReminderPreference) -> ReminderResult<()>;

    async fn preference(&self, user_id: &str) -> ReminderResult<Option<ReminderPreference>>;

    /// Returns false when the user has no stored preference.
    async fn set_enabled(&self, user_id: &str, enabled: bool) -> ReminderResult<bool>;

    async fn enabled_preferences(&self) -> ReminderResult<Vec<(String, ReminderPreference)>>;
}

/// Append-only record of delivery attempts.
#[async_trait]
pub trait DeliveryLog: Send + Sync {
    async fn append(&self, entry: DeliveryLogEntry) -> ReminderResult<()>;

    /// Entries for `user_id` with `sent_at >= since`, oldest first.
    async fn entries_since(&self, user_id: &str, since: DateTime<Utc>) -> ReminderResult<Vec<DeliveryLogEntry>>;
}

#[async_trait]
pub trait TimerStore: Send + Sync {
    /// Running rows whose `next_notification_at <= now`.
    async fn due_timers(&self, now: DateTime<Utc>) -> ReminderResult<Vec<ServerTimerRow>>;

    /// Inserts the row, or replaces the user's existing row with the same bounds (keeping its id).
    async fn upsert_timer(&self, row: ServerTimerRow) -> ReminderResult<ServerTimerRow>;

    async fn timer(&self, id: Uuid) -> ReminderResult<Option<ServerTimerRow>>;

    /// Stores `row` only if the stored row still equals `expected`.
    async fn replace_timer(&self, expected: &ServerTimerRow, row: ServerTimerRow) -> ReminderResult<bool>;

    /// Moves `next_notification_at` to `next` only if it still equals `expected`.
    async fn advance_timer(&self, id: Uuid, expected: DateTime<Utc>, next: DateTime<Utc>) -> ReminderResult<bool>;
}

/// user id -> push channel id
#[async_trait]
pub trait ChannelDirectory: Send + Sync {
    async fn set_channel(&self, user_id: &str, channel_id: &str) -> ReminderResult<()>;

    async fn channel_for(&self, user_id: &str) -> ReminderResult<Option<String>>;
}

#[derive(Default, Clone, Serialize, Deserialize)]
struct Snapshot {
    preferences: HashMap<String, ReminderPreference>,
    channels: HashMap<String, String>,
    deliveries: Vec<DeliveryLogEntry>,
    timers: HashMap<Uuid, ServerTimerRow>,
}

/// Keeps everything in memory, optionally mirrored to a JSON snapshot file.
/// A mutation only becomes visible once the snapshot write succeeded.
pub struct MemoryStore {
    data: RwLock<Snapshot>,
    path: Option<PathBuf>,
}

impl MemoryStore {
    pub fn in_memory() -> Self {
        MemoryStore { data: RwLock::new(Snapshot::default()), path: None }
    }

    pub async fn open(path: PathBuf) -> ReminderResult<Self> {
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => {
                let snapshot: Snapshot = serde_json::from_slice(&bytes)?;
                info!(
                    "Loaded store from {}: {} preferences, {} timers, {} log entries",
                    path.display(),
                    snapshot.preferences.len(),
                    snapshot.timers.len(),
                    snapshot.deliveries.len()
                );
                snapshot
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No store at {}, starting empty", path.display());
                Snapshot::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(MemoryStore { data: RwLock::new(snapshot), path: Some(path) })
    }

    async fn mutate<T, F>(&self, f: F) -> ReminderResult<T>
    where
        F: FnOnce(&mut Snapshot) -> T,
    {
        let mut guard = self.data.write().await;
        let Some(path) = &self.path else {
            return Ok(f(&mut *guard));
        };

        let mut next = guard.clone();
        let out = f(&mut next);
        let bytes = serde_json::to_vec_pretty(&next)?;
        let tmp = path.with_extension("tmp");
        let written = async {
            tokio::fs::write(&tmp, &bytes).await?;
            tokio::fs::rename(&tmp, path).await
        }
        .await;
        if let Err(e) = written {
            error!("Store snapshot write to {} failed: {}", path.display(), e);
            return Err(e.into());
        }
        *guard = next;
        Ok(out)
    }
}

#[async_trait]
impl PreferenceStore for MemoryStore {
    async fn save_preference(&self, user_id: &str, preference: ReminderPreference) -> ReminderResult<()> {
        self.mutate(|data| {
            data.preferences.insert(user_id.to_string(), preference);
        })
        .await
    }

    async fn preference(&self, user_id: &str) -> ReminderResult<Option<ReminderPreference>> {
        Ok(self.data.read().await.preferences.get(user_id).cloned())
    }

    async fn set_enabled(&self, user_id: &str, enabled: bool) -> ReminderResult<bool> {
        if !self.data.read().await.preferences.contains_key(user_id) {
            return Ok(false);
        }
        self.mutate(|data| match data.preferences.get_mut(user_id) {
            Some(pref) => {
                pref.enabled = enabled;
                true
            }
            None => false,
        })
        .await
    }

    async fn enabled_preferences(&self) -> ReminderResult<Vec<(String, ReminderPreference)>> {
        let data = self.data.read().await;
        let mut out: Vec<_> = data
            .preferences
            .iter()
            .filter(|(_, pref)| pref.enabled)
            .map(|(user, pref)| (user.clone(), pref.clone()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(out)
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn append(&self, entry: DeliveryLogEntry) -> ReminderResult<()> {
        self.mutate(|data| data.deliveries.push(entry)).await
    }

    async fn entries_since(&self, user_id: &str, since: DateTime<Utc>) -> ReminderResult<Vec<DeliveryLogEntry>> {
        let data = self.data.read().await;
        let mut out: Vec<_> = data
            .deliveries
            .iter()
            .filter(|e| e.user_id == user_id && e.sent_at >= since)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.sent_at);
        Ok(out)
    }
}

#[async_trait]
impl TimerStore for MemoryStore {
    async fn due_timers(&self, now: DateTime<Utc>) -> ReminderResult<Vec<ServerTimerRow>> {
        let data = self.data.read().await;
        let mut out: Vec<_> = data
            .timers
            .values()
            .filter(|row| row.is_running() && row.next_notification_at <= now)
            .cloned()
            .collect();
        out.sort_by_key(|row| row.next_notification_at);
        Ok(out)
    }

    async fn upsert_timer(&self, row: ServerTimerRow) -> ReminderResult<ServerTimerRow> {
        self.mutate(|data| {
            let existing = data
                .timers
                .values()
                .find(|r| r.user_id == row.user_id && r.min_seconds == row.min_seconds && r.max_seconds == row.max_seconds)
                .map(|r| r.id);
            let stored = ServerTimerRow { id: existing.unwrap_or(row.id), ..row };
            data.timers.insert(stored.id, stored.clone());
            stored
        })
        .await
    }

    async fn timer(&self, id: Uuid) -> ReminderResult<Option<ServerTimerRow>> {
        Ok(self.data.read().await.timers.get(&id).cloned())
    }

    async fn replace_timer(&self, expected: &ServerTimerRow, row: ServerTimerRow) -> ReminderResult<bool> {
        let id = row.id;
        let replaced = self
            .mutate(|data| match data.timers.get_mut(&id) {
                Some(stored) if stored == expected => {
                    *stored = row;
                    true
                }
                _ => false,
            })
            .await?;
        if !replaced {
            debug!("Timer {id} changed since it was read, not replacing");
        }
        Ok(replaced)
    }

    async fn advance_timer(&self, id: Uuid, expected: DateTime<Utc>, next: DateTime<Utc>) -> ReminderResult<bool> {
        let advanced = self
            .mutate(|data| match data.timers.get_mut(&id) {
                Some(row) if row.next_notification_at == expected => {
                    row.next_notification_at = next;
                    true
                }
                _ => false,
            })
            .await?;
        if !advanced {
            debug!("Timer {id} moved by another invocation, not advancing");
        }
        Ok(advanced)
    }
}

#[async_trait]
impl ChannelDirectory for MemoryStore {
    async fn set_channel(&self, user_id: &str, channel_id: &str) -> ReminderResult<()> {
        self.mutate(|data| {
            data.channels.insert(user_id.to_string(), channel_id.to_string());
        })
        .await
    }

    async fn channel_for(&self, user_id: &str) -> ReminderResult<Option<String>> {
        Ok(self.data.read().await.channels.get(user_id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DeliveryStatus, NotificationSlot, ReminderMode};
    use chrono::TimeZone;
    use tempfile::tempdir;

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, h, m, 0).unwrap()
    }

    fn row(user: &str, next: DateTime<Utc>) -> ServerTimerRow {
        ServerTimerRow {
            id: Uuid::new_v4(),
            user_id: user.into(),
            min_seconds: 60,
            max_seconds: 120,
            next_notification_at: next,
            is_active: true,
            is_paused: false,
        }
    }

    #[tokio::test]
    async fn only_running_due_rows_are_selected() {
        let store = MemoryStore::in_memory();
        let due = store.upsert_timer(row("a", at(9, 0))).await.unwrap();
        store.upsert_timer(row("b", at(11, 0))).await.unwrap();
        let mut paused = row("c", at(8, 0));
        paused.is_paused = true;
        store.upsert_timer(paused).await.unwrap();

        let rows = store.due_timers(at(10, 0)).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, due.id);
    }

    #[tokio::test]
    async fn upsert_reuses_id_for_same_bounds() {
        let store = MemoryStore::in_memory();
        let first = store.upsert_timer(row("a", at(9, 0))).await.unwrap();
        let second = store.upsert_timer(row("a", at(12, 0))).await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(store.timer(first.id).await.unwrap().unwrap().next_notification_at, at(12, 0));
    }

    #[tokio::test]
    async fn advance_is_conditional_on_the_read_value() {
        let store = MemoryStore::in_memory();
        let r = store.upsert_timer(row("a", at(9, 0))).await.unwrap();

        assert!(store.advance_timer(r.id, at(9, 0), at(9, 30)).await.unwrap());
        assert!(!store.advance_timer(r.id, at(9, 0), at(9, 45)).await.unwrap());
        assert_eq!(store.timer(r.id).await.unwrap().unwrap().next_notification_at, at(9, 30));
    }

    #[tokio::test]
    async fn replace_loses_to_a_concurrent_advance() {
        let store = MemoryStore::in_memory();
        let read = store.upsert_timer(row("a", at(9, 0))).await.unwrap();
        let paused = ServerTimerRow { is_paused: true, ..read.clone() };

        assert!(store.advance_timer(read.id, at(9, 0), at(9, 30)).await.unwrap());
        assert!(!store.replace_timer(&read, paused.clone()).await.unwrap());
        let stored = store.timer(read.id).await.unwrap().unwrap();
        assert!(!stored.is_paused);
        assert_eq!(stored.next_notification_at, at(9, 30));

        let fresh = ServerTimerRow { is_paused: true, ..stored.clone() };
        assert!(store.replace_timer(&stored, fresh).await.unwrap());
        assert!(store.timer(read.id).await.unwrap().unwrap().is_paused);
    }

    #[tokio::test]
    async fn set_enabled_on_unknown_user_reports_false() {
        let store = MemoryStore::in_memory();
        assert!(!store.set_enabled("ghost", false).await.unwrap());

        let pref = ReminderPreference { enabled: true, mode: ReminderMode::Random, count: 2, fixed_times: vec![] };
        store.save_preference("u1", pref).await.unwrap();
        assert_eq!(store.enabled_preferences().await.unwrap().len(), 1);
        assert!(store.set_enabled("u1", false).await.unwrap());
        assert!(store.enabled_preferences().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshot_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("store.json");

        {
            let store = MemoryStore::open(path.clone()).await.unwrap();
            store.set_channel("u1", "player-1").await.unwrap();
            store
                .append(DeliveryLogEntry {
                    user_id: "u1".into(),
                    channel_id: "player-1".into(),
                    message: "hello".into(),
                    sent_at: at(9, 0),
                    status: DeliveryStatus::Success,
                    slot: NotificationSlot::First,
                })
                .await
                .unwrap();
        }

        let store = MemoryStore::open(path).await.unwrap();
        assert_eq!(store.channel_for("u1").await.unwrap().as_deref(), Some("player-1"));
        assert_eq!(store.entries_since("u1", at(0, 0)).await.unwrap().len(), 1);
        assert!(store.entries_since("u1", at(9, 1)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn failed_snapshot_write_leaves_state_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("missing-dir").join("store.json");
        let store = MemoryStore::open(path).await.unwrap();

        assert!(store.set_channel("u1", "player-1").await.is_err());
        assert!(store.channel_for("u1").await.unwrap().is_none());
    }
}
