// Self-rearming ad-hoc countdown. The persisted absolute expiry is the source
// of truth: start and resume read it back, ticks count down against the wall
// clock, and an expiry is only re-armed if the store agrees it has passed.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::clock::Clock;
use crate::errors::{ReminderError, ReminderResult};
use crate::messages::{random_phrase, AMBIENT_TITLE};
use crate::push::PushSender;
use crate::util::{draw_seconds, get_short_token};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CountdownConfig {
    pub min_seconds: u32,
    pub max_seconds: u32,
}

impl CountdownConfig {
    pub const SHORT: CountdownConfig = CountdownConfig { min_seconds: 15 * 60, max_seconds: 45 * 60 };
    pub const LONG: CountdownConfig = CountdownConfig { min_seconds: 2 * 60 * 60, max_seconds: 4 * 60 * 60 };

    pub fn owner_key(&self) -> String {
        format!("countdown_end_{}_{}", self.min_seconds, self.max_seconds)
    }
}

/// Durable key-value storage for countdown end timestamps.
pub trait CountdownStore: Send + Sync {
    fn load_end(&self, key: &str) -> ReminderResult<Option<DateTime<Utc>>>;
    fn save_end(&self, key: &str, ends_at: DateTime<Utc>) -> ReminderResult<()>;
}

/// All countdowns in one JSON object on disk.
pub struct FileCountdownStore {
    path: PathBuf,
}

impl FileCountdownStore {
    pub fn new(path: PathBuf) -> Self {
        FileCountdownStore { path }
    }

    fn read_all(&self) -> ReminderResult<HashMap<String, DateTime<Utc>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(HashMap::new()),
            Err(e) => Err(e.into()),
        }
    }
}

impl CountdownStore for FileCountdownStore {
    fn load_end(&self, key: &str) -> ReminderResult<Option<DateTime<Utc>>> {
        Ok(self.read_all()?.get(key).copied())
    }

    fn save_end(&self, key: &str, ends_at: DateTime<Utc>) -> ReminderResult<()> {
        let mut all = self.read_all()?;
        all.insert(key.to_string(), ends_at);
        let tmp = self.path.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_vec(&all)?)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// Receives a countdown's expiry.
#[async_trait]
pub trait CountdownSink: Send + Sync {
    async fn deliver(&self, owner_key: &str) -> ReminderResult<()>;
}

/// Delivers expiries as a push with a random short phrase.
pub struct PushCountdownSink {
    push: Arc<dyn PushSender>,
    channel_id: String,
}

impl PushCountdownSink {
    pub fn new(push: Arc<dyn PushSender>, channel_id: String) -> Self {
        PushCountdownSink { push, channel_id }
    }
}

#[async_trait]
impl CountdownSink for PushCountdownSink {
    async fn deliver(&self, owner_key: &str) -> ReminderResult<()> {
        let body = random_phrase(&mut rand::thread_rng());
        let outcome = self.push.send(&self.channel_id, AMBIENT_TITLE, body).await?;
        if !outcome.success {
            return Err(ReminderError::Transport(outcome.provider_response));
        }
        debug!("countdown:: {} delivered to ...{}", owner_key, get_short_token(&self.channel_id));
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Idle,
    Running(i64),
    /// Expired and already re-armed; the caller delivers.
    Fired,
}

pub struct CountdownTimer {
    config: CountdownConfig,
    key: String,
    store: Arc<dyn CountdownStore>,
    clock: Arc<dyn Clock>,
    rng: StdRng,
    ends_at: Option<DateTime<Utc>>,
    remaining: i64,
    active: bool,
    paused: bool,
}

impl CountdownTimer {
    pub fn new(config: CountdownConfig, store: Arc<dyn CountdownStore>, clock: Arc<dyn Clock>) -> Self {
        CountdownTimer::with_rng(config, store, clock, StdRng::from_entropy())
    }

    pub fn with_rng(config: CountdownConfig, store: Arc<dyn CountdownStore>, clock: Arc<dyn Clock>, rng: StdRng) -> Self {
        CountdownTimer {
            key: config.owner_key(),
            config,
            store,
            clock,
            rng,
            ends_at: None,
            remaining: 0,
            active: false,
            paused: false,
        }
    }

    pub fn remaining(&self) -> i64 {
        self.remaining
    }

    pub fn ends_at(&self) -> Option<DateTime<Utc>> {
        self.ends_at
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    pub fn owner_key(&self) -> &str {
        &self.key
    }

    /// Picks up a pending expiry if there is one, otherwise arms a fresh one.
    /// Calling it again while an expiry is pending never redraws.
    pub fn initialize(&mut self) -> ReminderResult<i64> {
        self.resume_or_rearm()?;
        Ok(self.remaining)
    }

    pub fn start(&mut self) -> ReminderResult<()> {
        self.resume_or_rearm()?;
        self.active = true;
        self.paused = false;
        info!("countdown:: {} started, {}s remaining", self.key, self.remaining);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.paused = false;
    }

    /// Returns the new paused state. Resuming reads the persisted expiry, not the in-memory counter.
    pub fn toggle_pause(&mut self) -> ReminderResult<bool> {
        if self.paused {
            self.resume_or_rearm()?;
            self.paused = false;
            debug!("countdown:: {} resumed, {}s remaining", self.key, self.remaining);
        } else {
            self.paused = true;
            debug!("countdown:: {} paused", self.key);
        }
        Ok(self.paused)
    }

    pub fn tick(&mut self) -> ReminderResult<TickOutcome> {
        if !self.active || self.paused {
            return Ok(TickOutcome::Idle);
        }
        let now = self.clock.now();
        match self.ends_at {
            Some(end) if now < end => {
                self.remaining = (end - now).num_seconds();
                Ok(TickOutcome::Running(self.remaining))
            }
            _ => match self.store.load_end(&self.key)? {
                // another instance over the same key re-armed first
                Some(end) if now < end => {
                    self.ends_at = Some(end);
                    self.remaining = (end - now).num_seconds();
                    debug!("countdown:: {} already re-armed elsewhere", self.key);
                    Ok(TickOutcome::Running(self.remaining))
                }
                _ => {
                    self.rearm(now)?;
                    Ok(TickOutcome::Fired)
                }
            },
        }
    }

    /// Ticks once per second until a cancel message arrives (or the sender is dropped).
    pub async fn run(&mut self, sink: &dyn CountdownSink, mut cancel: mpsc::Receiver<bool>) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = interval.tick() => {}
                _ = cancel.recv() => {
                    debug!("countdown:: {} loop canceled", self.key);
                    break;
                }
            }

            match self.tick() {
                Ok(TickOutcome::Fired) => {
                    if let Err(e) = sink.deliver(&self.key).await {
                        warn!("countdown:: {} delivery failed: {}", self.key, e);
                    }
                }
                Ok(_) => {}
                Err(e) => error!("countdown:: {} could not re-arm: {}", self.key, e),
            }
        }
    }

    fn resume_or_rearm(&mut self) -> ReminderResult<()> {
        let now = self.clock.now();
        match self.store.load_end(&self.key)? {
            Some(end) if now < end => {
                self.ends_at = Some(end);
                self.remaining = (end - now).num_seconds();
                Ok(())
            }
            _ => self.rearm(now),
        }
    }

    /// Persists first; in-memory state only moves once the write succeeded.
    fn rearm(&mut self, now: DateTime<Utc>) -> ReminderResult<()> {
        let duration = draw_seconds(&mut self.rng, self.config.min_seconds, self.config.max_seconds);
        let end = now + chrono::Duration::seconds(duration as i64);
        self.store.save_end(&self.key, end)?;
        self.ends_at = Some(end);
        self.remaining = duration as i64;
        debug!("countdown:: {} armed for {}s", self.key, duration);
        Ok(())
    }
}
