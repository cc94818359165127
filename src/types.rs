use std::sync::Arc;

use chrono::Duration;

use crate::clock::Clock;
use crate::push::PushSender;
use crate::store::{ChannelDirectory, DeliveryLog, MemoryStore, PreferenceStore, TimerStore};

/// Everything a worker invocation needs, passed explicitly.
pub struct ReminderContext {
    pub preferences: Arc<dyn PreferenceStore>,
    pub deliveries: Arc<dyn DeliveryLog>,
    pub timers: Arc<dyn TimerStore>,
    pub channels: Arc<dyn ChannelDirectory>,
    pub push: Arc<dyn PushSender>,
    pub clock: Arc<dyn Clock>,
    /// Cadence the dispatch loop is invoked at; bounds the second-notification window.
    pub dispatch_interval: Duration,
}

impl ReminderContext {
    pub fn with_store(
        store: Arc<MemoryStore>,
        push: Arc<dyn PushSender>,
        clock: Arc<dyn Clock>,
        dispatch_interval: Duration,
    ) -> Self {
        ReminderContext {
            preferences: store.clone(),
            deliveries: store.clone(),
            timers: store.clone(),
            channels: store,
            push,
            clock,
            dispatch_interval,
        }
    }
}

pub type SharedContext = Arc<ReminderContext>;
