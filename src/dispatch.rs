// Server dispatch loop: one stateless pass over every enabled fixed-mode
// preference. The delivery log is the only memory between passes.

use chrono::{DateTime, Duration, NaiveTime, TimeZone, Timelike, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;

use crate::errors::ReminderResult;
use crate::messages::{encouragement_for_slot, REMINDER_TITLE};
use crate::models::{DeliveryLogEntry, DeliveryStatus, NotificationSlot, ReminderMode, ReminderPreference};
use crate::types::ReminderContext;
use crate::util::get_short_token;

pub const SECOND_NOTIFICATION_DELAY_HOURS: i64 = 8;

#[derive(Serialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DispatchReport {
    pub users: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped_no_channel: usize,
    /// Sent but missing from the delivery log, so a later pass may send them again.
    pub unlogged: usize,
}

/// Which notification, if any, is due for one user at `now`.
///
/// `today` holds the user's log entries since the start of the UTC day.
/// The second notification fires in `[8h, 8h + tick)` after the first
/// successful one, and at most once a day.
pub fn decide(
    preference: &ReminderPreference,
    now: DateTime<Utc>,
    today: &[DeliveryLogEntry],
    tick: Duration,
) -> Option<NotificationSlot> {
    let mut successes = today.iter().filter(|e| e.status == DeliveryStatus::Success);
    let Some(first) = successes.clone().min_by_key(|e| e.sent_at) else {
        let matches_slot = preference
            .active_fixed_times()
            .iter()
            .any(|t| t.hour() == now.hour() && t.minute() == now.minute());
        return matches_slot.then_some(NotificationSlot::First);
    };

    if successes.any(|e| e.slot == NotificationSlot::Second) {
        return None;
    }
    let elapsed = now - first.sent_at;
    let window_start = Duration::hours(SECOND_NOTIFICATION_DELAY_HOURS);
    (elapsed >= window_start && elapsed < window_start + tick).then_some(NotificationSlot::Second)
}

fn start_of_utc_day(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.from_utc_datetime(&now.date_naive().and_time(NaiveTime::MIN))
}

pub async fn run_dispatch(ctx: &ReminderContext) -> ReminderResult<DispatchReport> {
    ctx.push.ensure_configured()?;

    let now = ctx.clock.now();
    let today = start_of_utc_day(now);
    let mut report = DispatchReport::default();

    let preferences = ctx.preferences.enabled_preferences().await?;
    for (user_id, preference) in preferences.iter().filter(|(_, p)| p.mode == ReminderMode::Fixed) {
        report.users += 1;

        let entries = match ctx.deliveries.entries_since(user_id, today).await {
            Ok(entries) => entries,
            Err(e) => {
                error!("dispatch:: cannot read delivery log for {}: {}", user_id, e);
                report.failed += 1;
                continue;
            }
        };
        let Some(slot) = decide(preference, now, &entries, ctx.dispatch_interval) else {
            continue;
        };

        let channel_id = match ctx.channels.channel_for(user_id).await {
            Ok(Some(channel_id)) => channel_id,
            Ok(None) => {
                debug!("dispatch:: {} has no push channel, skipping {:?}", user_id, slot);
                report.skipped_no_channel += 1;
                continue;
            }
            Err(e) => {
                error!("dispatch:: cannot resolve push channel for {}: {}", user_id, e);
                report.failed += 1;
                continue;
            }
        };

        let message = match slot {
            NotificationSlot::First => encouragement_for_slot(0),
            NotificationSlot::Second => encouragement_for_slot(1),
        };
        let status = match ctx.push.send(&channel_id, REMINDER_TITLE, message).await {
            Ok(outcome) if outcome.success => DeliveryStatus::Success,
            Ok(outcome) => {
                warn!("dispatch:: gateway rejected {:?} for ...{}: {}", slot, get_short_token(&channel_id), outcome.provider_response);
                DeliveryStatus::Failed
            }
            Err(e) => {
                warn!("dispatch:: {:?} for ...{} not sent: {}", slot, get_short_token(&channel_id), e);
                DeliveryStatus::Error
            }
        };

        let sent = status == DeliveryStatus::Success;
        let entry = DeliveryLogEntry {
            user_id: user_id.clone(),
            channel_id,
            message: message.to_string(),
            sent_at: now,
            status,
            slot,
        };
        match ctx.deliveries.append(entry).await {
            Ok(()) if sent => report.delivered += 1,
            Ok(()) => report.failed += 1,
            Err(e) => {
                error!("dispatch:: {:?} attempt for {} was not logged: {}", slot, user_id, e);
                report.unlogged += 1;
                if !sent {
                    report.failed += 1;
                }
            }
        }
    }

    info!(
        "dispatch:: {} users checked, {} delivered, {} failed, {} without channel, {} unlogged",
        report.users, report.delivered, report.failed, report.skipped_no_channel, report.unlogged
    );
    Ok(report)
}
