// Server twin of the countdown: fires expired timer rows and moves each one to
// its next random slot, whether or not the push went through.

use chrono::{DateTime, Duration, Utc};
use log::{debug, error, info, warn};
use serde::Serialize;
use uuid::Uuid;

use crate::errors::ReminderResult;
use crate::messages::{random_phrase, AMBIENT_TITLE};
use crate::models::ServerTimerRow;
use crate::types::ReminderContext;
use crate::util::{draw_seconds, get_short_token};

#[derive(Serialize, Default, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileReport {
    pub processed: usize,
    pub delivered: usize,
    pub failed: usize,
    pub skipped_no_channel: usize,
    /// Rows another invocation advanced first.
    pub contended: usize,
}

pub fn next_notification_at(row: &ServerTimerRow, now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = draw_seconds(&mut rand::thread_rng(), row.min_seconds, row.max_seconds);
    now + Duration::seconds(secs as i64)
}

/// Fresh row for `user_id`, armed from `now`.
pub fn new_timer_row(user_id: &str, min_seconds: u32, max_seconds: u32, now: DateTime<Utc>) -> ServerTimerRow {
    let mut row = ServerTimerRow {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        min_seconds,
        max_seconds,
        next_notification_at: now,
        is_active: true,
        is_paused: false,
    };
    row.next_notification_at = next_notification_at(&row, now);
    row
}

pub async fn run_reconciliation(ctx: &ReminderContext) -> ReminderResult<ReconcileReport> {
    ctx.push.ensure_configured()?;

    let now = ctx.clock.now();
    let mut report = ReconcileReport::default();

    for row in ctx.timers.due_timers(now).await? {
        report.processed += 1;

        // Claim the row by advancing it; only the invocation that moved it delivers.
        let next = next_notification_at(&row, now);
        match ctx.timers.advance_timer(row.id, row.next_notification_at, next).await {
            Ok(true) => {}
            Ok(false) => {
                report.contended += 1;
                continue;
            }
            Err(e) => {
                error!("reconcile:: timer {} could not be advanced: {}", row.id, e);
                report.failed += 1;
                continue;
            }
        }

        let channel_id = match ctx.channels.channel_for(&row.user_id).await {
            Ok(Some(channel_id)) => channel_id,
            Ok(None) => {
                debug!("reconcile:: {} has no push channel, timer {} advanced silently", row.user_id, row.id);
                report.skipped_no_channel += 1;
                continue;
            }
            Err(e) => {
                error!("reconcile:: cannot resolve push channel for {}: {}", row.user_id, e);
                report.failed += 1;
                continue;
            }
        };

        let body = random_phrase(&mut rand::thread_rng());
        match ctx.push.send(&channel_id, AMBIENT_TITLE, body).await {
            Ok(outcome) if outcome.success => report.delivered += 1,
            Ok(outcome) => {
                warn!("reconcile:: gateway rejected timer {} for ...{}: {}", row.id, get_short_token(&channel_id), outcome.provider_response);
                report.failed += 1;
            }
            Err(e) => {
                warn!("reconcile:: timer {} for ...{} not sent: {}", row.id, get_short_token(&channel_id), e);
                report.failed += 1;
            }
        }
    }

    info!(
        "reconcile:: {} timers processed, {} delivered, {} failed, {} without channel, {} contended",
        report.processed, report.delivered, report.failed, report.skipped_no_channel, report.contended
    );
    Ok(report)
}
