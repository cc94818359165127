use log::{debug, error};
use tokio::sync::mpsc;
use tokio::time::Duration;

use crate::dispatch::{run_dispatch, DispatchReport};
use crate::errors::ReminderResult;
use crate::reconcile::{run_reconciliation, ReconcileReport};
use crate::types::{ReminderContext, SharedContext};

/// Both workers side by side. They share no state.
pub async fn run_workers(ctx: &ReminderContext) -> (ReminderResult<DispatchReport>, ReminderResult<ReconcileReport>) {
    tokio::join!(run_dispatch(ctx), run_reconciliation(ctx))
}

/// One loop tick. Failures are logged and the loop carries on.
pub async fn run_tick(ctx: &ReminderContext) {
    let (dispatch, reconcile) = run_workers(ctx).await;
    match dispatch {
        Ok(report) => debug!("polling:: dispatch delivered {}", report.delivered),
        Err(e) => error!("polling:: dispatch failed: {}", e),
    }
    match reconcile {
        Ok(report) => debug!("polling:: reconcile delivered {}", report.delivered),
        Err(e) => error!("polling:: reconcile failed: {}", e),
    }
}

/// Self-driven stand-in for an external cron, for deployments without one.
pub async fn start_polling_loop(ctx: SharedContext, interval: Duration, mut cancel: mpsc::Receiver<bool>) {
    loop {
        let sleep_handle = tokio::time::sleep(interval);
        let cancel_handle = cancel.recv();

        tokio::select! {
            _ = sleep_handle => {}
            _ = cancel_handle => {
                debug!("polling:: loop canceled");
                break;
            }
        }

        debug!("polling:: tick");
        run_tick(&ctx).await;
    }
}
