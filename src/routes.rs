use actix_web::{get, post, put, web, HttpResponse, Responder};
use log::{debug, error, info};
use uuid::Uuid;

use crate::dispatch::run_dispatch;
use crate::errors::ReminderError;
use crate::models::{PushChannelData, ReminderPreference, TimerRequest, TimerStateRequest};
use crate::reconcile::{new_timer_row, next_notification_at, run_reconciliation};
use crate::types::SharedContext;
use crate::util::get_short_token;

fn error_response(e: &ReminderError) -> HttpResponse {
    match e {
        ReminderError::InvalidPreference(_) => HttpResponse::BadRequest().body(e.user_message()),
        ReminderError::Configuration(_) => {
            error!("Worker invocation refused: {}", e);
            HttpResponse::InternalServerError().body(e.to_string())
        }
        _ => {
            error!("Request failed: {}", e);
            HttpResponse::InternalServerError().body(e.user_message())
        }
    }
}

#[get("/health")]
pub async fn health() -> impl Responder {
    info!("Health check");
    HttpResponse::Ok()
}

#[post("/pushchannel/{user_id}")]
async fn update_push_channel(
    user_id: web::Path<String>,
    payload: web::Json<PushChannelData>,
    ctx: web::Data<SharedContext>,
) -> HttpResponse {
    match ctx.channels.set_channel(&user_id, &payload.channel_id).await {
        Ok(()) => {
            debug!("push_channel:: {} -> ...{}", user_id, get_short_token(&payload.channel_id));
            HttpResponse::Ok().finish()
        }
        Err(e) => error_response(&e),
    }
}

#[put("/preferences/{user_id}")]
async fn save_preference(
    user_id: web::Path<String>,
    payload: web::Json<ReminderPreference>,
    ctx: web::Data<SharedContext>,
) -> HttpResponse {
    let preference = payload.into_inner();
    if let Err(e) = preference.validate() {
        return error_response(&e);
    }
    match ctx.preferences.save_preference(&user_id, preference).await {
        Ok(()) => HttpResponse::Ok().finish(),
        Err(e) => error_response(&e),
    }
}

#[post("/preferences/{user_id}/disable")]
async fn disable_preference(user_id: web::Path<String>, ctx: web::Data<SharedContext>) -> HttpResponse {
    match ctx.preferences.set_enabled(&user_id, false).await {
        Ok(true) => HttpResponse::Ok().finish(),
        Ok(false) => HttpResponse::NotFound().finish(),
        Err(e) => error_response(&e),
    }
}

#[post("/timers/{user_id}")]
async fn create_timer(
    user_id: web::Path<String>,
    payload: web::Json<TimerRequest>,
    ctx: web::Data<SharedContext>,
) -> HttpResponse {
    if payload.min_seconds == 0 || payload.min_seconds > payload.max_seconds {
        return HttpResponse::BadRequest().body("minSeconds must be positive and not above maxSeconds");
    }
    let row = new_timer_row(&user_id, payload.min_seconds, payload.max_seconds, ctx.clock.now());
    match ctx.timers.upsert_timer(row).await {
        Ok(row) => HttpResponse::Ok().json(row),
        Err(e) => error_response(&e),
    }
}

#[post("/timers/{user_id}/{timer_id}/state")]
async fn update_timer_state(
    path: web::Path<(String, Uuid)>,
    payload: web::Json<TimerStateRequest>,
    ctx: web::Data<SharedContext>,
) -> HttpResponse {
    let (user_id, timer_id) = path.into_inner();
    let read = match ctx.timers.timer(timer_id).await {
        Ok(Some(row)) if row.user_id == user_id => row,
        Ok(_) => return HttpResponse::NotFound().finish(),
        Err(e) => return error_response(&e),
    };

    let mut row = read.clone();
    let was_running = row.is_running();
    row.is_active = payload.is_active;
    row.is_paused = payload.is_paused;
    if !was_running && row.is_running() {
        row.next_notification_at = next_notification_at(&row, ctx.clock.now());
    }

    // a reconciliation pass may have advanced the row since it was read
    match ctx.timers.replace_timer(&read, row.clone()).await {
        Ok(true) => HttpResponse::Ok().json(row),
        Ok(false) => HttpResponse::Conflict().body("Timer changed meanwhile, read it again"),
        Err(e) => error_response(&e),
    }
}

#[post("/dispatch")]
async fn dispatch(ctx: web::Data<SharedContext>) -> HttpResponse {
    match run_dispatch(&ctx).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    }
}

#[post("/reconcile")]
async fn reconcile(ctx: web::Data<SharedContext>) -> HttpResponse {
    match run_reconciliation(&ctx).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => error_response(&e),
    }
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(health)
        .service(update_push_channel)
        .service(save_preference)
        .service(disable_preference)
        .service(create_timer)
        .service(update_timer_state)
        .service(dispatch)
        .service(reconcile);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use actix_web::{test, App};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    use async_trait::async_trait;
    use chrono::DateTime;

    use super::*;
    use crate::clock::MockClock;
    use crate::errors::ReminderResult;
    use crate::models::ServerTimerRow;
    use crate::push::fake::FakePush;
    use crate::store::{ChannelDirectory, MemoryStore, PreferenceStore, TimerStore};
    use crate::types::ReminderContext;

    /// Hands out the row, then advances it as a reconciliation pass would.
    struct AdvancedAfterRead {
        inner: Arc<MemoryStore>,
    }

    #[async_trait]
    impl TimerStore for AdvancedAfterRead {
        async fn due_timers(&self, now: DateTime<Utc>) -> ReminderResult<Vec<ServerTimerRow>> {
            self.inner.due_timers(now).await
        }

        async fn upsert_timer(&self, row: ServerTimerRow) -> ReminderResult<ServerTimerRow> {
            self.inner.upsert_timer(row).await
        }

        async fn timer(&self, id: Uuid) -> ReminderResult<Option<ServerTimerRow>> {
            let read = self.inner.timer(id).await?;
            if let Some(row) = &read {
                let next = row.next_notification_at + chrono::Duration::minutes(10);
                self.inner.advance_timer(id, row.next_notification_at, next).await?;
            }
            Ok(read)
        }

        async fn replace_timer(&self, expected: &ServerTimerRow, row: ServerTimerRow) -> ReminderResult<bool> {
            self.inner.replace_timer(expected, row).await
        }

        async fn advance_timer(&self, id: Uuid, expected: DateTime<Utc>, next: DateTime<Utc>) -> ReminderResult<bool> {
            self.inner.advance_timer(id, expected, next).await
        }
    }

    fn context(push: FakePush) -> (Arc<MemoryStore>, SharedContext) {
        let store = Arc::new(MemoryStore::in_memory());
        let clock = Arc::new(MockClock::new(Utc.with_ymd_and_hms(2026, 1, 5, 9, 0, 0).unwrap()));
        let ctx = Arc::new(ReminderContext::with_store(store.clone(), Arc::new(push), clock, chrono::Duration::seconds(60)));
        (store, ctx)
    }

    #[actix_web::test]
    async fn preference_then_dispatch() {
        let (store, ctx) = context(FakePush::default());
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/pushchannel/u1")
            .set_json(json!({ "channelId": "player-1" }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());
        assert_eq!(store.channel_for("u1").await.unwrap().as_deref(), Some("player-1"));

        let req = test::TestRequest::put()
            .uri("/preferences/u1")
            .set_json(json!({ "enabled": true, "mode": "fixed", "count": 1, "fixedTimes": ["09:00"] }))
            .to_request();
        assert!(test::call_service(&app, req).await.status().is_success());

        let req = test::TestRequest::post().uri("/dispatch").to_request();
        let report: serde_json::Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(report["delivered"], 1);
    }

    #[actix_web::test]
    async fn invalid_preference_is_a_bad_request() {
        let (store, ctx) = context(FakePush::default());
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;

        let req = test::TestRequest::put()
            .uri("/preferences/u1")
            .set_json(json!({ "enabled": true, "mode": "fixed", "count": 3, "fixedTimes": ["09:00"] }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
        assert!(store.preference("u1").await.unwrap().is_none());
    }

    #[actix_web::test]
    async fn disable_unknown_user_is_not_found() {
        let (_store, ctx) = context(FakePush::default());
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;
        let req = test::TestRequest::post().uri("/preferences/ghost/disable").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn unconfigured_gateway_fails_worker_invocations() {
        let (_store, ctx) = context(FakePush { unconfigured: true, ..Default::default() });
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;

        let req = test::TestRequest::post().uri("/dispatch").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 500);
        let req = test::TestRequest::post().uri("/reconcile").to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 500);
    }

    #[actix_web::test]
    async fn timer_pause_and_resume_rearms() {
        let (_store, ctx) = context(FakePush::default());
        let now = ctx.clock.now();
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri("/timers/u1")
            .set_json(json!({ "minSeconds": 60, "maxSeconds": 120 }))
            .to_request();
        let row: ServerTimerRow = test::call_and_read_body_json(&app, req).await;
        assert!(row.is_running());

        let state_uri = format!("/timers/u1/{}/state", row.id);
        let req = test::TestRequest::post()
            .uri(&state_uri)
            .set_json(json!({ "isActive": true, "isPaused": true }))
            .to_request();
        let paused: ServerTimerRow = test::call_and_read_body_json(&app, req).await;
        assert!(paused.is_paused);

        let req = test::TestRequest::post()
            .uri(&state_uri)
            .set_json(json!({ "isActive": true, "isPaused": false }))
            .to_request();
        let resumed: ServerTimerRow = test::call_and_read_body_json(&app, req).await;
        let delta = (resumed.next_notification_at - now).num_seconds();
        assert!((60..=120).contains(&delta));

        let req = test::TestRequest::post()
            .uri(&format!("/timers/someone-else/{}/state", row.id))
            .set_json(json!({ "isActive": false, "isPaused": false }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 404);
    }

    #[actix_web::test]
    async fn state_change_racing_an_advance_is_a_conflict() {
        let (store, ctx) = context(FakePush::default());
        let row = store
            .upsert_timer(new_timer_row("u1", 60, 120, ctx.clock.now()))
            .await
            .unwrap();
        let ctx = Arc::new(ReminderContext {
            timers: Arc::new(AdvancedAfterRead { inner: store.clone() }),
            ..ReminderContext::with_store(store.clone(), Arc::new(FakePush::default()), ctx.clock.clone(), chrono::Duration::seconds(60))
        });
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;

        let req = test::TestRequest::post()
            .uri(&format!("/timers/u1/{}/state", row.id))
            .set_json(json!({ "isActive": true, "isPaused": true }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 409);

        let stored = store.timer(row.id).await.unwrap().unwrap();
        assert!(!stored.is_paused);
        assert_eq!(stored.next_notification_at, row.next_notification_at + chrono::Duration::minutes(10));
    }

    #[actix_web::test]
    async fn bad_timer_bounds_are_rejected() {
        let (_store, ctx) = context(FakePush::default());
        let app = test::init_service(App::new().app_data(web::Data::new(ctx)).configure(configure)).await;
        let req = test::TestRequest::post()
            .uri("/timers/u1")
            .set_json(json!({ "minSeconds": 300, "maxSeconds": 60 }))
            .to_request();
        assert_eq!(test::call_service(&app, req).await.status(), 400);
    }
}
