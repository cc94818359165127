// Reminder service for an intention journaling app: decides when users get
// their daily and ambient reminders and hands them to the push gateway.
use actix_web::{error, web::{self, Data}, App, HttpResponse, HttpServer};
use dotenv::dotenv;
use log::{error, info};
use std::{process::exit, sync::Arc};
use tokio::sync::mpsc;

use intention_reminders::clock::SystemClock;
use intention_reminders::polling::start_polling_loop;
use intention_reminders::push::HttpPushGateway;
use intention_reminders::routes;
use intention_reminders::store::MemoryStore;
use intention_reminders::types::ReminderContext;
use intention_reminders::util::{self, VAR_DISPATCH_INTERVAL_S, VAR_POLL_INTERVAL_S, VAR_STORE_PATH};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenv().ok();
    let settings = match util::check_environment_vars() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Invalid environment: {e}");
            eprintln!("Optional environment variables: {VAR_DISPATCH_INTERVAL_S} {VAR_POLL_INTERVAL_S} {VAR_STORE_PATH}");
            exit(1)
        }
    };
    util::init_logging();

    let store = match &settings.store_path {
        Some(path) => match MemoryStore::open(path.clone()).await {
            Ok(store) => store,
            Err(e) => {
                error!("Failed to open store {}: {}", path.display(), e);
                exit(1)
            }
        },
        None => {
            info!("{VAR_STORE_PATH} not set, keeping state in memory only");
            MemoryStore::in_memory()
        }
    };

    let push = match HttpPushGateway::from_env() {
        Ok(push) => push,
        Err(e) => {
            error!("Failed to set up push gateway: {}", e);
            exit(1)
        }
    };

    let dispatch_interval = chrono::Duration::seconds(settings.dispatch_interval.as_secs() as i64);
    let ctx = Arc::new(ReminderContext::with_store(
        Arc::new(store),
        Arc::new(push),
        Arc::new(SystemClock),
        dispatch_interval,
    ));
    let ctx_data = Data::new(ctx.clone());

    let (cancel_tx, cancel_rx) = mpsc::channel(1);
    let polling_handle = settings.poll_interval.map(|interval| {
        info!("Polling every {:?}", interval);
        tokio::spawn(start_polling_loop(ctx.clone(), interval, cancel_rx))
    });

    info!("Listening on {}:{}", settings.host, settings.port);
    let served = HttpServer::new(move || {
        let json_cfg = web::JsonConfig::default().error_handler(|err, _req| {
            error!("Json config error: {}", err);
            error::InternalError::from_response(err, HttpResponse::BadRequest().into()).into()
        });
        App::new()
            .app_data(Data::clone(&ctx_data))
            .app_data(json_cfg)
            .configure(routes::configure)
    })
    .bind(format!("{}:{}", settings.host, settings.port))?
    .run()
    .await;

    if let Some(handle) = polling_handle {
        cancel_tx.send(true).await.ok();
        handle.await.ok();
    }
    served
}
