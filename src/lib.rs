// Reminder scheduling and delivery for an intention/emotion journaling app.
// The server half (dispatch loop, timer reconciliation) runs behind a small
// HTTP surface; the device half (countdown, local scheduler) takes its
// platform collaborators as traits.
pub mod clock;
pub mod countdown;
pub mod dispatch;
pub mod errors;
pub mod messages;
pub mod models;
pub mod polling;
pub mod push;
pub mod reconcile;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod types;
pub mod util;

pub const LOG_CONFIG_PATH: &str = "log4rs.yaml";
