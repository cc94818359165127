use std::env;
use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;
use log4rs::append::console::ConsoleAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;
use rand::Rng;

use crate::LOG_CONFIG_PATH;

pub const HOST: &str = "HOST";
pub const PORT: &str = "PORT";

pub const VAR_PUSH_GATEWAY_URL: &str = "PUSH_GATEWAY_URL";
pub const VAR_PUSH_APP_ID: &str = "PUSH_APP_ID";
pub const VAR_PUSH_API_KEY: &str = "PUSH_API_KEY";
pub const VAR_PUSH_DRY_RUN: &str = "PUSH_DRY_RUN";
pub const VAR_DISPATCH_INTERVAL_S: &str = "DISPATCH_INTERVAL_S";
pub const VAR_POLL_INTERVAL_S: &str = "POLL_INTERVAL_S";
pub const VAR_STORE_PATH: &str = "STORE_PATH";

const DEFAULT_DISPATCH_INTERVAL_S: u64 = 60;

/// Runtime settings read from the environment (after `.env` is loaded).
#[derive(Clone, Debug)]
pub struct ServiceSettings {
    pub host: String,
    pub port: String,
    pub dispatch_interval: Duration,
    pub poll_interval: Option<Duration>,
    pub store_path: Option<PathBuf>,
}

pub fn check_environment_vars() -> Result<ServiceSettings, String> {
    settings_from(|name| env::var(name).ok())
}

/// Builds the settings from `lookup`. The dispatch window is sized from the
/// dispatch interval, so a poll loop ticking at another cadence could step
/// over it: when only the poll interval is set it also becomes the dispatch
/// interval, and two different values are rejected.
pub fn settings_from<F>(lookup: F) -> Result<ServiceSettings, String>
where
    F: Fn(&str) -> Option<String>,
{
    let dispatch = lookup(VAR_DISPATCH_INTERVAL_S)
        .map(|raw| parse_seconds(VAR_DISPATCH_INTERVAL_S, &raw))
        .transpose()?;
    let poll_interval = lookup(VAR_POLL_INTERVAL_S)
        .map(|raw| parse_seconds(VAR_POLL_INTERVAL_S, &raw))
        .transpose()?;

    let dispatch_interval = match (dispatch, poll_interval) {
        (Some(d), Some(p)) if d != p => {
            return Err(format!(
                "{VAR_DISPATCH_INTERVAL_S} ({}s) and {VAR_POLL_INTERVAL_S} ({}s) must match",
                d.as_secs(),
                p.as_secs()
            ))
        }
        (Some(d), _) => d,
        (None, Some(p)) => p,
        (None, None) => Duration::from_secs(DEFAULT_DISPATCH_INTERVAL_S),
    };

    Ok(ServiceSettings {
        host: lookup(HOST).unwrap_or(String::from("127.0.0.1")),
        port: lookup(PORT).unwrap_or(String::from("9898")),
        dispatch_interval,
        poll_interval,
        store_path: lookup(VAR_STORE_PATH).map(PathBuf::from),
    })
}

fn parse_seconds(name: &str, raw: &str) -> Result<Duration, String> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(format!("{name} must be a positive number of seconds, got '{raw}'")),
    }
}

pub fn is_truthy(raw: &str) -> bool {
    matches!(raw.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
}

pub fn init_logging() {
    if let Err(e) = log4rs::init_file(LOG_CONFIG_PATH, Default::default()) {
        eprintln!("Could not load {LOG_CONFIG_PATH} ({e}), logging to console");

        let stdout = ConsoleAppender::builder()
            .encoder(Box::new(PatternEncoder::new("{d(%Y-%m-%d %H:%M:%S)} {l} {t} - {m}{n}")))
            .build();
        let config = Config::builder()
            .appender(Appender::builder().build("stdout", Box::new(stdout)))
            .build(Root::builder().appender("stdout").build(LevelFilter::Info));

        match config {
            Ok(config) => {
                if let Err(e) = log4rs::init_config(config) {
                    eprintln!("Failed to install console logger: {e}");
                }
            }
            Err(e) => eprintln!("Invalid fallback logging config: {e}"),
        }
    }
}

/// Last six characters of a token, for log lines.
pub fn get_short_token(token: &str) -> String {
    let chars: Vec<char> = token.chars().collect();
    let start = chars.len().saturating_sub(6);
    chars[start..].iter().collect()
}

/// Whole seconds drawn uniformly from `[min, max]`. Swapped bounds are tolerated.
pub fn draw_seconds<R: Rng + ?Sized>(rng: &mut R, min: u32, max: u32) -> u32 {
    let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
    rng.gen_range(lo..=hi)
}
