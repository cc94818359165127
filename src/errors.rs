use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReminderError {
    #[error("Notification permission denied")]
    PermissionDenied,

    #[error("Push gateway error: {0}")]
    Transport(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid reminder preference: {0}")]
    InvalidPreference(String),

    #[error("Local notification scheduling failed: {0}")]
    Scheduling(String),
}

impl ReminderError {
    /// One-line message suitable for showing to the user.
    pub fn user_message(&self) -> String {
        match self {
            ReminderError::PermissionDenied => {
                "Notifications are turned off. Enable them in your device settings to receive reminders.".to_string()
            }
            ReminderError::Persistence(_) => "Your reminder settings could not be saved. Please try again.".to_string(),
            ReminderError::InvalidPreference(reason) => format!("Please check your reminder settings: {reason}"),
            ReminderError::Scheduling(_) => "Reminders could not be scheduled. Please try again.".to_string(),
            ReminderError::Transport(_) | ReminderError::Configuration(_) => {
                "Reminders are temporarily unavailable.".to_string()
            }
        }
    }
}

impl From<std::io::Error> for ReminderError {
    fn from(e: std::io::Error) -> Self {
        ReminderError::Persistence(e.to_string())
    }
}

impl From<serde_json::Error> for ReminderError {
    fn from(e: serde_json::Error) -> Self {
        ReminderError::Persistence(e.to_string())
    }
}

impl From<reqwest::Error> for ReminderError {
    fn from(e: reqwest::Error) -> Self {
        ReminderError::Transport(e.to_string())
    }
}

pub type ReminderResult<T> = Result<T, ReminderError>;
