/// Core error type for the relay.
///
/// Adapter crates map their specific errors into this type so the bot core can
/// decide between a user-facing reply and a retry.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("twitter api error ({status}): {body}")]
    Twitter { status: u16, body: String },

    #[error("chat {0} is not logged in")]
    NotLoggedIn(i64),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// Short message suitable for showing to a Telegram user.
    pub fn user_message(&self) -> String {
        match self {
            Error::NotLoggedIn(_) => "Please /login first".to_string(),
            Error::InvalidInput(msg) => msg.clone(),
            Error::Twitter { status, body } => {
                let body: String = body.chars().take(200).collect();
                format!("Twitter API error ({status}): {body}")
            }
            other => {
                let txt = other.to_string();
                if txt.chars().count() > 200 {
                    format!("{}...", txt.chars().take(200).collect::<String>())
                } else {
                    txt
                }
            }
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
