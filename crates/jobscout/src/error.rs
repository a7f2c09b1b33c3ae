//! Error type shared by the crawl core and its collaborators.

/// All errors that can surface while crawling a site.
#[derive(thiserror::Error, Debug)]
pub enum ScoutError {
    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    HttpStatus { status: u16, url: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("captcha challenge at {0}")]
    Captcha(String),

    #[error("login required at {0}")]
    AuthRequired(String),

    #[error("no content at {0}")]
    NoContent(String),

    #[error("layout changed, expected element missing: {0}")]
    Layout(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("invalid date window: start {start} is after end {end}")]
    InvalidWindow {
        start: chrono::NaiveDate,
        end: chrono::NaiveDate,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("run cancelled")]
    Cancelled,
}

impl ScoutError {
    /// HTTP status carried by the error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::HttpStatus { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ScoutResult<T> = Result<T, ScoutError>;
