use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("launch failed, image: {image}, reason: {reason}")]
    Launch { image: String, reason: String },
    #[error("stop failed, resource: {id}, reason: {reason}")]
    Stop { id: String, reason: String },
    #[error("publish failed, key: {key}, reason: {reason}")]
    Publish { key: String, reason: String },
    #[error("shared fixture has not been started")]
    NotStarted,
    #[error("shared fixture has already been stopped")]
    Stopped,
    #[error("invalid port binding: {0}")]
    InvalidPortBinding(String),
    #[error("invalid image: {0}")]
    InvalidImage(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
    #[error("io error, reason: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error, reason: {0}")]
    Json(#[from] serde_json::Error),
    #[error("internal error: {0}")]
    InternalError(String),
}

impl Error {
    pub fn launch(image: impl ToString, reason: impl ToString) -> Self {
        Error::Launch {
            image: image.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn stop(id: impl ToString, reason: impl ToString) -> Self {
        Error::Stop {
            id: id.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn publish(key: impl ToString, reason: impl ToString) -> Self {
        Error::Publish {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
