use relay_common::reply::ReplyError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid base URL {0}: {1}")]
    BaseUrl(String, String),
    #[error("failed to build HTTP client: {0}")]
    Build(reqwest::Error),
    #[error("request failed: {0}")]
    Http(reqwest::Error),
    #[error("HTTP status {0}")]
    HttpStatus(reqwest::StatusCode),
    /// The service answered 200 but reported a failure in the body.
    #[error("{0}")]
    Rejected(String),
    #[error("malformed response: {0}")]
    Malformed(String),
    #[error("select a model and a classes file")]
    MissingSelection,
}

impl ClientError {
    /// True for failures the service reported itself, as opposed to
    /// transport or status problems.
    pub fn is_rejection(&self) -> bool {
        matches!(self, ClientError::Rejected(_))
    }
}

impl From<ReplyError> for ClientError {
    fn from(e: ReplyError) -> Self {
        match e {
            ReplyError::Rejected(message) => ClientError::Rejected(message),
            other => ClientError::Malformed(other.to_string()),
        }
    }
}
