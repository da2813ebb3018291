use std::fmt;

/// Failure to get any response from the server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportError {
    Network(String),
    Timeout,
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Network(message) => write!(f, "Unable to reach the server: {message}"),
            TransportError::Timeout => write!(f, "Request timed out"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Non-success response from the server, decoded from the error envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: u16,
    /// Machine-readable code, when the body carried one
    pub code: Option<String>,
    pub message: String,
}

impl ApiFailure {
    pub fn from_body(status: u16, body: &serde_json::Value) -> Self {
        let data = &body["data"];
        Self {
            status,
            code: data["code"].as_str().map(str::to_string),
            message: data["message"]
                .as_str()
                .unwrap_or("Request failed")
                .to_string(),
        }
    }

    pub fn has_code(&self, code: &str) -> bool {
        self.code.as_deref() == Some(code)
    }
}

impl fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "Request failed ({}, {code}): {}", self.status, self.message),
            None => write!(f, "Request failed ({}): {}", self.status, self.message),
        }
    }
}

/// Why a refresh cycle did not produce a new access token. Cloned to
/// every caller waiting on the same refresh.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RefreshError {
    NoRefreshToken,
    Rejected(ApiFailure),
    Transport(TransportError),
    Parse(String),
}

impl fmt::Display for RefreshError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefreshError::NoRefreshToken => write!(f, "No refresh token stored"),
            RefreshError::Rejected(failure) => write!(f, "Refresh rejected: {failure}"),
            RefreshError::Transport(e) => write!(f, "Refresh failed: {e}"),
            RefreshError::Parse(message) => write!(f, "Refresh response error: {message}"),
        }
    }
}

impl std::error::Error for RefreshError {}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ClientError {
    Transport(TransportError),
    Api(ApiFailure),
    /// Refresh failed; stored tokens were cleared and the login view requested
    SessionExpired(RefreshError),
    Parse(String),
}

impl ClientError {
    /// HTTP status of a server-side failure.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api(failure) => Some(failure.status),
            _ => None,
        }
    }

    pub fn code(&self) -> Option<&str> {
        match self {
            ClientError::Api(failure) => failure.code.as_deref(),
            _ => None,
        }
    }
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Transport(e) => e.fmt(f),
            ClientError::Api(failure) => failure.fmt(f),
            ClientError::SessionExpired(_) => write!(f, "Session expired. Please log in again."),
            ClientError::Parse(message) => write!(f, "Response error: {message}"),
        }
    }
}

impl std::error::Error for ClientError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ClientError::Transport(e) => Some(e),
            ClientError::SessionExpired(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for ClientError {
    fn from(e: TransportError) -> Self {
        ClientError::Transport(e)
    }
}
