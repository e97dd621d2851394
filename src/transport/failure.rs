use tokio_tungstenite::tungstenite;

/// Class of a transport failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The session or handshake itself was rejected; retrying the same way is pointless
    Protocol,
    /// Ordinary connectivity loss; the transport keeps retrying
    Network,
}

impl FailureKind {
    /// Classifies a text-only diagnostic.
    ///
    /// Protocol class: the text contains `400`, `bad request`, `sid` or `session`,
    /// case-insensitively. `sid` as part of the word `inside` does not count.
    pub fn classify(text: &str) -> Self {
        let lower = text.to_ascii_lowercase();
        let protocol = PROTOCOL_PATTERNS.iter().any(|pattern| match *pattern {
            "sid" => lower.replace("inside", "").contains("sid"),
            pattern => lower.contains(pattern),
        });
        if protocol {
            Self::Protocol
        } else {
            Self::Network
        }
    }
}

const PROTOCOL_PATTERNS: [&str; 4] = ["400", "bad request", "sid", "session"];

/// Typed failure reported by a transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportFailure {
    pub kind: FailureKind,
    pub message: String,
}

impl TransportFailure {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Protocol,
            message: message.into(),
        }
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self {
            kind: FailureKind::Network,
            message: message.into(),
        }
    }

    /// Classifies from message text alone
    pub fn from_text(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            kind: FailureKind::classify(&message),
            message,
        }
    }

    /// Classifies an HTTP status answered by the endpoint
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        if status == 400 {
            Self::protocol(message)
        } else {
            Self::network(message)
        }
    }

    /// Classifies a websocket error, preferring the handshake status when present
    pub fn from_ws_error(error: &tungstenite::Error) -> Self {
        match error {
            tungstenite::Error::Http(response) => {
                let body = response
                    .body()
                    .as_ref()
                    .map(|b| String::from_utf8_lossy(b).into_owned())
                    .unwrap_or_default();
                Self::from_status(response.status().as_u16(), &body)
            }
            other => Self::from_text(other.to_string()),
        }
    }

    pub fn is_protocol(&self) -> bool {
        self.kind == FailureKind::Protocol
    }
}

impl std::fmt::Display for TransportFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?} failure: {}", self.kind, self.message)
    }
}
