/// Result alias carrying [`LampError`].
pub type Result<T> = std::result::Result<T, LampError>;

/// Everything that can go wrong while routing a control message or running a show.
///
/// None of these are fatal: the controller logs them and drops the one offending update or show.
#[derive(Debug, thiserror::Error)]
pub enum LampError {
    #[error("unrecognised topic {0}")]
    InvalidTopic(String),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("unknown painter kind {0:?}")]
    UnknownPainterKind(String),
    #[error("invalid configuration for painter {kind:?}: {reason}")]
    InvalidConfiguration { kind: String, reason: String },
    /// A show only ever animates one pixel geometry.
    #[error("show animates {show} pixels, substrip {strip} has {pixels}")]
    GeometryMismatch {
        show: usize,
        strip: String,
        pixels: usize,
    },
    #[error("transport unavailable: {0}")]
    TransportUnavailable(String),
    #[error("pixel sink error: {0}")]
    Sink(String),
}

impl LampError {
    pub fn payload<T: Into<String>>(msg: T) -> Self {
        Self::InvalidPayload(msg.into())
    }

    pub fn configuration<K: Into<String>, R: ToString>(kind: K, reason: R) -> Self {
        Self::InvalidConfiguration {
            kind: kind.into(),
            reason: reason.to_string(),
        }
    }
}

impl From<serde_json::Error> for LampError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
