use crate::store::StoreError;
use thiserror::Error;

/// Error raised from a state handler.
///
/// Every variant routes the actor through [`Machine::reset`](crate::fsm::Machine::reset).
/// [`Fault::Aborted`] is the deliberate variant and skips the restart backoff.
#[derive(Debug, Error)]
pub enum Fault {
    #[error("aborted: {0}")]
    Aborted(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("handler panicked: {0}")]
    Panic(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Fault {
    pub fn is_abort(&self) -> bool {
        matches!(self, Fault::Aborted(_))
    }
}
