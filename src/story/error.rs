use thiserror::Error;

use super::EpisodeId;

/// Recoverable ledger failures. None of these ever stop a story from being read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum LedgerError {
    #[error("visit ledger unavailable: {0}")]
    Unavailable(String),
    #[error("discarded stale ledger response (token {issued}, latest {latest})")]
    StaleResponse { issued: u64, latest: u64 },
    #[error("could not {action} episode {episode}: {reason}")]
    WriteConflict {
        action: &'static str,
        episode: EpisodeId,
        reason: String,
    },
}

impl LedgerError {
    pub(crate) fn user_visible(&self) -> bool {
        !matches!(self, Self::StaleResponse { .. })
    }
}
