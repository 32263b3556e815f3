mod payload;
mod reconciler;
mod scheduler;

pub use payload::{rejection_message, LedgerContact, LedgerInvoice, LedgerLineItem};
pub use reconciler::{FailedSync, SyncDashboard, SyncReconciler};
pub use scheduler::run_retry_loop;

use async_trait::async_trait;

use crate::model::Invoice;

/// The external ledger. One call records or updates one invoice and returns
/// the ledger's id for it.
#[async_trait]
pub trait LedgerTransport: Send + Sync {
    /// `external_id` is set when the invoice was synced before; the ledger
    /// should update that entry instead of creating a new one.
    async fn attempt_sync(
        &self,
        invoice: &Invoice,
        external_id: Option<&str>,
    ) -> Result<String, TransportError>;
}

/// A failed external call. Recorded on the sync record, never raised.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The ledger answered and refused the invoice; carries its message.
    Rejected(String),
    /// No usable answer (connection, auth, malformed response).
    Transport(Option<String>),
    Timeout,
}

impl std::fmt::Display for TransportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportError::Rejected(msg) => write!(f, "{msg}"),
            TransportError::Transport(Some(msg)) => write!(f, "transport error: {msg}"),
            TransportError::Transport(None) => write!(f, "transport error"),
            TransportError::Timeout => write!(f, "transport error: ledger did not respond in time"),
        }
    }
}

impl std::error::Error for TransportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    NotFound(String),
    AlreadyExists(String),
    /// Another sync call for the invoice is in flight.
    InFlight(String),
}

impl std::fmt::Display for SyncError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncError::NotFound(id) => write!(f, "no sync record for invoice {id}"),
            SyncError::AlreadyExists(id) => write!(f, "invoice {id} already submitted"),
            SyncError::InFlight(id) => write!(f, "sync already in progress for invoice {id}"),
        }
    }
}

impl std::error::Error for SyncError {}
