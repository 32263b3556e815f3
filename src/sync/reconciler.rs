use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::config::SyncConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability::{
    sync_outcome_label, SYNC_ATTEMPTS_TOTAL, SYNC_DURATION_SECONDS, SYNC_RECORDS,
};

use super::{LedgerTransport, SyncError, TransportError};

const ABANDONED: &str = "sync attempt abandoned";

/// Aggregate sync state for the operator dashboard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncDashboard {
    pub total: usize,
    pub successful: usize,
    /// Not yet synced, or with a call in flight.
    pub pending: usize,
    pub failed: usize,
    pub failed_records: Vec<FailedSync>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FailedSync {
    pub invoice_id: String,
    pub last_error: Option<String>,
    pub last_attempt: Option<DateTime<Utc>>,
    pub attempts: u32,
}

struct SyncEntry {
    invoice: Invoice,
    record: SyncRecord,
}

/// Keeps each submitted invoice's sync record in step with the external
/// ledger. At most one external call per invoice is in flight: the
/// `InProgress` status is the guard, and a second caller is turned away.
pub struct SyncReconciler {
    transport: Arc<dyn LedgerTransport>,
    entries: DashMap<String, Arc<Mutex<SyncEntry>>>,
    config: SyncConfig,
    pub notify: Arc<NotifyHub<String, SyncRecord>>,
}

fn lock(entry: &Mutex<SyncEntry>) -> MutexGuard<'_, SyncEntry> {
    entry.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn track_status(from: Option<SyncStatus>, to: SyncStatus) {
    if let Some(from) = from {
        metrics::gauge!(SYNC_RECORDS, "status" => from.label()).decrement(1.0);
    }
    metrics::gauge!(SYNC_RECORDS, "status" => to.label()).increment(1.0);
}

impl SyncReconciler {
    pub fn new(transport: Arc<dyn LedgerTransport>, config: SyncConfig) -> Self {
        Self {
            transport,
            entries: DashMap::new(),
            config,
            notify: Arc::new(NotifyHub::new()),
        }
    }

    /// Start tracking a submitted invoice as `NotSynced`.
    pub fn submit_invoice(&self, invoice: Invoice) -> Result<SyncRecord, SyncError> {
        match self.entries.entry(invoice.id.clone()) {
            Entry::Occupied(_) => Err(SyncError::AlreadyExists(invoice.id)),
            Entry::Vacant(slot) => {
                let record = SyncRecord::new(invoice.id.clone());
                info!("tracking invoice {} for ledger sync", invoice.id);
                slot.insert(Arc::new(Mutex::new(SyncEntry {
                    invoice,
                    record: record.clone(),
                })));
                track_status(None, SyncStatus::NotSynced);
                Ok(record)
            }
        }
    }

    /// Replace an invoice after amendment. A synced or failed record goes back
    /// to `NotSynced`; the external id is kept so the next sync updates the
    /// existing ledger entry.
    pub fn amend_invoice(&self, invoice: Invoice) -> Result<SyncRecord, SyncError> {
        let entry = self.entry(&invoice.id)?;
        let mut guard = lock(&entry);
        let previous = guard.record.status;
        if previous == SyncStatus::InProgress {
            return Err(SyncError::InFlight(invoice.id));
        }
        guard.invoice = invoice;
        if previous != SyncStatus::NotSynced {
            guard.record.status = SyncStatus::NotSynced;
            track_status(Some(previous), SyncStatus::NotSynced);
        }
        info!(
            "invoice {} amended ({} -> not_synced, external id {:?})",
            guard.record.invoice_id,
            previous.label(),
            guard.record.external_id
        );
        self.notify.send(&guard.record.invoice_id, &guard.record);
        Ok(guard.record.clone())
    }

    /// Push one invoice to the ledger: exactly one external call, no internal
    /// retry. A synced record is left alone unless `force` is set.
    #[tracing::instrument(skip(self))]
    pub async fn sync(&self, invoice_id: &str, force: bool) -> Result<SyncRecord, SyncError> {
        self.run(invoice_id, force).await.map(|(record, _)| record)
    }

    /// Retry every `Failed` record. Outcomes are independent; returns how
    /// many retries were actually attempted.
    #[tracing::instrument(skip(self))]
    pub async fn retry_all_failed(&self) -> usize {
        let ids = self.ids_where(|s| s == SyncStatus::Failed);
        let found = ids.len();
        let attempted = self.run_batch(ids).await;
        info!("retried {attempted} of {found} failed ledger syncs");
        attempted
    }

    /// Sync everything not yet in the ledger (`NotSynced` and `Failed`).
    #[tracing::instrument(skip(self))]
    pub async fn sync_pending(&self) -> usize {
        let ids = self.ids_where(|s| matches!(s, SyncStatus::NotSynced | SyncStatus::Failed));
        let attempted = self.run_batch(ids).await;
        if attempted > 0 {
            info!("scheduled sync attempted {attempted} invoices");
        }
        attempted
    }

    pub fn record(&self, invoice_id: &str) -> Option<SyncRecord> {
        let entry = self.entries.get(invoice_id)?.value().clone();
        let record = lock(&entry).record.clone();
        Some(record)
    }

    /// All records, sorted by invoice id.
    pub fn records(&self) -> Vec<SyncRecord> {
        let mut records: Vec<SyncRecord> = self
            .entries
            .iter()
            .map(|e| lock(e.value()).record.clone())
            .collect();
        records.sort_by(|a, b| a.invoice_id.cmp(&b.invoice_id));
        records
    }

    pub fn invoice(&self, invoice_id: &str) -> Option<Invoice> {
        let entry = self.entries.get(invoice_id)?.value().clone();
        let invoice = lock(&entry).invoice.clone();
        Some(invoice)
    }

    pub fn dashboard(&self) -> SyncDashboard {
        let mut dashboard = SyncDashboard::default();
        for record in self.records() {
            dashboard.total += 1;
            match record.status {
                SyncStatus::Synced => dashboard.successful += 1,
                SyncStatus::NotSynced | SyncStatus::InProgress => dashboard.pending += 1,
                SyncStatus::Failed => {
                    dashboard.failed += 1;
                    dashboard.failed_records.push(FailedSync {
                        invoice_id: record.invoice_id,
                        last_error: record.last_error,
                        last_attempt: record.last_attempt,
                        attempts: record.attempts,
                    });
                }
            }
        }
        dashboard
    }

    /// Status changes for one invoice.
    pub fn subscribe(&self, invoice_id: &str) -> broadcast::Receiver<SyncRecord> {
        self.notify.subscribe(invoice_id.to_string())
    }

    fn entry(&self, invoice_id: &str) -> Result<Arc<Mutex<SyncEntry>>, SyncError> {
        self.entries
            .get(invoice_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| SyncError::NotFound(invoice_id.to_string()))
    }

    fn ids_where(&self, wanted: impl Fn(SyncStatus) -> bool) -> Vec<String> {
        let mut ids: Vec<String> = self
            .entries
            .iter()
            .filter(|e| wanted(lock(e.value()).record.status))
            .map(|e| e.key().clone())
            .collect();
        ids.sort();
        ids
    }

    async fn run_batch(&self, ids: Vec<String>) -> usize {
        stream::iter(ids)
            .map(|id| async move {
                match self.run(&id, false).await {
                    Ok((_, attempted)) => attempted,
                    Err(e) => {
                        debug!("skipping {id}: {e}");
                        false
                    }
                }
            })
            .buffer_unordered(self.config.concurrency.max(1))
            .filter(|attempted| futures::future::ready(*attempted))
            .count()
            .await
    }

    /// The record after the call, and whether an external call was made.
    async fn run(&self, invoice_id: &str, force: bool) -> Result<(SyncRecord, bool), SyncError> {
        let entry = self.entry(invoice_id)?;
        let (invoice, external_id, attempt_no) = {
            let mut guard = lock(&entry);
            let previous = guard.record.status;
            match previous {
                SyncStatus::InProgress => return Err(SyncError::InFlight(invoice_id.to_string())),
                SyncStatus::Synced if !force => {
                    debug!("invoice {invoice_id} already synced");
                    return Ok((guard.record.clone(), false));
                }
                _ => {}
            }
            guard.record.status = SyncStatus::InProgress;
            guard.record.last_attempt = Some(Utc::now());
            guard.record.attempts += 1;
            track_status(Some(previous), SyncStatus::InProgress);
            self.notify.send(&guard.record.invoice_id, &guard.record);
            (
                guard.invoice.clone(),
                guard.record.external_id.clone(),
                guard.record.attempts,
            )
        };
        info!("syncing invoice {invoice_id} to ledger (attempt {attempt_no})");

        let attempt = Attempt {
            reconciler: self,
            entry,
            started: Instant::now(),
            finished: false,
        };
        let call = self.transport.attempt_sync(&invoice, external_id.as_deref());
        let outcome = match tokio::time::timeout(self.config.timeout, call).await {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) => Err(TransportError::Timeout.to_string()),
        };
        Ok((attempt.finish(outcome), true))
    }

    fn complete(
        &self,
        entry: &Mutex<SyncEntry>,
        outcome: Result<String, String>,
        started: Instant,
    ) -> SyncRecord {
        let mut guard = lock(entry);
        let record = &mut guard.record;
        let status = match outcome {
            Ok(external_id) => {
                info!("invoice {} synced as {external_id}", record.invoice_id);
                record.external_id = Some(external_id);
                record.last_error = None;
                SyncStatus::Synced
            }
            Err(message) => {
                warn!("invoice {} sync failed: {message}", record.invoice_id);
                record.last_error = Some(message);
                SyncStatus::Failed
            }
        };
        record.status = status;
        record.history.push(SyncAttempt {
            at: record.last_attempt.unwrap_or_else(Utc::now),
            status,
            error: record.last_error.clone(),
        });
        let excess = record.history.len().saturating_sub(self.config.history_limit);
        record.history.drain(..excess);

        track_status(Some(SyncStatus::InProgress), status);
        let outcome = sync_outcome_label(status);
        metrics::counter!(SYNC_ATTEMPTS_TOTAL, "outcome" => outcome).increment(1);
        metrics::histogram!(SYNC_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        self.notify.send(&record.invoice_id, record);
        record.clone()
    }
}

/// An external call in flight. Dropped unfinished (the caller's future was
/// cancelled), it records the attempt as failed so no record is left
/// `InProgress`.
struct Attempt<'a> {
    reconciler: &'a SyncReconciler,
    entry: Arc<Mutex<SyncEntry>>,
    started: Instant,
    finished: bool,
}

impl Attempt<'_> {
    fn finish(mut self, outcome: Result<String, String>) -> SyncRecord {
        self.finished = true;
        self.reconciler.complete(&self.entry, outcome, self.started)
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.reconciler
                .complete(&self.entry, Err(ABANDONED.to_string()), self.started);
        }
    }
}
