use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use tokio::task::JoinHandle;

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::quote::QuoteService;
use crate::observability;
use crate::sync::{
    run_retry_loop, LedgerInvoice, LedgerTransport, SyncDashboard, SyncError, SyncReconciler,
};

/// The calls the booking, catalog and invoicing screens make. Dates cross
/// this boundary as ISO 8601 `YYYY-MM-DD` strings.
pub struct RentalService {
    config: EngineConfig,
    engine: Arc<Engine>,
    quotes: QuoteService,
    reconciler: Arc<SyncReconciler>,
}

impl RentalService {
    pub fn new(config: EngineConfig, transport: Arc<dyn LedgerTransport>) -> Self {
        let engine = Arc::new(Engine::new(config.boundary_policy));
        let quotes = QuoteService::new(engine.clone(), &config);
        let reconciler = Arc::new(SyncReconciler::new(transport, config.sync.clone()));
        Self {
            config,
            engine,
            quotes,
            reconciler,
        }
    }

    /// Install the log subscriber and, when `metrics_port` is configured, the
    /// Prometheus exporter. Call once from the host at startup.
    pub fn init_observability(&self) {
        observability::init_tracing();
        observability::init(self.config.metrics_port);
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub fn quotes(&self) -> &QuoteService {
        &self.quotes
    }

    pub fn reconciler(&self) -> &Arc<SyncReconciler> {
        &self.reconciler
    }

    pub async fn check_availability(
        &self,
        items: &BTreeMap<String, u32>,
        start_date: &str,
        end_date: &str,
    ) -> Result<BTreeMap<String, AvailabilityResult>, EngineError> {
        let (start, end) = (parse_date(start_date)?, parse_date(end_date)?);
        self.engine.check_availability(items, start, end).await
    }

    pub async fn get_quote_estimate(
        &self,
        items: &[(String, u32)],
        start_date: &str,
        end_date: &str,
        customer: &Customer,
    ) -> Result<Estimate, EngineError> {
        let (start, end) = (parse_date(start_date)?, parse_date(end_date)?);
        self.quotes.estimate(items, start, end, customer).await
    }

    pub fn submit_invoice(&self, invoice: Invoice) -> Result<SyncRecord, SyncError> {
        self.reconciler.submit_invoice(invoice)
    }

    pub async fn sync_invoice(&self, invoice_id: &str) -> Result<SyncRecord, SyncError> {
        self.reconciler.sync(invoice_id, false).await
    }

    pub async fn retry_failed_syncs(&self) -> usize {
        self.reconciler.retry_all_failed().await
    }

    pub fn sync_dashboard(&self) -> SyncDashboard {
        self.reconciler.dashboard()
    }

    /// The payload a transport should send for an invoice, stamped with the
    /// configured account code and tax type.
    pub fn ledger_payload(&self, invoice_id: &str) -> Option<LedgerInvoice> {
        let invoice = self.reconciler.invoice(invoice_id)?;
        Some(LedgerInvoice::from_invoice(&invoice, &self.config.ledger))
    }

    /// Start the periodic ledger sync on the current runtime.
    pub fn spawn_retry_loop(&self) -> JoinHandle<()> {
        tokio::spawn(run_retry_loop(
            self.reconciler.clone(),
            self.config.sync.retry_interval,
        ))
    }
}

pub fn parse_date(value: &str) -> Result<NaiveDate, EngineError> {
    NaiveDate::parse_from_str(value.trim(), "%Y-%m-%d").map_err(|_| {
        EngineError::InvalidRequest(format!("invalid date {value:?}, expected YYYY-MM-DD"))
    })
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use rust_decimal_macros::dec;

    use super::*;
    use crate::sync::TransportError;

    struct Offline;

    #[async_trait]
    impl LedgerTransport for Offline {
        async fn attempt_sync(
            &self,
            _invoice: &Invoice,
            _external_id: Option<&str>,
        ) -> Result<String, TransportError> {
            Err(TransportError::Transport(Some("connection refused".into())))
        }
    }

    fn service() -> RentalService {
        RentalService::new(EngineConfig::default(), Arc::new(Offline))
    }

    #[test]
    fn parses_iso_dates() {
        assert_eq!(parse_date("2024-06-01"), Ok(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert_eq!(parse_date(" 2024-06-01 "), Ok(NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()));
        assert!(matches!(parse_date("01/06/2024"), Err(EngineError::InvalidRequest(_))));
        assert!(matches!(parse_date("2024-02-30"), Err(EngineError::InvalidRequest(_))));
    }

    #[test]
    fn observability_init_without_metrics_port() {
        let service = service();
        assert_eq!(service.config().metrics_port, None);
        service.init_observability();
        service.init_observability();
    }

    #[tokio::test]
    async fn availability_with_string_dates() {
        let service = service();
        service
            .engine()
            .register_item(Item::pooled("TENT-A", 5, Rates::daily(dec!(20))))
            .await
            .unwrap();
        let items: BTreeMap<String, u32> = [("TENT-A".to_string(), 2)].into();
        let result = service
            .check_availability(&items, "2024-06-01", "2024-06-03")
            .await
            .unwrap();
        assert!(result["TENT-A"].available);
        assert_eq!(
            service.check_availability(&items, "2024-06-03", "2024-06-01").await,
            Err(EngineError::InvalidInterval)
        );
    }

    #[tokio::test]
    async fn failed_sync_shows_on_dashboard() {
        let service = service();
        let date = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
        service
            .submit_invoice(Invoice {
                id: "INV-9".into(),
                customer_name: "Acme Events".into(),
                currency: "USD".into(),
                posting_date: date,
                due_date: date,
                lines: Vec::new(),
                taxes: Vec::new(),
            })
            .unwrap();
        let record = service.sync_invoice("INV-9").await.unwrap();
        assert_eq!(record.status, SyncStatus::Failed);

        let dashboard = service.sync_dashboard();
        assert_eq!((dashboard.total, dashboard.failed), (1, 1));
        assert_eq!(
            dashboard.failed_records[0].last_error.as_deref(),
            Some("transport error: connection refused")
        );
        assert_eq!(service.retry_failed_syncs().await, 1);

        let payload = service.ledger_payload("INV-9").unwrap();
        assert_eq!(payload.invoice_number, "INV-9");
        assert!(service.ledger_payload("INV-0").is_none());
    }
}
