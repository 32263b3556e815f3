use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::NaiveDate;
use dashmap::DashMap;
use rust_decimal::Decimal;
use tracing::debug;

use crate::config::EngineConfig;
use crate::engine::{Engine, EngineError};
use crate::limits::*;
use crate::model::*;
use crate::observability::{QUOTES_TOTAL, QUOTE_DURATION_SECONDS};
use crate::pricing::{apply_adjustments, compute_line, round_money, TierLengths};

/// Combines a batch availability check with line pricing into an estimate.
pub struct QuoteService {
    engine: Arc<Engine>,
    tiers: TierLengths,
    default_currency: String,
    default_tax_rate: Decimal,
    pub sequencer: QuoteSequencer,
}

impl QuoteService {
    pub fn new(engine: Arc<Engine>, config: &EngineConfig) -> Self {
        Self {
            engine,
            tiers: config.tiers,
            default_currency: config.currency.clone(),
            default_tax_rate: config.tax_rate,
            sequencer: QuoteSequencer::new(),
        }
    }

    pub async fn estimate(
        &self,
        items: &[(String, u32)],
        start: NaiveDate,
        end: NaiveDate,
        customer: &Customer,
    ) -> Result<Estimate, EngineError> {
        self.estimate_with(items, start, end, customer, &[]).await
    }

    /// Estimate with booking-level adjustments (delivery fee, promotions).
    pub async fn estimate_with(
        &self,
        items: &[(String, u32)],
        start: NaiveDate,
        end: NaiveDate,
        customer: &Customer,
        booking_adjustments: &[Adjustment],
    ) -> Result<Estimate, EngineError> {
        let started = Instant::now();
        let result = self
            .build_estimate(items, start, end, customer, booking_adjustments)
            .await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUOTES_TOTAL, "status" => status).increment(1);
        metrics::histogram!(QUOTE_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        result
    }

    /// Estimate for a sequenced request. Work for a ticket that is already
    /// stale is skipped, and a result that went stale while computing is
    /// reported as superseded instead of returned.
    pub async fn estimate_sequenced(
        &self,
        ticket: &RequestTicket,
        items: &[(String, u32)],
        start: NaiveDate,
        end: NaiveDate,
        customer: &Customer,
    ) -> Result<Sequenced<Estimate>, EngineError> {
        if !self.sequencer.is_current(ticket) {
            return Ok(self.sequencer.superseded(ticket));
        }
        match self.estimate(items, start, end, customer).await {
            Ok(estimate) => Ok(self.sequencer.accept(ticket, estimate)),
            Err(_) if !self.sequencer.is_current(ticket) => Ok(self.sequencer.superseded(ticket)),
            Err(e) => Err(e),
        }
    }

    async fn build_estimate(
        &self,
        items: &[(String, u32)],
        start: NaiveDate,
        end: NaiveDate,
        customer: &Customer,
        booking_adjustments: &[Adjustment],
    ) -> Result<Estimate, EngineError> {
        let span = Span::checked(start, end).ok_or_else(|| {
            EngineError::InvalidRequest(format!("start date {start} is after end date {end}"))
        })?;
        if items.is_empty() {
            return Err(EngineError::InvalidRequest("no items requested".into()));
        }
        if items.len() > MAX_ITEMS_PER_REQUEST {
            return Err(EngineError::LimitExceeded("too many items in request"));
        }
        let mut requested: BTreeMap<String, u32> = BTreeMap::new();
        for (identity, qty) in items {
            if identity.is_empty() {
                return Err(EngineError::InvalidRequest("empty item identity".into()));
            }
            if *qty == 0 {
                return Err(EngineError::InvalidRequest(format!(
                    "quantity for {identity} must be positive"
                )));
            }
            if *qty > MAX_QTY_PER_LINE {
                return Err(EngineError::LimitExceeded("quantity too large"));
            }
            let total = requested.entry(identity.clone()).or_default();
            *total = total.saturating_add(*qty);
        }

        let currency = customer
            .currency
            .clone()
            .unwrap_or_else(|| self.default_currency.clone());
        let checked = self.engine.check_with_catalog(&requested, start, end).await?;
        let rental_days = span.days();

        let mut lines = Vec::with_capacity(items.len());
        for (identity, qty) in items {
            let line = match (checked.results.get(identity), checked.items.get(identity)) {
                (Some(r), Some(item)) if r.available => {
                    self.price_line(item, identity, *qty, span, &currency)?
                }
                (Some(r), Some(_)) => {
                    let reason = r.reason.clone().unwrap_or_else(|| "unavailable".into());
                    QuoteLine::failed(
                        identity.as_str(),
                        *qty,
                        rental_days,
                        LineError::Unavailable(reason),
                    )
                }
                _ => {
                    QuoteLine::failed(identity.as_str(), *qty, rental_days, LineError::UnknownItem)
                }
            };
            lines.push(line);
        }

        let priced = || lines.iter().filter(|l| l.is_priced());
        let subtotal: Decimal = priced().map(|l| l.line_total).sum();
        let line_surcharges: Decimal = priced().map(|l| l.surcharges).sum();
        let line_discounts: Decimal = priced().map(|l| l.discounts).sum();

        let mut adjustments = booking_adjustments.to_vec();
        if let Some(percent) = customer.discount_percent
            && percent > Decimal::ZERO
        {
            adjustments.push(Adjustment::discount(
                "customer discount",
                AdjustmentAmount::Percent(percent),
            ));
        }
        let (booking_surcharges, booking_discounts) = apply_adjustments(subtotal, &adjustments);
        let booking_surcharges = round_money(booking_surcharges, &currency);
        let booking_discounts = round_money(booking_discounts, &currency);
        let taxable = subtotal + booking_surcharges - booking_discounts;

        let tax_rate = if customer.tax_exempt {
            Decimal::ZERO
        } else {
            customer.tax_rate.unwrap_or(self.default_tax_rate)
        };
        let tax_amount = round_money(taxable * tax_rate / Decimal::ONE_HUNDRED, &currency);
        let grand_total = round_money(taxable + tax_amount, &currency);

        debug!(
            "estimate for {}: {} lines, {rental_days} days, grand total {grand_total} {currency}",
            customer.id,
            lines.len()
        );
        Ok(Estimate {
            lines,
            rental_days,
            subtotal,
            total_surcharges: round_money(line_surcharges, &currency) + booking_surcharges,
            total_discounts: round_money(line_discounts, &currency) + booking_discounts,
            tax_rate,
            tax_amount,
            grand_total,
            currency,
        })
    }

    fn price_line(
        &self,
        item: &Item,
        identity: &str,
        qty: u32,
        span: Span,
        currency: &str,
    ) -> Result<QuoteLine, EngineError> {
        let rental_days = span.days();
        match compute_line(item, identity, qty, span.start, span.end, currency, &self.tiers) {
            Ok(line) => Ok(line),
            Err(EngineError::PricingUnavailable(_)) => Ok(QuoteLine::failed(
                identity,
                qty,
                rental_days,
                LineError::PricingUnavailable,
            )),
            Err(e) => Err(e),
        }
    }
}

// ── Request sequencing ───────────────────────────────────────────

/// One quote request within a session, numbered in issue order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub session: String,
    pub seq: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sequenced<T> {
    /// The newest request for its session.
    Current(T),
    /// A newer request was issued; discard this result.
    Superseded { latest: u64 },
}

impl<T> Sequenced<T> {
    pub fn into_current(self) -> Option<T> {
        match self {
            Sequenced::Current(value) => Some(value),
            Sequenced::Superseded { .. } => None,
        }
    }
}

/// Last-request-wins by sequence number, per session. Responses that arrive
/// after a newer request was issued are dropped, whatever their arrival order.
#[derive(Default)]
pub struct QuoteSequencer {
    latest: DashMap<String, u64>,
}

impl QuoteSequencer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, session: &str) -> RequestTicket {
        let mut latest = self.latest.entry(session.to_string()).or_insert(0);
        *latest += 1;
        RequestTicket {
            session: session.to_string(),
            seq: *latest,
        }
    }

    pub fn latest(&self, session: &str) -> Option<u64> {
        self.latest.get(session).map(|v| *v)
    }

    pub fn is_current(&self, ticket: &RequestTicket) -> bool {
        self.latest(&ticket.session) == Some(ticket.seq)
    }

    pub fn accept<T>(&self, ticket: &RequestTicket, value: T) -> Sequenced<T> {
        if self.is_current(ticket) {
            Sequenced::Current(value)
        } else {
            self.superseded(ticket)
        }
    }

    fn superseded<T>(&self, ticket: &RequestTicket) -> Sequenced<T> {
        Sequenced::Superseded {
            latest: self.latest(&ticket.session).unwrap_or(ticket.seq),
        }
    }

    /// Forget a session; outstanding tickets for it become stale.
    pub fn end_session(&self, session: &str) {
        self.latest.remove(session);
    }
}

#[cfg(test)]
mod tests {
    use rust_decimal_macros::dec;

    use super::*;

    fn june(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, day).unwrap()
    }

    fn lines(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    async fn service(config: EngineConfig) -> QuoteService {
        let engine = Arc::new(Engine::new(config.boundary_policy));
        engine
            .register_item(Item::pooled("TENT-A", 5, Rates::daily(dec!(20))))
            .await
            .unwrap();
        engine
            .register_item(Item::pooled(
                "GEN",
                1,
                Rates {
                    daily: Some(dec!(10)),
                    weekly: Some(dec!(60)),
                    monthly: Some(dec!(200)),
                },
            ))
            .await
            .unwrap();
        engine
            .register_item(Item::pooled("BARE", 3, Rates::default()))
            .await
            .unwrap();
        QuoteService::new(engine, &config)
    }

    #[tokio::test]
    async fn simple_estimate() {
        let quotes = service(EngineConfig::default()).await;
        let estimate = quotes
            .estimate(&lines(&[("TENT-A", 2)]), june(1), june(3), &Customer::new("C-1"))
            .await
            .unwrap();
        assert_eq!(estimate.rental_days, 3);
        assert_eq!(estimate.subtotal, dec!(120));
        assert_eq!(estimate.grand_total, dec!(120));
        assert_eq!(estimate.currency, "USD");
    }

    #[tokio::test]
    async fn rejects_empty_and_reversed() {
        let quotes = service(EngineConfig::default()).await;
        let customer = Customer::new("C-1");
        assert!(matches!(
            quotes.estimate(&[], june(1), june(3), &customer).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            quotes.estimate(&lines(&[("TENT-A", 1)]), june(3), june(1), &customer).await,
            Err(EngineError::InvalidRequest(_))
        ));
        assert!(matches!(
            quotes.estimate(&lines(&[("TENT-A", 0)]), june(1), june(3), &customer).await,
            Err(EngineError::InvalidRequest(_))
        ));
    }

    #[tokio::test]
    async fn per_line_errors_keep_order_and_skip_subtotal() {
        let quotes = service(EngineConfig::default()).await;
        let estimate = quotes
            .estimate(
                &lines(&[("GHOST", 1), ("TENT-A", 1), ("GEN", 2), ("BARE", 1)]),
                june(1),
                june(10),
                &Customer::new("C-1"),
            )
            .await
            .unwrap();
        let ids: Vec<_> = estimate.lines.iter().map(|l| l.identity.as_str()).collect();
        assert_eq!(ids, vec!["GHOST", "TENT-A", "GEN", "BARE"]);
        assert_eq!(estimate.lines[0].error, Some(LineError::UnknownItem));
        assert!(estimate.lines[1].is_priced());
        assert!(matches!(estimate.lines[2].error, Some(LineError::Unavailable(_))));
        assert_eq!(estimate.lines[3].error, Some(LineError::PricingUnavailable));
        assert_eq!(estimate.lines[2].line_total, Decimal::ZERO);
        assert_eq!(estimate.subtotal, dec!(200));
    }

    #[tokio::test]
    async fn tiered_line_breakdown() {
        let quotes = service(EngineConfig::default()).await;
        let estimate = quotes
            .estimate(&lines(&[("GEN", 1)]), june(1), june(10), &Customer::new("C-1"))
            .await
            .unwrap();
        let breakdown = estimate.lines[0].breakdown.clone().unwrap();
        assert_eq!((breakdown.weeks, breakdown.days), (1, 3));
        assert_eq!(estimate.subtotal, dec!(90));
    }

    #[tokio::test]
    async fn duplicate_lines_share_availability() {
        let quotes = service(EngineConfig::default()).await;
        let estimate = quotes
            .estimate(
                &lines(&[("TENT-A", 3), ("TENT-A", 3)]),
                june(1),
                june(1),
                &Customer::new("C-1"),
            )
            .await
            .unwrap();
        assert!(estimate.lines.iter().all(|l| !l.is_priced()));
        assert_eq!(estimate.subtotal, Decimal::ZERO);
    }

    #[tokio::test]
    async fn booking_adjustments_and_tax() {
        let config = EngineConfig {
            tax_rate: dec!(10),
            ..EngineConfig::default()
        };
        let quotes = service(config).await;
        let customer = Customer {
            discount_percent: Some(dec!(5)),
            ..Customer::new("C-1")
        };
        let delivery = Adjustment::surcharge("delivery", AdjustmentAmount::Flat(dec!(40)));
        let estimate = quotes
            .estimate_with(&lines(&[("TENT-A", 2)]), june(1), june(3), &customer, &[delivery])
            .await
            .unwrap();
        // 120 + 40 delivery = 160, 5% off = 8, taxable 152, tax 15.20
        assert_eq!(estimate.subtotal, dec!(120));
        assert_eq!(estimate.total_surcharges, dec!(40));
        assert_eq!(estimate.total_discounts, dec!(8));
        assert_eq!(estimate.tax_rate, dec!(10));
        assert_eq!(estimate.tax_amount, dec!(15.20));
        assert_eq!(estimate.grand_total, dec!(167.20));
    }

    #[tokio::test]
    async fn tax_exempt_customer_and_currency() {
        let config = EngineConfig {
            tax_rate: dec!(10),
            ..EngineConfig::default()
        };
        let quotes = service(config).await;
        let customer = Customer {
            currency: Some("JPY".into()),
            tax_exempt: true,
            ..Customer::new("C-2")
        };
        let estimate = quotes
            .estimate(&lines(&[("TENT-A", 1)]), june(1), june(1), &customer)
            .await
            .unwrap();
        assert_eq!(estimate.tax_amount, Decimal::ZERO);
        assert_eq!(estimate.currency, "JPY");
        assert_eq!(estimate.grand_total, dec!(20));
    }

    #[test]
    fn sequencer_last_request_wins() {
        let sequencer = QuoteSequencer::new();
        let first = sequencer.issue("S-1");
        let second = sequencer.issue("S-1");
        let other = sequencer.issue("S-2");
        assert_eq!((first.seq, second.seq, other.seq), (1, 2, 1));

        // The newer response arrives first; the older one must not win later.
        assert_eq!(sequencer.accept(&second, "new"), Sequenced::Current("new"));
        assert_eq!(sequencer.accept(&first, "old"), Sequenced::Superseded { latest: 2 });
        assert!(sequencer.is_current(&other));

        sequencer.end_session("S-1");
        assert!(!sequencer.is_current(&second));
    }

    #[tokio::test]
    async fn stale_ticket_skips_work() {
        let quotes = service(EngineConfig::default()).await;
        let customer = Customer::new("C-1");
        let stale = quotes.sequencer.issue("S-1");
        let fresh = quotes.sequencer.issue("S-1");

        let result = quotes
            .estimate_sequenced(&stale, &lines(&[("TENT-A", 1)]), june(1), june(2), &customer)
            .await
            .unwrap();
        assert_eq!(result, Sequenced::Superseded { latest: 2 });

        let result = quotes
            .estimate_sequenced(&fresh, &lines(&[("TENT-A", 1)]), june(1), june(2), &customer)
            .await
            .unwrap();
        assert_eq!(result.into_current().map(|e| e.subtotal), Some(dec!(40)));
    }
}
