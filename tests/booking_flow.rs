use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

use hireline::config::EngineConfig;
use hireline::engine::EngineError;
use hireline::model::*;
use hireline::service::{parse_date, RentalService};
use hireline::sync::{LedgerTransport, TransportError};

struct NoLedger;

#[async_trait]
impl LedgerTransport for NoLedger {
    async fn attempt_sync(
        &self,
        _invoice: &Invoice,
        _external_id: Option<&str>,
    ) -> Result<String, TransportError> {
        Err(TransportError::Transport(None))
    }
}

fn service(config: EngineConfig) -> RentalService {
    RentalService::new(config, Arc::new(NoLedger))
}

fn date(s: &str) -> chrono::NaiveDate {
    parse_date(s).unwrap()
}

fn items(pairs: &[(&str, u32)]) -> Vec<(String, u32)> {
    pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
}

fn request(pairs: &[(&str, u32)]) -> BTreeMap<String, u32> {
    items(pairs).into_iter().collect()
}

async fn reserve(
    service: &RentalService,
    identity: &str,
    start: &str,
    end: &str,
    qty: u32,
    reference: &str,
) {
    service
        .engine()
        .commit_reservation(NewReservation::reserved(
            identity,
            Span::new(date(start), date(end)),
            qty,
            SourceRef::job(reference),
        ))
        .await
        .unwrap();
}

#[tokio::test]
async fn tent_booking_end_to_end() {
    let service = service(EngineConfig::default());
    service
        .engine()
        .register_item(Item::pooled("TENT-A", 5, Rates::daily(dec!(20))))
        .await
        .unwrap();

    let availability = service
        .check_availability(&request(&[("TENT-A", 2)]), "2024-06-01", "2024-06-03")
        .await
        .unwrap();
    assert!(availability["TENT-A"].available);
    assert_eq!(availability["TENT-A"].free_units, Some(5));

    let estimate = service
        .get_quote_estimate(
            &items(&[("TENT-A", 2)]),
            "2024-06-01",
            "2024-06-03",
            &Customer::new("CUST-1"),
        )
        .await
        .unwrap();
    assert_eq!(estimate.rental_days, 3);
    assert_eq!(estimate.lines.len(), 1);
    assert!(estimate.lines[0].is_priced());
    assert_eq!(estimate.subtotal, dec!(120));
    assert_eq!(estimate.tax_amount, Decimal::ZERO);
    assert_eq!(estimate.grand_total, dec!(120));
}

#[tokio::test]
async fn same_day_touch_on_serial_is_a_conflict() {
    let service = service(EngineConfig::default());
    service
        .engine()
        .register_item(Item::serialized(
            "CAM",
            vec!["CAM-001".into(), "CAM-002".into()],
            Rates::daily(dec!(45)),
        ))
        .await
        .unwrap();
    reserve(&service, "CAM-001", "2024-07-10", "2024-07-10", 1, "JOB-100").await;

    let result = service
        .check_availability(&request(&[("CAM-001", 1)]), "2024-07-10", "2024-07-12")
        .await
        .unwrap();
    assert!(!result["CAM-001"].available);
    assert!(result["CAM-001"].reason.as_deref().unwrap().contains("JOB-100"));

    // The sibling unit is free, so the quote prices it and flags the other.
    let estimate = service
        .get_quote_estimate(
            &items(&[("CAM-001", 1), ("CAM-002", 1)]),
            "2024-07-10",
            "2024-07-12",
            &Customer::new("CUST-1"),
        )
        .await
        .unwrap();
    assert!(matches!(estimate.lines[0].error, Some(LineError::Unavailable(_))));
    assert_eq!(estimate.lines[1].line_total, dec!(135));
    assert_eq!(estimate.subtotal, dec!(135));
}

#[tokio::test]
async fn turnaround_policy_permits_handover() {
    let config = EngineConfig {
        boundary_policy: BoundaryPolicy::Turnaround,
        ..EngineConfig::default()
    };
    let service = service(config);
    service
        .engine()
        .register_item(Item::serialized("CAM", vec!["CAM-001".into()], Rates::daily(dec!(45))))
        .await
        .unwrap();
    reserve(&service, "CAM-001", "2024-07-05", "2024-07-10", 1, "JOB-100").await;

    let result = service
        .check_availability(&request(&[("CAM-001", 1)]), "2024-07-10", "2024-07-12")
        .await
        .unwrap();
    assert!(result["CAM-001"].available);
}

#[tokio::test]
async fn pool_overlap_reports_peak() {
    let service = service(EngineConfig::default());
    service
        .engine()
        .register_item(Item::pooled("GEN-5KVA", 4, Rates::daily(dec!(80))))
        .await
        .unwrap();
    reserve(&service, "GEN-5KVA", "2024-06-01", "2024-06-05", 3, "JOB-1").await;
    service
        .engine()
        .commit_reservation_override(
            NewReservation::reserved(
                "GEN-5KVA",
                Span::new(date("2024-06-03"), date("2024-06-07")),
                2,
                SourceRef::job("JOB-2"),
            ),
            "cross-hire arranged",
        )
        .await
        .unwrap();

    let result = service
        .check_availability(&request(&[("GEN-5KVA", 2)]), "2024-06-01", "2024-06-10")
        .await
        .unwrap();
    let generator = &result["GEN-5KVA"];
    assert!(!generator.available);
    assert_eq!(generator.free_units, Some(0));
    let reason = generator.reason.as_deref().unwrap();
    assert!(reason.contains("peak 5 reserved on 2024-06-03"), "{reason}");

    let calendar = service
        .engine()
        .daily_free_units("GEN-5KVA", date("2024-06-02"), date("2024-06-06"))
        .await
        .unwrap();
    let free: Vec<u32> = calendar.into_iter().map(|(_, f)| f).collect();
    assert_eq!(free, vec![1, 0, 0, 0, 2]);
}

#[tokio::test]
async fn tiered_pricing_with_booking_extras() {
    let config = EngineConfig {
        tax_rate: dec!(20),
        ..EngineConfig::default()
    };
    let service = service(config);
    service
        .engine()
        .register_item(Item::pooled(
            "LIGHT-RIG",
            2,
            Rates {
                daily: Some(dec!(10)),
                weekly: Some(dec!(60)),
                monthly: Some(dec!(200)),
            },
        ))
        .await
        .unwrap();

    let customer = Customer::new("CUST-2");
    let delivery = Adjustment::surcharge("delivery", AdjustmentAmount::Flat(dec!(25)));
    let estimate = service
        .quotes()
        .estimate_with(
            &items(&[("LIGHT-RIG", 1)]),
            date("2024-06-01"),
            date("2024-07-05"),
            &customer,
            &[delivery],
        )
        .await
        .unwrap();
    // 35 days: one month + five days = 250; + 25 delivery = 275; 20% tax = 55
    assert_eq!(estimate.rental_days, 35);
    assert_eq!(estimate.subtotal, dec!(250));
    assert_eq!(estimate.tax_amount, dec!(55));
    assert_eq!(estimate.grand_total, dec!(330));
}

#[tokio::test]
async fn whole_call_errors() {
    let service = service(EngineConfig::default());
    let customer = Customer::new("CUST-1");
    assert!(matches!(
        service
            .get_quote_estimate(&[], "2024-06-01", "2024-06-03", &customer)
            .await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        service
            .get_quote_estimate(&items(&[("TENT-A", 1)]), "2024-06-03", "2024-06-01", &customer)
            .await,
        Err(EngineError::InvalidRequest(_))
    ));
    assert!(matches!(
        service
            .get_quote_estimate(&items(&[("TENT-A", 1)]), "June 1st", "2024-06-03", &customer)
            .await,
        Err(EngineError::InvalidRequest(_))
    ));
    let unknown = service
        .check_availability(&request(&[("NOPE", 1)]), "2024-06-01", "2024-06-03")
        .await
        .unwrap();
    assert_eq!(unknown["NOPE"], AvailabilityResult::unknown_item());
}

#[tokio::test]
async fn concurrent_quotes_and_bookings_stay_consistent() {
    let service = Arc::new(service(EngineConfig::default()));
    service
        .engine()
        .register_item(Item::pooled("CHAIR", 20, Rates::daily(dec!(2))))
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..30u32 {
        let service = service.clone();
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                let _ = service
                    .engine()
                    .commit_reservation(NewReservation::reserved(
                        "CHAIR",
                        Span::new(date("2024-06-01"), date("2024-06-02")),
                        2,
                        SourceRef::job(format!("JOB-{i}")),
                    ))
                    .await;
            } else {
                let availability = service
                    .check_availability(&request(&[("CHAIR", 1)]), "2024-06-01", "2024-06-02")
                    .await
                    .unwrap();
                let free = availability["CHAIR"].free_units.unwrap();
                assert!(free <= 20 && free % 2 == 0, "torn read: {free}");
            }
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
    let peak = service
        .engine()
        .max_concurrent_overlap("CHAIR", date("2024-06-01"), date("2024-06-02"))
        .await
        .unwrap();
    assert_eq!(peak.units, 20);
}
