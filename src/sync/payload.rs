use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::config::LedgerConfig;
use crate::model::Invoice;

/// Accounts-receivable invoice in the ledger API's shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LedgerInvoice {
    #[serde(rename = "Type")]
    pub kind: String,
    pub contact: LedgerContact,
    pub date: NaiveDate,
    pub due_date: NaiveDate,
    pub invoice_number: String,
    pub reference: String,
    pub status: String,
    pub line_items: Vec<LedgerLineItem>,
    pub currency_code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LedgerContact {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LedgerLineItem {
    pub description: String,
    pub quantity: Decimal,
    pub unit_amount: Decimal,
    pub account_code: String,
    pub tax_type: String,
    pub line_amount: Decimal,
}

impl LedgerInvoice {
    /// Item lines first, then one line per tax row.
    pub fn from_invoice(invoice: &Invoice, ledger: &LedgerConfig) -> Self {
        let line = |description: &str, quantity, unit_amount, line_amount| LedgerLineItem {
            description: description.to_string(),
            quantity,
            unit_amount,
            account_code: ledger.account_code.clone(),
            tax_type: ledger.tax_type.clone(),
            line_amount,
        };
        let mut line_items: Vec<LedgerLineItem> = invoice
            .lines
            .iter()
            .map(|l| line(l.description.as_str(), l.qty, l.rate, l.amount))
            .collect();
        line_items.extend(
            invoice
                .taxes
                .iter()
                .map(|t| line(t.description.as_str(), Decimal::ONE, t.amount, t.amount)),
        );

        Self {
            kind: "ACCREC".into(),
            contact: LedgerContact {
                name: invoice.customer_name.clone(),
            },
            date: invoice.posting_date,
            due_date: invoice.due_date,
            invoice_number: invoice.id.clone(),
            reference: format!("Invoice {}", invoice.id),
            status: "AUTHORISED".into(),
            line_items,
            currency_code: invoice.currency.clone(),
        }
    }
}

/// First validation message from a ledger error body, else its top-level
/// `Message`. `None` when the body is not JSON or carries neither.
pub fn rejection_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value
        .pointer("/Elements/0/ValidationErrors/0/Message")
        .or_else(|| value.get("Message"))
        .and_then(|m| m.as_str())
        .map(str::to_string)
}
