use serde::Deserialize;

use shipbill_invoicing::{Invoice, InvoiceState};

// Wire format is camelCase, matching the order-event feed.

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateInvoiceRequest {
    pub order_id: String,
    pub document_ref: String,
}

// -------------------------
// Response mapping
// -------------------------

pub fn invoice_to_json(invoice: &Invoice) -> serde_json::Value {
    let status = match invoice.state() {
        InvoiceState::Created => "created",
        InvoiceState::Sent => "sent",
    };
    serde_json::json!({
        "id": invoice.id.to_string(),
        "orderId": invoice.order_id.as_str(),
        "documentRef": invoice.document_ref.as_str(),
        "status": status,
        "createdAt": invoice.created_at.to_rfc3339(),
        "sentAt": invoice.sent_at.map(|t| t.to_rfc3339()),
    })
}
