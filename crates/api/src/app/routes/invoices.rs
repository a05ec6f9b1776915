use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post, put},
};

use shipbill_core::{DocumentRef, InvoiceId, OrderId};

use crate::app::{dto, errors};
use crate::app::services::AppServices;

pub fn router() -> Router {
    Router::new()
        .route("/", post(create_invoice).get(list_invoices))
        .route("/:id", get(get_invoice))
        .route("/:id/send", put(send_invoice))
        .route("/order/:order_id", get(get_invoice_by_order))
}

pub async fn create_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Json(body): Json<dto::CreateInvoiceRequest>,
) -> axum::response::Response {
    let order_id: OrderId = match body.order_id.parse() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };
    let document_ref = match DocumentRef::new(body.document_ref) {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle.create(order_id, document_ref).await {
        Ok(invoice) => {
            (StatusCode::CREATED, Json(dto::invoice_to_json(&invoice))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}

/// Idempotent: sending an already sent invoice returns the record unchanged.
pub async fn send_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match id.parse() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle.send(id).await {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_invoice(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let id: InvoiceId = match id.parse() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle.get(id).await {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn get_invoice_by_order(
    Extension(services): Extension<Arc<AppServices>>,
    Path(order_id): Path<String>,
) -> axum::response::Response {
    let order_id: OrderId = match order_id.parse() {
        Ok(v) => v,
        Err(e) => return errors::domain_error_to_response(e),
    };

    match services.lifecycle.get_by_order(&order_id).await {
        Ok(invoice) => (StatusCode::OK, Json(dto::invoice_to_json(&invoice))).into_response(),
        Err(e) => errors::store_error_to_response(e),
    }
}

pub async fn list_invoices(
    Extension(services): Extension<Arc<AppServices>>,
) -> axum::response::Response {
    match services.lifecycle.list().await {
        Ok(invoices) => {
            let items = invoices
                .iter()
                .map(dto::invoice_to_json)
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(serde_json::json!({ "items": items }))).into_response()
        }
        Err(e) => errors::store_error_to_response(e),
    }
}
