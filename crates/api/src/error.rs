//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use fulfillment::FulfillmentError;
use serde_json::{Value, json};

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Bad request from the client.
    BadRequest(String),
    /// Engine error.
    Fulfillment(FulfillmentError),
}

impl ApiError {
    fn parts(&self) -> (StatusCode, &'static str, Value) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request", Value::Null),
            ApiError::Fulfillment(err) => {
                let status = match err {
                    FulfillmentError::NotFound { .. } => StatusCode::NOT_FOUND,
                    FulfillmentError::InvalidState { .. }
                    | FulfillmentError::InsufficientFunds { .. }
                    | FulfillmentError::InsufficientStock { .. } => StatusCode::CONFLICT,
                    FulfillmentError::InvalidQuantity(_)
                    | FulfillmentError::NoSupplyAgreement { .. }
                    | FulfillmentError::NothingToPurchase => StatusCode::BAD_REQUEST,
                    FulfillmentError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, err.kind(), details(err))
            }
        }
    }
}

fn details(err: &FulfillmentError) -> Value {
    match err {
        FulfillmentError::NotFound { entity, id } => json!({ "entity": entity, "id": id }),
        FulfillmentError::InvalidState {
            entity,
            id,
            state,
            action,
        } => json!({ "entity": entity, "id": id, "state": state, "action": action }),
        FulfillmentError::InsufficientFunds {
            payable,
            balance,
            overdraft,
        } => json!({
            "payable": payable.to_string(),
            "balance": balance.to_string(),
            "overdraft": overdraft.to_string(),
        }),
        FulfillmentError::InsufficientStock { shortfalls } => json!({ "shortfalls": shortfalls }),
        FulfillmentError::NoSupplyAgreement {
            supplier_id,
            book_id,
        } => json!({ "supplier_id": supplier_id, "book_id": book_id }),
        FulfillmentError::InvalidQuantity(_)
        | FulfillmentError::NothingToPurchase
        | FulfillmentError::Store(_) => Value::Null,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, details) = self.parts();
        metrics::counter!("api_errors_total", "kind" => kind).increment(1);
        let message = match &self {
            ApiError::BadRequest(msg) => msg.clone(),
            ApiError::Fulfillment(err) => err.to_string(),
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %message, "internal server error");
        }

        let body = json!({ "error": kind, "message": message, "details": details });
        (status, axum::Json(body)).into_response()
    }
}

impl From<FulfillmentError> for ApiError {
    fn from(err: FulfillmentError) -> Self {
        ApiError::Fulfillment(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::BookId;
    use domain::{Money, OverdraftPolicy};
    use fulfillment::StockShortfall;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                FulfillmentError::NotFound {
                    entity: "order",
                    id: "1".to_string(),
                },
                StatusCode::NOT_FOUND,
            ),
            (
                FulfillmentError::InsufficientFunds {
                    payable: Money::from_units(150),
                    balance: Money::from_units(100),
                    overdraft: OverdraftPolicy::NotAllowed,
                },
                StatusCode::CONFLICT,
            ),
            (
                FulfillmentError::NothingToPurchase,
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).into_response().status(), expected);
        }
    }

    #[test]
    fn test_stock_details_list_every_book() {
        let err = ApiError::from(FulfillmentError::InsufficientStock {
            shortfalls: vec![
                StockShortfall {
                    book_id: BookId::new("X"),
                    on_hand: 1,
                    required: 2,
                },
                StockShortfall {
                    book_id: BookId::new("Y"),
                    on_hand: 0,
                    required: 1,
                },
            ],
        });

        let (status, kind, details) = err.parts();

        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(kind, "insufficient_stock");
        assert_eq!(details["shortfalls"][1]["book_id"], "Y");
    }
}
