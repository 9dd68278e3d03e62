use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use payline_catalog::{ProductError, TaxError};
use payline_order::{ManagerError, OrchestratorError, OrderError, RepositoryError};
use serde_json::json;

#[derive(Debug)]
pub enum AppError {
    NotFoundError(String),
    Anyhow(anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::NotFoundError(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::Anyhow(err) => match err.downcast_ref::<ManagerError>().and_then(manager_status) {
                Some(status) => (status, err.to_string()),
                None => {
                    tracing::error!("Internal Server Error: {:#}", err);
                    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error".to_string())
                }
            },
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self::Anyhow(err.into())
    }
}

/// Status for domain failures the client can act on; `None` means a server fault
fn manager_status(err: &ManagerError) -> Option<StatusCode> {
    match err {
        ManagerError::NotFound(_) => Some(StatusCode::NOT_FOUND),
        ManagerError::NotEditable(_) => Some(StatusCode::CONFLICT),
        ManagerError::Order(e) => Some(order_status(e)),
        ManagerError::Tax(TaxError::NotFound(_)) => Some(StatusCode::NOT_FOUND),
        ManagerError::Tax(_) => Some(StatusCode::UNPROCESSABLE_ENTITY),
        ManagerError::Product(ProductError::NotFound(_)) => Some(StatusCode::NOT_FOUND),
        ManagerError::Product(ProductError::LookupFailed(_)) => None,
        ManagerError::Repository(e) => repository_status(e),
        ManagerError::Payment(OrchestratorError::Validation(_)) => Some(StatusCode::BAD_REQUEST),
        ManagerError::Payment(
            OrchestratorError::NotPayable(_)
            | OrchestratorError::NotRefundable(_)
            | OrchestratorError::PaymentInProgress(_)
            | OrchestratorError::NotPending(_),
        ) => Some(StatusCode::CONFLICT),
        ManagerError::Payment(OrchestratorError::Order(e)) => Some(order_status(e)),
        ManagerError::Payment(OrchestratorError::Repository(e)) => repository_status(e),
    }
}

fn order_status(err: &OrderError) -> StatusCode {
    match err {
        OrderError::Validation(_) => StatusCode::BAD_REQUEST,
        OrderError::ItemNotFound(_) | OrderError::PaymentNotFound(_) => StatusCode::NOT_FOUND,
        OrderError::InvalidTransition { .. } | OrderError::Consistency(_) => StatusCode::CONFLICT,
    }
}

fn repository_status(err: &RepositoryError) -> Option<StatusCode> {
    match err {
        RepositoryError::NotFound(_) => Some(StatusCode::NOT_FOUND),
        RepositoryError::Conflict { .. } => Some(StatusCode::CONFLICT),
        RepositoryError::Backend(_) => None,
    }
}
