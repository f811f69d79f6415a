use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::core::services::ServiceType;

/// Every failure the engine reports to callers. `kind()` is stable and
/// safe to match on from clients; `Display` is the human-readable detail.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("{0} is not connected; connect it before asking for this action")]
    ServiceNotConnected(ServiceType),
    #[error("could not turn the request into actions: {0}")]
    UnresolvableIntent(String),
    #[error("plan has {steps} steps but at most {max} are allowed")]
    PlanTooLarge { steps: usize, max: usize },
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    AdapterTransient(String),
    #[error("{0}")]
    AdapterPermanent(String),
    #[error("workflow {id} is {status} and cannot be retried")]
    InvalidRetryState { id: String, status: String },
    #[error("{0}")]
    Interrupted(String),
    #[error("workflow {0} not found")]
    WorkflowNotFound(String),
    #[error("workflow {0} belongs to another user")]
    Forbidden(String),
    #[error("no {0} connection for this user")]
    ConnectionNotFound(ServiceType),
    #[error("workflow store: {0}")]
    Store(String),
}

impl EngineError {
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::ServiceNotConnected(_) => "service_not_connected",
            EngineError::UnresolvableIntent(_) => "unresolvable_intent",
            EngineError::PlanTooLarge { .. } => "plan_too_large",
            EngineError::Validation(_) => "validation_error",
            EngineError::AdapterTransient(_) => "adapter_transient_error",
            EngineError::AdapterPermanent(_) => "adapter_permanent_error",
            EngineError::InvalidRetryState { .. } => "invalid_retry_state",
            EngineError::Interrupted(_) => "step_interrupted",
            EngineError::WorkflowNotFound(_) => "workflow_not_found",
            EngineError::Forbidden(_) => "forbidden",
            EngineError::ConnectionNotFound(_) => "connection_not_found",
            EngineError::Store(_) => "store_error",
        }
    }

    /// Compile-time errors are raised before any workflow record exists.
    pub fn is_compile_error(&self) -> bool {
        matches!(
            self,
            EngineError::ServiceNotConnected(_)
                | EngineError::UnresolvableIntent(_)
                | EngineError::PlanTooLarge { .. }
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::ServiceNotConnected(_) => StatusCode::PRECONDITION_FAILED,
            EngineError::UnresolvableIntent(_)
            | EngineError::PlanTooLarge { .. }
            | EngineError::Validation(_) => StatusCode::BAD_REQUEST,
            EngineError::AdapterTransient(_) | EngineError::AdapterPermanent(_) => {
                StatusCode::BAD_GATEWAY
            }
            EngineError::InvalidRetryState { .. } => StatusCode::CONFLICT,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::WorkflowNotFound(_) | EngineError::ConnectionNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            EngineError::Interrupted(_) | EngineError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind().to_string(),
            detail: self.to_string(),
        }
    }
}

/// Wire shape of an error: used in HTTP bodies and recorded on failed steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub detail: String,
}

impl From<EngineError> for ErrorBody {
    fn from(err: EngineError) -> Self {
        err.body()
    }
}

impl IntoResponse for EngineError {
    fn into_response(self) -> Response {
        (
            self.status_code(),
            Json(serde_json::json!({ "success": false, "error": self.body() })),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable_snake_case() {
        let cases = [
            (
                EngineError::ServiceNotConnected(ServiceType::Github),
                "service_not_connected",
            ),
            (
                EngineError::UnresolvableIntent("x".into()),
                "unresolvable_intent",
            ),
            (
                EngineError::PlanTooLarge { steps: 11, max: 10 },
                "plan_too_large",
            ),
            (EngineError::Validation("x".into()), "validation_error"),
            (EngineError::Interrupted("x".into()), "step_interrupted"),
            (
                EngineError::InvalidRetryState {
                    id: "w".into(),
                    status: "completed".into(),
                },
                "invalid_retry_state",
            ),
        ];
        for (err, kind) in cases {
            assert_eq!(err.kind(), kind);
        }
    }

    #[test]
    fn compile_errors_are_flagged() {
        assert!(EngineError::PlanTooLarge { steps: 3, max: 2 }.is_compile_error());
        assert!(EngineError::ServiceNotConnected(ServiceType::Slack).is_compile_error());
        assert!(!EngineError::AdapterPermanent("403".into()).is_compile_error());
    }

    #[test]
    fn plan_too_large_detail_names_both_bounds() {
        let detail = EngineError::PlanTooLarge { steps: 12, max: 10 }.to_string();
        assert!(detail.contains("12"));
        assert!(detail.contains("10"));
    }

    #[test]
    fn retry_state_maps_to_conflict() {
        let err = EngineError::InvalidRetryState {
            id: "w1".into(),
            status: "completed".into(),
        };
        assert_eq!(err.status_code(), StatusCode::CONFLICT);
        assert_eq!(err.body().kind, "invalid_retry_state");
    }
}
