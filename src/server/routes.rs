//! Route handlers for the invocation boundary.
//!
//! All responses are JSON except the plain-text probes. State is shared via
//! `Arc<ServerState>`.

use axum::{
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use chrono::Utc;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, warn};

use crate::engine::OutcomeEvaluator;
use crate::types::PassSummary;

pub const SERVICE_NAME: &str = "outcome-tracker";

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

pub struct ServerState {
    pub evaluator: Arc<OutcomeEvaluator>,
    /// Bearer token required by `/evaluate`. `None` leaves it open.
    pub auth_token: Option<SecretString>,
}

impl ServerState {
    pub fn new(evaluator: Arc<OutcomeEvaluator>, auth_token: Option<SecretString>) -> Self {
        Self {
            evaluator,
            auth_token,
        }
    }

    fn is_authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.auth_token else {
            return true;
        };
        headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .is_some_and(|token| token.trim() == expected.expose_secret().as_str())
    }
}

pub type AppState = Arc<ServerState>;

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct EvaluateResponse {
    pub message: String,
    pub total_pending: usize,
    pub evaluated: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub ok: bool,
    pub service: String,
    pub timestamp: String,
}

// ---------------------------------------------------------------------------
// Route handlers
// ---------------------------------------------------------------------------

/// POST|GET /evaluate: run one evaluation pass.
pub async fn evaluate(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if !state.is_authorized(&headers) {
        warn!("Rejected unauthorized evaluation request");
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "unauthorized".to_string(),
            }),
        )
            .into_response();
    }

    match state.evaluator.run_pass(Utc::now()).await {
        Ok(summary) => (
            StatusCode::OK,
            Json(EvaluateResponse {
                message: pass_message(&summary),
                total_pending: summary.total_candidates,
                evaluated: summary.evaluated,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Evaluation pass failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

fn pass_message(summary: &PassSummary) -> String {
    if summary.market_closed {
        "Market closed, no trades evaluated".to_string()
    } else {
        format!(
            "Evaluated {} of {} pending trades",
            summary.evaluated, summary.total_candidates
        )
    }
}

/// OPTIONS /evaluate. Pre-flight or no-op probe.
pub async fn preflight() -> &'static str {
    "ok"
}

/// GET /health
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        ok: true,
        service: SERVICE_NAME.to_string(),
        timestamp: Utc::now().to_rfc3339(),
    })
}

/// GET /
pub async fn root() -> &'static str {
    "outcome tracker running.\n"
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
