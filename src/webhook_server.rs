// HTTP listener for M-Pesa callbacks (STK results, async results, queue timeouts)

use crate::mpesa::webhook::{decode_callback, ResultCallback, StkPushCallback};
use axum::{
    body::Bytes,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::net::SocketAddr;
use tracing::{info, warn};

/// Body M-Pesa expects back from a callback endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct CallbackAck {
    #[serde(rename = "ResultCode")]
    pub result_code: i64,
    #[serde(rename = "ResultDesc")]
    pub result_desc: &'static str,
}

impl CallbackAck {
    pub fn accepted() -> Self {
        Self {
            result_code: 0,
            result_desc: "Accepted",
        }
    }
}

pub fn router() -> Router {
    Router::new()
        .route("/mpesa/stk-callback", post(handle_stk_callback))
        .route("/mpesa/result-callback", post(handle_result_callback))
        .route("/mpesa/timeout-callback", post(handle_timeout_callback))
        .route("/health", get(health_check))
}

pub async fn run_callback_server(port: u16) -> anyhow::Result<()> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Starting callback HTTP server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router()).await?;

    Ok(())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

fn rejected(kind: &str, e: impl std::fmt::Display) -> Response {
    warn!(target: "mpesa", callback = kind, "malformed callback: {}", e);
    (StatusCode::BAD_REQUEST, e.to_string()).into_response()
}

async fn handle_stk_callback(body: Bytes) -> Response {
    let cb: StkPushCallback = match decode_callback(&body[..]) {
        Ok(cb) => cb,
        Err(e) => return rejected("stk", e),
    };
    let stk = &cb.body.stk_callback;
    info!(
        target: "mpesa",
        merchant_request_id = %stk.merchant_request_id,
        checkout_request_id = %stk.checkout_request_id,
        result_code = stk.result_code,
        receipt = ?stk.metadata_value("MpesaReceiptNumber"),
        "stk callback: {}",
        stk.result_desc
    );
    Json(CallbackAck::accepted()).into_response()
}

async fn handle_result_callback(body: Bytes) -> Response {
    let cb: ResultCallback = match decode_callback(&body[..]) {
        Ok(cb) => cb,
        Err(e) => return rejected("result", e),
    };
    let result = &cb.result;
    info!(
        target: "mpesa",
        conversation_id = %result.conversation_id,
        originator_conversation_id = %result.originator_conversation_id,
        transaction_id = %result.transaction_id,
        result_code = result.result_code,
        "result callback: {}",
        result.result_desc
    );
    Json(CallbackAck::accepted()).into_response()
}

async fn handle_timeout_callback(body: Bytes) -> Response {
    let cb: ResultCallback = match decode_callback(&body[..]) {
        Ok(cb) => cb,
        Err(e) => return rejected("timeout", e),
    };
    warn!(
        target: "mpesa",
        conversation_id = %cb.result.conversation_id,
        originator_conversation_id = %cb.result.originator_conversation_id,
        "request timed out in queue: {}",
        cb.result.result_desc
    );
    Json(CallbackAck::accepted()).into_response()
}
