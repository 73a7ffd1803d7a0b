//! HTTP handlers implementing the collector contract: the submit endpoint
//! and the four health/diagnostic endpoints.

use crate::augment::{build_report, AugmentConfig};
use crate::state::AppState;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bpcollector_metrics::{tag, Metric};
use bpcollector_types::{ThrottleVerdict, VerifyCheck, VerifyReport};
use chrono::Utc;
use tracing::{info, warn};

const CONTENT_TYPE_TEXT: &str = "text/plain; charset=utf-8";

/// `POST /submit`. Parses, throttles, assigns an id, and hands the crash off
/// to the mover, returning as soon as the hand-off queue has accepted it.
pub async fn submit(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let received_at = Utc::now();
    let body_len = body.len();

    if !headers.contains_key(axum::http::header::CONTENT_LENGTH) {
        return parse_failure_response(bpcollector_parser::ParseError::NoContentLength);
    }

    let content_type = headers
        .get(axum::http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok());
    let content_encoding = headers
        .get(axum::http::header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok());

    let parsed = match bpcollector_parser::parse(body, content_type, content_encoding, state.parse_limits).await {
        Ok(parsed) => parsed,
        Err(err) => {
            state.metrics.send(Metric::MalformedReport);
            warn!(reason = err.reason(), size = body_len, "rejected malformed submission");
            return parse_failure_response(err);
        }
    };

    let decision = state.throttler.decide(&parsed.annotations);
    if decision.verdict == ThrottleVerdict::Reject {
        state.metrics.send(Metric::ReportRejected(vec![tag!("rule", &decision.rule_name)]));
        info!(rule = %decision.rule_name, "crash rejected by throttler");
        return discarded_response(StatusCode::OK);
    }

    let id = bpcollector_id::adopt_or_generate(
        parsed.annotations.get("uuid").map(String::as_str),
        received_at,
        decision.id_digit(),
    );

    let augment_config = AugmentConfig {
        dump_field: &state.config.policy.dump_field,
    };
    let verdict_tag = match decision.verdict.clone() {
        ThrottleVerdict::Accept => "accept",
        ThrottleVerdict::Defer => "defer",
        ThrottleVerdict::FakeAccept => "fakeaccept",
        ThrottleVerdict::Reject => unreachable!("rejected above"),
    };
    let report = build_report(parsed, decision, id.clone(), received_at, &augment_config);

    state.metrics.send(Metric::ReportAccepted(vec![tag!("verdict", verdict_tag)]));

    // If the client disconnects while we're still awaiting a queue slot, this
    // future is dropped by axum before `enqueue` returns, and `report` (owned
    // locally, not yet handed to anything) is simply discarded.
    match state.mover.enqueue(report).await {
        Ok(()) => {
            let body = format!("CrashID=bp-{id}\n");
            (
                StatusCode::OK,
                [(axum::http::header::CONTENT_TYPE, CONTENT_TYPE_TEXT)],
                body,
            )
                .into_response()
        }
        Err(_) => {
            warn!(id = %id, "hand-off queue saturated or closed; crash not acknowledged");
            discarded_response(StatusCode::SERVICE_UNAVAILABLE)
        }
    }
}

fn parse_failure_response(err: bpcollector_parser::ParseError) -> Response {
    (
        StatusCode::BAD_REQUEST,
        [
            ("X-Collector-Reason", err.reason()),
            ("Content-Type", CONTENT_TYPE_TEXT),
        ],
        format!("Bad Request: {err}\n"),
    )
        .into_response()
}

fn discarded_response(status: StatusCode) -> Response {
    (
        status,
        [(axum::http::header::CONTENT_TYPE, CONTENT_TYPE_TEXT)],
        "Discarded=1\n",
    )
        .into_response()
}

/// `GET /__lbheartbeat__`. Always `200`, no dependency checks.
pub async fn lb_heartbeat() -> StatusCode {
    StatusCode::OK
}

/// `GET /__heartbeat__`. Exercises storage and publish `verify()`.
pub async fn heartbeat(State(state): State<AppState>) -> Response {
    let storage_result = state.storage.verify().await;
    let publish_result = state.publish.verify().await;

    let report = VerifyReport {
        checks: vec![
            VerifyCheck {
                name: "storage".to_owned(),
                ok: storage_result.is_ok(),
                detail: storage_result.err().map(|e| e.to_string()),
            },
            VerifyCheck {
                name: "publish".to_owned(),
                ok: publish_result.is_ok(),
                detail: publish_result.err().map(|e| e.to_string()),
            },
        ],
    };

    let status = if report.all_ok() {
        StatusCode::OK
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (status, Json(report)).into_response()
}

/// `GET /__version__`. Build metadata read once at startup.
pub async fn version(State(state): State<AppState>) -> Json<crate::state::VersionInfo> {
    Json((*state.version).clone())
}

/// `GET /__broken__`. Deliberately panics to exercise error-reporting wiring.
/// Protected by basic auth when `COLLECTOR_BROKEN_AUTH_USER`/`_PASS` are set.
/// The panic is isolated to this request's task by axum's per-connection
/// task spawn — it does not take down the server.
pub async fn broken(State(state): State<AppState>, headers: HeaderMap) -> Response {
    if let (Some(user), Some(pass)) = (&state.config.broken_auth_user, &state.config.broken_auth_pass) {
        if !basic_auth_matches(&headers, user, pass) {
            return (StatusCode::UNAUTHORIZED, "unauthorized\n").into_response();
        }
    }
    panic!("deliberate fault requested via /__broken__")
}

fn basic_auth_matches(headers: &HeaderMap, user: &str, pass: &str) -> bool {
    let Some(raw) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };
    let Some(encoded) = raw.strip_prefix("Basic ") else {
        return false;
    };
    use base64::Engine;
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    decoded == format!("{user}:{pass}")
}
