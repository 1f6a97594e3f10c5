//! HTTP endpoint handlers

use std::sync::Arc;
use axum::{
    extract::{multipart::MultipartError, FromRequest, Multipart, Request, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::Json,
};
use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::{
    services::SubmitResponse,
    state::{ReceivedFeedback, ReceivedImage, ReceiverState},
};
use super::responses::{HealthResponse, SessionNotice, StatusResponse};

type SubmitReply = (StatusCode, Json<SubmitResponse>);

/// Handle POST /submit_feedback - multipart feedback or the session-closed notice
pub async fn submit_feedback_handler(
    State(state): State<Arc<ReceiverState>>,
    request: Request,
) -> SubmitReply {
    let is_json = request
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with("application/json"));

    if is_json {
        return session_notice(&state, request).await;
    }

    if state.take_failure() {
        warn!("Rejecting submission (scheduled failure)");
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(SubmitResponse::failed("Receiver temporarily unavailable")),
        );
    }

    let multipart = match Multipart::from_request(request, &()).await {
        Ok(multipart) => multipart,
        Err(rejection) => {
            warn!("Rejected submission: {}", rejection.body_text());
            return (
                StatusCode::BAD_REQUEST,
                Json(SubmitResponse::failed(rejection.body_text())),
            );
        }
    };

    let feedback = match read_feedback(multipart).await {
        Ok(feedback) => feedback,
        Err(e) => {
            warn!("Malformed multipart body: {}", e.body_text());
            return (e.status(), Json(SubmitResponse::failed(e.body_text())));
        }
    };

    match state.record(feedback) {
        Ok(total) => {
            debug!("{} submissions received so far", total);
            (StatusCode::OK, Json(SubmitResponse::ok("Feedback received")))
        }
        Err(e) => {
            error!("Failed to store feedback: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(SubmitResponse::failed("Failed to store feedback")),
            )
        }
    }
}

async fn read_feedback(mut multipart: Multipart) -> Result<ReceivedFeedback, MultipartError> {
    let mut feedback = ReceivedFeedback {
        text: None,
        is_timeout_capture: false,
        source_event: None,
        timestamp: None,
        csrf_token: None,
        images: Vec::new(),
        received_at: Utc::now(),
    };

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().unwrap_or_default().to_string();
        if name == "images" {
            let file_name = field.file_name().map(str::to_string);
            let content_type = field.content_type().map(str::to_string);
            let bytes = field.bytes().await?;
            feedback.images.push(ReceivedImage {
                file_name,
                content_type,
                size: bytes.len(),
            });
            continue;
        }

        let value = field.text().await?;
        match name.as_str() {
            "textFeedback" => feedback.text = Some(value),
            "is_timeout_capture" => feedback.is_timeout_capture = value == "true",
            "source_event" => feedback.source_event = Some(value),
            "timestamp" => feedback.timestamp = Some(value),
            "csrf_token" => feedback.csrf_token = Some(value),
            other => debug!("Ignoring form field {}", other),
        }
    }
    Ok(feedback)
}

async fn session_notice(state: &ReceiverState, request: Request) -> SubmitReply {
    let Json(notice) = match Json::<SessionNotice>::from_request(request, &()).await {
        Ok(notice) => notice,
        Err(rejection) => {
            return (
                rejection.status(),
                Json(SubmitResponse::failed(rejection.body_text())),
            );
        }
    };

    if notice.status == "session_closed" {
        state.close_session();
        (StatusCode::OK, Json(SubmitResponse::ok("Session closed")))
    } else {
        (
            StatusCode::BAD_REQUEST,
            Json(SubmitResponse::failed(format!("Unknown status {:?}", notice.status))),
        )
    }
}

/// Handle GET /status - Counts of what has been received
pub async fn status_handler(
    State(state): State<Arc<ReceiverState>>,
) -> Result<Json<StatusResponse>, StatusCode> {
    let totals = match state.totals() {
        Ok(totals) => totals,
        Err(e) => {
            error!("Failed to read submissions: {}", e);
            return Err(StatusCode::INTERNAL_SERVER_ERROR);
        }
    };
    info!("Status requested: {} submissions", totals.received);

    Ok(Json(StatusResponse {
        received: totals.received,
        timeout_captures: totals.timeout_captures,
        manual_submissions: totals.received - totals.timeout_captures,
        images: totals.images,
        sessions_closed: state.sessions_closed(),
        last_received_at: totals.last_received_at,
        uptime: state.get_uptime(),
        port: state.port,
        host: state.host.clone(),
    }))
}

/// Handle GET /health - Health check endpoint
pub async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}
