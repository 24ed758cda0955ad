use crate::auth::{AdminUser, AuthUser};
use crate::database;
use crate::handlers::common::{ApiError, api_error, json_body, not_found, optional_json_body};
use crate::types::{
    AppState, ComplaintDetail, ComplaintStatus, PaymentComplaint, PaymentRequest,
    PaymentRequestDetail, PaymentStatus, ReviewComplaintRequest, ReviewPaymentRequest,
    SubmitComplaintRequest, SubmitPaymentRequest,
};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use serde::Deserialize;
use tracing::{info, warn};

const MAX_COMPLAINT_REASON_CHARS: usize = 2000;

#[derive(Deserialize)]
pub struct StatusFilter {
    pub status: Option<String>,
}

fn parse_filter<T: std::str::FromStr>(filter: &StatusFilter) -> Result<Option<T>, ApiError> {
    match filter.status.as_deref().filter(|s| !s.is_empty()) {
        Some(s) => s
            .parse()
            .map(Some)
            .map_err(|_| api_error(StatusCode::BAD_REQUEST, format!("Unknown status: {}", s))),
        None => Ok(None),
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

// ---------------------------------------------------------------------------
// Payment requests
// ---------------------------------------------------------------------------

pub async fn submit_payment(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<SubmitPaymentRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentRequest>), ApiError> {
    let body = json_body(body)?;
    let proof = body.proof_image_url.trim();
    if proof.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "proof_image_url is required"));
    }

    let movie = database::get_movie(&state.db_pool, &body.movie_id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("Movie"))?;
    if !movie.requires_payment {
        return Err(api_error(StatusCode::BAD_REQUEST, "This movie is free to watch"));
    }
    let amount = movie.payment_amount.unwrap_or(0);

    let payment =
        database::create_payment_request(&state.db_pool, &user.user_id, &movie.id, amount, proof)
            .await
            .map_err(state.conflict_or_internal(
                "A payment request for this movie is already pending or approved",
            ))?;

    info!(payment_id = %payment.id, movie_id = %movie.id, "payment request submitted");
    Ok((StatusCode::CREATED, Json(payment)))
}

pub async fn list_my_payments(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PaymentRequest>>, ApiError> {
    let items = database::list_user_payment_requests(&state.db_pool, &user.user_id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(items))
}

pub async fn admin_list_payments(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<PaymentRequestDetail>>, ApiError> {
    let status = parse_filter::<PaymentStatus>(&filter)?;
    let items = database::list_payment_requests(&state.db_pool, status)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(items))
}

async fn review_payment(
    state: &AppState,
    admin: &AdminUser,
    id: &str,
    status: PaymentStatus,
    note: Option<String>,
) -> Result<Json<PaymentRequest>, ApiError> {
    let current = database::get_payment_request(&state.db_pool, id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("Payment request"))?;
    if current.status != PaymentStatus::Pending {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Payment request is already {}", current.status),
        ));
    }

    let note = non_empty(note);
    let reviewed = database::review_payment_request(
        &state.db_pool,
        id,
        status,
        &admin.0.user_id,
        note.as_deref(),
    )
    .await
    .map_err(state.internal_err())?
    .ok_or_else(|| api_error(StatusCode::CONFLICT, "Payment request was reviewed concurrently"))?;

    let movie_title = match database::get_movie(&state.db_pool, &reviewed.movie_id).await {
        Ok(movie) => movie.map(|m| m.title),
        Err(e) => {
            warn!(error = ?e, movie_id = %reviewed.movie_id, "movie lookup for notification failed");
            None
        }
    }
    .unwrap_or_else(|| "the movie".to_string());

    let (kind, title, mut message) = match status {
        PaymentStatus::Approved => (
            "payment_approved",
            "Payment approved",
            format!("Your payment for \"{}\" was approved. Enjoy watching!", movie_title),
        ),
        _ => (
            "payment_rejected",
            "Payment rejected",
            format!("Your payment for \"{}\" was rejected.", movie_title),
        ),
    };
    if let Some(note) = &note {
        message.push_str(&format!(" Note: {}", note));
    }
    database::notify(
        &state.db_pool,
        &reviewed.user_id,
        kind,
        title,
        &message,
        Some(&reviewed.id),
    )
    .await;

    info!(
        payment_id = %reviewed.id,
        status = %status,
        admin = %admin.0.user_id,
        "payment request reviewed"
    );
    Ok(Json(reviewed))
}

pub async fn approve_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    body: Result<Json<ReviewPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentRequest>, ApiError> {
    let body = optional_json_body(body)?;
    review_payment(&state, &admin, &id, PaymentStatus::Approved, body.note).await
}

pub async fn reject_payment(
    State(state): State<AppState>,
    admin: AdminUser,
    Path(id): Path<String>,
    body: Result<Json<ReviewPaymentRequest>, JsonRejection>,
) -> Result<Json<PaymentRequest>, ApiError> {
    let body = optional_json_body(body)?;
    review_payment(&state, &admin, &id, PaymentStatus::Rejected, body.note).await
}

// ---------------------------------------------------------------------------
// Complaints
// ---------------------------------------------------------------------------

pub async fn submit_complaint(
    State(state): State<AppState>,
    user: AuthUser,
    body: Result<Json<SubmitComplaintRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PaymentComplaint>), ApiError> {
    let body = json_body(body)?;
    let reason = body.reason.trim();
    if reason.is_empty() {
        return Err(api_error(StatusCode::BAD_REQUEST, "reason is required"));
    }
    if reason.chars().count() > MAX_COMPLAINT_REASON_CHARS {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            format!("reason must be at most {} characters", MAX_COMPLAINT_REASON_CHARS),
        ));
    }

    // someone else's payment is reported as missing
    let payment = database::get_payment_request(&state.db_pool, &body.payment_request_id)
        .await
        .map_err(state.internal_err())?
        .filter(|p| p.user_id == user.user_id)
        .ok_or_else(|| not_found("Payment request"))?;

    let image_url = non_empty(body.image_url);
    let complaint = database::create_complaint(
        &state.db_pool,
        &payment.id,
        &user.user_id,
        reason,
        image_url.as_deref(),
    )
    .await
    .map_err(state.internal_err())?;

    info!(complaint_id = %complaint.id, payment_id = %payment.id, "complaint submitted");
    Ok((StatusCode::CREATED, Json(complaint)))
}

pub async fn list_my_complaints(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<Json<Vec<PaymentComplaint>>, ApiError> {
    let items = database::list_user_complaints(&state.db_pool, &user.user_id)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(items))
}

pub async fn admin_list_complaints(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Query(filter): Query<StatusFilter>,
) -> Result<Json<Vec<ComplaintDetail>>, ApiError> {
    let status = parse_filter::<ComplaintStatus>(&filter)?;
    let items = database::list_complaints(&state.db_pool, status)
        .await
        .map_err(state.internal_err())?;
    Ok(Json(items))
}

async fn review_complaint(
    state: &AppState,
    id: &str,
    status: ComplaintStatus,
    response: Option<String>,
) -> Result<Json<PaymentComplaint>, ApiError> {
    let current = database::get_complaint(&state.db_pool, id)
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| not_found("Complaint"))?;
    if current.status != ComplaintStatus::Pending {
        return Err(api_error(
            StatusCode::CONFLICT,
            format!("Complaint is already {}", current.status.as_str()),
        ));
    }

    let response = non_empty(response);
    let reviewed = database::review_complaint(&state.db_pool, id, status, response.as_deref())
        .await
        .map_err(state.internal_err())?
        .ok_or_else(|| api_error(StatusCode::CONFLICT, "Complaint was reviewed concurrently"))?;

    let outcome = match status {
        ComplaintStatus::Resolved => "resolved",
        _ => "rejected",
    };
    let mut message = format!("Your complaint was {}.", outcome);
    if let Some(response) = &response {
        message.push_str(&format!(" Response: {}", response));
    }
    database::notify(
        &state.db_pool,
        &reviewed.user_id,
        "complaint_response",
        "Complaint reviewed",
        &message,
        Some(&reviewed.payment_request_id),
    )
    .await;

    info!(complaint_id = %reviewed.id, outcome, "complaint reviewed");
    Ok(Json(reviewed))
}

pub async fn resolve_complaint(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    body: Result<Json<ReviewComplaintRequest>, JsonRejection>,
) -> Result<Json<PaymentComplaint>, ApiError> {
    let body = optional_json_body(body)?;
    review_complaint(&state, &id, ComplaintStatus::Resolved, body.response).await
}

pub async fn reject_complaint(
    State(state): State<AppState>,
    AdminUser(_): AdminUser,
    Path(id): Path<String>,
    body: Result<Json<ReviewComplaintRequest>, JsonRejection>,
) -> Result<Json<PaymentComplaint>, ApiError> {
    let body = optional_json_body(body)?;
    review_complaint(&state, &id, ComplaintStatus::Rejected, body.response).await
}
