use crate::auth::FINGERPRINT_HEADER;
use crate::handlers::upload::UPLOAD_ID_HEADER;
use crate::handlers::{admin, auth, movies, notifications, payments, playback, upload};
use crate::types::AppState;
use axum::extract::{DefaultBodyLimit, State};
use axum::{
    Router,
    http::{HeaderName, Method, header},
    response::Redirect,
    routing::{delete, get, post},
};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

// chunks and single-request video uploads
const MAX_BODY_BYTES: usize = 256 * 1024 * 1024;

async fn root_redirect(State(state): State<AppState>) -> Redirect {
    state
        .config
        .server
        .root_redirect_url
        .as_deref()
        .map(Redirect::permanent)
        .unwrap_or_else(|| Redirect::temporary("/api/movies"))
}

fn public_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(auth::signup))
        .route("/auth/login", post(auth::login))
        .route("/devices/check", post(auth::check_device))
        .route("/movies", get(movies::list_movies))
        .route("/movies/{id}", get(movies::get_movie))
        .route("/movies/{id}/episodes", get(movies::list_episodes))
        .route("/movies/{id}/view", post(movies::record_view))
        .route("/movies/{id}/access", get(playback::get_access))
}

fn user_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(auth::me))
        .route("/movies/{id}/player", get(playback::get_player))
        .route(
            "/movies/{id}/progress",
            get(playback::get_progress)
                .put(playback::save_progress)
                .delete(playback::clear_progress),
        )
        .route(
            "/payments",
            get(payments::list_my_payments).post(payments::submit_payment),
        )
        .route(
            "/complaints",
            get(payments::list_my_complaints).post(payments::submit_complaint),
        )
        .route("/notifications", get(notifications::list_notifications))
        .route("/notifications/read-all", post(notifications::mark_all_read))
        .route("/notifications/{id}/read", post(notifications::mark_read))
        .route("/uploads/{bucket}", post(upload::upload_file))
}

fn admin_routes() -> Router<AppState> {
    Router::new()
        .route("/movies", post(movies::create_movie))
        .route(
            "/movies/{id}",
            axum::routing::put(movies::update_movie).delete(movies::delete_movie),
        )
        .route("/movies/{id}/episodes", post(movies::create_episode))
        .route(
            "/movies/{id}/episodes/{episode_id}",
            axum::routing::put(movies::update_episode).delete(movies::delete_episode),
        )
        .route("/payments", get(payments::admin_list_payments))
        .route("/payments/{id}/approve", post(payments::approve_payment))
        .route("/payments/{id}/reject", post(payments::reject_payment))
        .route("/complaints", get(payments::admin_list_complaints))
        .route("/complaints/{id}/resolve", post(payments::resolve_complaint))
        .route("/complaints/{id}/reject", post(payments::reject_complaint))
        .route("/users", get(admin::list_users))
        .route("/users/{id}/block", post(admin::block_user))
        .route("/delete-user", post(admin::delete_user))
        .route(
            "/blocked-devices",
            get(admin::list_blocked_devices).post(admin::block_device),
        )
        .route("/blocked-devices/{id}", delete(admin::unblock_device))
        .route(
            "/blocked-ips",
            get(admin::list_blocked_ips).post(admin::block_ip),
        )
        .route("/blocked-ips/{id}", delete(admin::unblock_ip))
        .route("/uploads/chunk", post(upload::upload_chunk))
        .route("/uploads/finalize", post(upload::finalize_upload))
        .route(
            "/uploads/{upload_id}",
            get(upload::upload_status).delete(upload::cancel_upload),
        )
}

pub fn build_router(state: AppState) -> Router {
    // Role checks live in the AuthUser/AdminUser extractors, so the groups
    // differ only in prefix.
    let api_routes = Router::new()
        .merge(public_routes())
        .merge(user_routes())
        .nest("/admin", admin_routes());

    Router::new()
        .nest("/api", api_routes)
        .route("/", get(root_redirect))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(AllowOrigin::mirror_request())
                .allow_methods([
                    Method::GET,
                    Method::POST,
                    Method::PUT,
                    Method::DELETE,
                    Method::OPTIONS,
                ])
                .allow_headers([
                    header::AUTHORIZATION,
                    header::CONTENT_TYPE,
                    header::ACCEPT,
                    HeaderName::from_static(UPLOAD_ID_HEADER),
                    HeaderName::from_static(FINGERPRINT_HEADER),
                ])
                .allow_credentials(true),
        )
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database;
    use crate::test_support::test_state;
    use crate::types::MovieInput;
    use axum::body::Body;
    use axum::extract::ConnectInfo;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use serde_json::{Value, json};
    use std::net::SocketAddr;
    use tower::ServiceExt;

    const PASSWORD: &str = "Corr3ct!horse";

    async fn send(
        app: &Router,
        method: Method,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut req = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            req = req.header(header::AUTHORIZATION, format!("Bearer {}", token));
        }
        let req = match body {
            Some(body) => req
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => req.body(Body::empty()),
        }
        .unwrap();

        let res = app.clone().oneshot(req).await.unwrap();
        let status = res.status();
        let bytes = res.into_body().collect().await.unwrap().to_bytes();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    /// Returns (user_id, token).
    async fn signup(app: &Router, email: &str) -> (String, String) {
        let (status, body) = send(
            app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({ "email": email, "password": PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED, "{body}");
        (
            body["user"]["id"].as_str().unwrap().to_string(),
            body["token"].as_str().unwrap().to_string(),
        )
    }

    async fn audit_actions(state: &AppState) -> Vec<String> {
        sqlx::query_scalar::<_, String>("SELECT action FROM security_audit_log ORDER BY rowid")
            .fetch_all(&state.db_pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn signup_login_and_me() {
        let state = test_state().await;
        let app = build_router(state);

        let (admin_id, _) = signup(&app, "first@example.com").await;
        let (_, token) = signup(&app, "second@example.com").await;

        let (status, body) = send(&app, Method::GET, "/api/auth/me", Some(&token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["email"], "second@example.com");
        assert_eq!(body["roles"], json!(["user"]));

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/auth/login",
            None,
            Some(json!({ "email": "FIRST@example.com", "password": PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user"]["id"], admin_id.as_str());
        let roles = body["roles"].as_array().unwrap();
        assert!(roles.contains(&json!("admin")));

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/auth/signup",
            None,
            Some(json!({ "email": "second@example.com", "password": PASSWORD })),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn repeated_login_failures_lock_out() {
        let app = build_router(test_state().await);
        signup(&app, "viewer@example.com").await;

        let bad = json!({ "email": "viewer@example.com", "password": "Wr0ng!pass" });
        for _ in 0..4 {
            let (status, _) =
                send(&app, Method::POST, "/api/auth/login", None, Some(bad.clone())).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let (status, _) = send(&app, Method::POST, "/api/auth/login", None, Some(bad)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let good = json!({ "email": "viewer@example.com", "password": PASSWORD });
        let (status, _) = send(&app, Method::POST, "/api/auth/login", None, Some(good)).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    }

    /// Signs in from `peer` while claiming `forwarded` as the client address.
    async fn login_from(app: &Router, peer: [u8; 4], forwarded: &str, body: &Value) -> StatusCode {
        let mut req = Request::builder()
            .method(Method::POST)
            .uri("/api/auth/login")
            .header("x-forwarded-for", forwarded)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from((peer, 40000))));
        app.clone().oneshot(req).await.unwrap().status()
    }

    #[tokio::test]
    async fn rotating_forwarded_for_keeps_the_lockout() {
        let app = build_router(test_state().await);
        signup(&app, "viewer@example.com").await;

        let bad = json!({ "email": "viewer@example.com", "password": "Wr0ng!pass" });
        for n in 1..=4 {
            let status = login_from(&app, [10, 0, 0, 5], &format!("1.1.1.{n}"), &bad).await;
            assert_eq!(status, StatusCode::UNAUTHORIZED);
        }
        let status = login_from(&app, [10, 0, 0, 5], "1.1.1.5", &bad).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        let good = json!({ "email": "viewer@example.com", "password": PASSWORD });
        let status = login_from(&app, [10, 0, 0, 5], "9.9.9.9", &good).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);

        // a different peer is tracked separately
        let status = login_from(&app, [10, 0, 0, 6], "1.1.1.1", &good).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn ip_block_applies_to_the_socket_address() {
        let app = build_router(test_state().await);
        let (_, admin_token) = signup(&app, "admin@example.com").await;
        signup(&app, "viewer@example.com").await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/blocked-ips",
            Some(&admin_token),
            Some(json!({ "ip_address": "6.6.6.6", "reason": "abuse" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);

        let good = json!({ "email": "viewer@example.com", "password": PASSWORD });
        let status = login_from(&app, [6, 6, 6, 6], "7.7.7.7", &good).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        // an untrusted header cannot get someone else blocked either
        let status = login_from(&app, [8, 8, 8, 8], "6.6.6.6", &good).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens() {
        let app = build_router(test_state().await);

        let (status, body) = send(&app, Method::GET, "/api/auth/me", None, None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing or invalid authorization header");

        let (status, body) =
            send(&app, Method::GET, "/api/auth/me", Some("nope.123.abc"), None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Invalid token");
    }

    #[tokio::test]
    async fn delete_user_checks_run_in_order() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let (admin_id, admin_token) = signup(&app, "admin@example.com").await;
        let (user_id, user_token) = signup(&app, "user@example.com").await;
        let (victim_id, _) = signup(&app, "victim@example.com").await;

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            None,
            Some(json!({ "userId": victim_id })),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&admin_token),
            Some(json!({ "userId": "not-a-uuid" })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        // self-deletion is refused before the role check
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&user_token),
            Some(json!({ "userId": user_id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&admin_token),
            Some(json!({ "userId": admin_id })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{body}");

        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&user_token),
            Some(json!({ "userId": victim_id })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let other_admin = database::create_user(&state.db_pool, "ops@example.com", "x", None)
            .await
            .unwrap()
            .0;
        sqlx::query("INSERT INTO user_roles (id, user_id, role, created_at) VALUES (?, ?, 'admin', ?)")
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&other_admin.id)
            .bind(database::timestamp())
            .execute(&state.db_pool)
            .await
            .unwrap();
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&admin_token),
            Some(json!({ "userId": other_admin.id })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            Method::POST,
            "/api/admin/delete-user",
            Some(&admin_token),
            Some(json!({ "userId": victim_id })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["success"], true);
        assert!(database::get_profile(&state.db_pool, &victim_id).await.unwrap().is_none());
        assert!(database::get_profile(&state.db_pool, &admin_id).await.unwrap().is_some());

        assert_eq!(
            audit_actions(&state).await,
            vec![
                "UNAUTHORIZED_DELETE_ATTEMPT",
                "ADMIN_DELETE_BLOCKED",
                "USER_DELETED"
            ]
        );
    }

    #[tokio::test]
    async fn paid_movie_is_gated_until_approved() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let (admin_id, admin_token) = signup(&app, "admin@example.com").await;
        let (_, user_token) = signup(&app, "viewer@example.com").await;

        let movie = database::create_movie(
            &state.db_pool,
            &MovieInput {
                title: "Premium".into(),
                video_url: Some("https://cdn.example.com/videos/premium.mp4".into()),
                requires_payment: true,
                payment_amount: Some(50_000),
                ..Default::default()
            },
            &admin_id,
        )
        .await
        .unwrap();
        let access = format!("/api/movies/{}/access", movie.id);
        let player = format!("/api/movies/{}/player", movie.id);

        let (_, body) = send(&app, Method::GET, &access, None, None).await;
        assert_eq!(body["decision"], "login");

        let (status, _) = send(&app, Method::GET, &player, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);

        let (status, payment) = send(
            &app,
            Method::POST,
            "/api/payments",
            Some(&user_token),
            Some(json!({ "movie_id": movie.id, "proof_image_url": "https://cdn.example.com/p.jpg" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(payment["amount"], 50_000);

        let (_, body) = send(&app, Method::GET, &access, Some(&user_token), None).await;
        assert_eq!(body["decision"], "payment_pending");
        let (status, _) = send(&app, Method::GET, &player, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let approve = format!("/api/admin/payments/{}/approve", payment["id"].as_str().unwrap());
        let (status, _) = send(&app, Method::POST, &approve, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, Method::POST, &approve, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(&app, Method::POST, &approve, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, config) = send(&app, Method::GET, &player, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(config["src"], "https://cdn.example.com/videos/premium.mp4");

        let (_, notes) = send(&app, Method::GET, "/api/notifications", Some(&user_token), None).await;
        assert_eq!(notes["unread_count"], 1);
        assert_eq!(notes["items"][0]["type"], "payment_approved");
    }

    #[tokio::test]
    async fn approval_notifies_even_when_movie_lookup_fails() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let (admin_id, admin_token) = signup(&app, "admin@example.com").await;
        let (_, user_token) = signup(&app, "viewer@example.com").await;

        let movie = database::create_movie(
            &state.db_pool,
            &MovieInput {
                title: "Premium".into(),
                requires_payment: true,
                payment_amount: Some(50_000),
                ..Default::default()
            },
            &admin_id,
        )
        .await
        .unwrap();
        let (_, payment) = send(
            &app,
            Method::POST,
            "/api/payments",
            Some(&user_token),
            Some(json!({ "movie_id": movie.id, "proof_image_url": "https://cdn.example.com/p.jpg" })),
        )
        .await;

        sqlx::query("ALTER TABLE movies RENAME TO movies_archived")
            .execute(&state.db_pool)
            .await
            .unwrap();

        let approve = format!("/api/admin/payments/{}/approve", payment["id"].as_str().unwrap());
        let (status, _) = send(&app, Method::POST, &approve, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);

        let (_, notes) = send(&app, Method::GET, "/api/notifications", Some(&user_token), None).await;
        assert_eq!(notes["items"][0]["type"], "payment_approved");
        assert!(notes["items"][0]["message"].as_str().unwrap().contains("\"the movie\""));
    }

    #[tokio::test]
    async fn complaints_are_reviewed_once_and_notify_the_owner() {
        let state = test_state().await;
        let app = build_router(state.clone());
        let (admin_id, admin_token) = signup(&app, "admin@example.com").await;
        let (_, user_token) = signup(&app, "viewer@example.com").await;
        let (_, other_token) = signup(&app, "other@example.com").await;

        let movie = database::create_movie(
            &state.db_pool,
            &MovieInput {
                title: "Premium".into(),
                requires_payment: true,
                payment_amount: Some(50_000),
                ..Default::default()
            },
            &admin_id,
        )
        .await
        .unwrap();
        let (status, payment) = send(
            &app,
            Method::POST,
            "/api/payments",
            Some(&user_token),
            Some(json!({ "movie_id": movie.id, "proof_image_url": "https://cdn.example.com/p.jpg" })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        let payment_id = payment["id"].as_str().unwrap().to_string();

        let complaint = json!({ "payment_request_id": payment_id, "reason": "Charged twice" });
        let (status, _) = send(
            &app,
            Method::POST,
            "/api/complaints",
            Some(&other_token),
            Some(complaint.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, first) = send(
            &app,
            Method::POST,
            "/api/complaints",
            Some(&user_token),
            Some(complaint.clone()),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(first["status"], "pending");
        let resolve = format!("/api/admin/complaints/{}/resolve", first["id"].as_str().unwrap());

        let (status, _) = send(&app, Method::POST, &resolve, Some(&user_token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let (status, body) = send(
            &app,
            Method::POST,
            &resolve,
            Some(&admin_token),
            Some(json!({ "response": "Refund issued" })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "resolved");
        assert_eq!(body["admin_response"], "Refund issued");

        let (status, _) = send(&app, Method::POST, &resolve, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, second) = send(
            &app,
            Method::POST,
            "/api/complaints",
            Some(&user_token),
            Some(complaint),
        )
        .await;
        let reject = format!("/api/admin/complaints/{}/reject", second["id"].as_str().unwrap());
        let (status, body) = send(&app, Method::POST, &reject, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "rejected");
        let (status, _) = send(&app, Method::POST, &reject, Some(&admin_token), None).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, notes) = send(&app, Method::GET, "/api/notifications", Some(&user_token), None).await;
        let responses: Vec<&Value> = notes["items"]
            .as_array()
            .unwrap()
            .iter()
            .filter(|n| n["type"] == "complaint_response")
            .collect();
        assert_eq!(responses.len(), 2);
        assert!(responses.iter().all(|n| n["related_id"] == payment_id.as_str()));
        assert!(
            responses
                .iter()
                .any(|n| n["message"].as_str().unwrap().contains("Refund issued"))
        );

        let (_, notes) = send(&app, Method::GET, "/api/notifications", Some(&other_token), None).await;
        assert_eq!(notes["unread_count"], 0);
    }

    #[tokio::test]
    async fn users_cannot_upload_to_admin_buckets() {
        let app = build_router(test_state().await);
        signup(&app, "admin@example.com").await;
        let (_, token) = signup(&app, "viewer@example.com").await;

        let boundary = "XBOUNDARY";
        let body = format!(
            "--{b}\r\nContent-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n\
             Content-Type: video/mp4\r\n\r\nabc\r\n--{b}--\r\n",
            b = boundary
        );
        let req = Request::builder()
            .method(Method::POST)
            .uri("/api/uploads/videos")
            .header(header::AUTHORIZATION, format!("Bearer {}", token))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={}", boundary),
            )
            .body(Body::from(body))
            .unwrap();
        let res = app.oneshot(req).await.unwrap();
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn root_redirects() {
        let app = build_router(test_state().await);
        let res = app
            .oneshot(Request::builder().uri("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(res.status().is_redirection());
    }
}
