use axum::{
    extract::{Path, State},
    http::{header::AUTHORIZATION, HeaderMap, StatusCode},
    routing::{get, post},
    Json, Router,
};
use tracing::{info, instrument};

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, LoginResponse, MessageResponse,
            ProfileResponse, RegisterRequest, ResetPasswordRequest, VerifyOtpRequest,
        },
        extractors::CurrentUser,
        repo_types::Role,
        services::RegisterInput,
    },
    drivers::repo_types::Driver,
    error::{AppError, AppResult},
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/2fa/verify", post(verify_otp))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password", post(reset_password))
        .route("/auth/logout", post(logout))
        .route("/auth/driver-profile/:email", get(driver_profile))
}

pub fn me_routes() -> Router<AppState> {
    Router::new().route("/me", get(get_me))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> AppResult<(StatusCode, Json<ProfileResponse>)> {
    let role = match payload.role.as_deref() {
        None => Role::Rider,
        Some(r) => r
            .parse::<Role>()
            .map_err(|_| AppError::Validation(format!("Unknown role {r}")))?,
    };
    let registration = state
        .auth
        .register(RegisterInput {
            email: payload.email,
            password: payload.password,
            name: payload.name,
            phone: payload.phone,
            role,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(registration.into())))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<LoginResponse>> {
    state.auth.login(&payload.email, &payload.password).await?;
    Ok(Json(LoginResponse {
        requires_two_factor: true,
        message: "OTP sent to your email",
    }))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<VerifyOtpRequest>,
) -> AppResult<Json<AuthResponse>> {
    let auth = state.auth.verify_otp(&payload.email, &payload.code).await?;
    info!(user_id = auth.profile.user.id, "user logged in");
    Ok(Json(auth.into()))
}

#[instrument(skip(state, payload), fields(email = %payload.email))]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state.auth.forgot_password(&payload.email).await?;
    Ok(Json(MessageResponse {
        message: "Password reset link sent to your email",
    }))
}

#[instrument(skip(state, payload))]
pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetPasswordRequest>,
) -> AppResult<Json<MessageResponse>> {
    state
        .auth
        .reset_password(&payload.token, &payload.new_password)
        .await?;
    Ok(Json(MessageResponse {
        message: "Password has been reset",
    }))
}

#[instrument(skip(state, headers))]
pub async fn logout(State(state): State<AppState>, headers: HeaderMap) -> AppResult<StatusCode> {
    let header = headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .ok_or(AppError::Unauthorized)?;
    state.auth.logout(header).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn get_me(CurrentUser(profile): CurrentUser) -> Json<ProfileResponse> {
    Json(profile.into())
}

#[instrument(skip(state, _caller))]
pub async fn driver_profile(
    State(state): State<AppState>,
    _caller: CurrentUser,
    Path(email): Path<String>,
) -> AppResult<Json<Driver>> {
    Ok(Json(state.auth.driver_profile(&email).await?))
}

#[cfg(test)]
mod tests {
    use axum::{
        body::{to_bytes, Body},
        http::Request,
    };
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::{app::build_app, testing::TestEnv};

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(res: axum::response::Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn register_login_verify_me() {
        let env = TestEnv::new();
        let app = build_app(env.state.clone());

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/register",
                json!({"email": "D@x.com", "password": "password123", "name": "Eric",
                       "phone": "2001", "role": "driver"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), 201);
        let body = body_json(res).await;
        assert_eq!(body["user"]["role"], "DRIVER");
        assert_eq!(body["driver"]["available"], false);

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/login",
                json!({"email": "d@x.com", "password": "password123"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(body_json(res).await["requires_two_factor"], true);

        let code = env.store.otps.find("d@x.com").await.unwrap().unwrap().code;
        let res = app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/2fa/verify",
                json!({"email": "d@x.com", "code": code}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        let body = body_json(res).await;
        let token = body["token"].as_str().unwrap().to_string();
        assert_eq!(body["driver"]["phone"], "2001");

        let res = app
            .clone()
            .oneshot(
                Request::get("/api/v1/me")
                    .header("authorization", format!("Bearer {token}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), 200);
        assert_eq!(body_json(res).await["user"]["email"], "d@x.com");
    }

    #[tokio::test]
    async fn bad_login_and_missing_session() {
        let env = TestEnv::new();
        let app = build_app(env.state.clone());

        let res = app
            .clone()
            .oneshot(post_json(
                "/api/v1/auth/login",
                json!({"email": "ghost@x.com", "password": "whatever1"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
        assert_eq!(body_json(res).await["code"], "INVALID_CREDENTIALS");

        let res = app
            .oneshot(Request::get("/api/v1/me").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), 401);
    }

    #[tokio::test]
    async fn unknown_role_is_rejected() {
        let env = TestEnv::new();
        let res = build_app(env.state.clone())
            .oneshot(post_json(
                "/api/v1/auth/register",
                json!({"email": "a@x.com", "password": "password123",
                       "phone": "1", "role": "pilot"}),
            ))
            .await
            .unwrap();
        assert_eq!(res.status(), 400);
    }
}
