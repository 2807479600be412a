use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::CookieJar;
use bff_core::{
    domain::repositories::users::UserRepository,
    infra::db::{postgres::postgres_connection::PgPoolSquad, repositories::users::UserPostgres},
};
use serde_json::json;

use crate::{
    auth::{SessionKeys, SessionProvider},
    axum_http::error_responses::unauthorized,
    usecases::accounts::{AccountsUseCase, LoginRequest, RegisterRequest},
};

pub fn routes(db_pool: Arc<PgPoolSquad>, session_keys: Arc<SessionKeys>) -> Router {
    let user_repository = UserPostgres::new(Arc::clone(&db_pool));
    let usecase = AccountsUseCase::new(Arc::new(user_repository), session_keys);

    router(Arc::new(usecase))
}

pub fn router<U>(usecase: Arc<AccountsUseCase<U>>) -> Router
where
    U: UserRepository + Send + Sync + 'static,
{
    Router::new()
        .route("/register", post(register::<U>))
        .route("/login", post(login::<U>))
        .route("/logout", post(logout::<U>))
        .route("/session", get(current_session::<U>))
        .with_state(usecase)
}

pub async fn register<U>(
    State(usecase): State<Arc<AccountsUseCase<U>>>,
    Json(payload): Json<RegisterRequest>,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
{
    match usecase.register(payload).await {
        Ok(user) => (StatusCode::CREATED, Json(json!({ "user": user }))).into_response(),
        Err(err) => err.into_response(),
    }
}

pub async fn login<U>(
    State(usecase): State<Arc<AccountsUseCase<U>>>,
    jar: CookieJar,
    Json(payload): Json<LoginRequest>,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
{
    match usecase.login(payload).await {
        Ok(response) => {
            let cookie = usecase.session_keys().session_cookie(response.token.clone());
            (jar.add(cookie), Json(response)).into_response()
        }
        Err(err) => err.into_response(),
    }
}

pub async fn logout<U>(State(usecase): State<Arc<AccountsUseCase<U>>>, jar: CookieJar) -> Response
where
    U: UserRepository + Send + Sync + 'static,
{
    let jar = jar.remove(usecase.session_keys().removal_cookie());
    (jar, Json(json!({ "success": true }))).into_response()
}

pub async fn current_session<U>(
    State(usecase): State<Arc<AccountsUseCase<U>>>,
    headers: HeaderMap,
) -> Response
where
    U: UserRepository + Send + Sync + 'static,
{
    let Some(session) = usecase.session_keys().resolve(&headers) else {
        return unauthorized();
    };

    match usecase.current_user(session.user_id).await {
        Ok(user) => Json(json!({ "user": user })).into_response(),
        Err(err) => err.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{Body, to_bytes},
        http::{Method, Request, header::SET_COOKIE},
    };
    use bff_core::domain::{
        entities::users::UserEntity,
        repositories::users::{EmailAlreadyRegistered, MockUserRepository},
    };
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(users: MockUserRepository) -> Router {
        let keys = Arc::new(SessionKeys::new(
            "supersecretjwtsecretforunittesting123",
            "bff_session",
            3600,
        ));
        Router::new().nest(
            "/api/auth",
            router(Arc::new(AccountsUseCase::new(Arc::new(users), keys))),
        )
    }

    fn post_json(uri: &str, body: Value) -> Request<Body> {
        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn duplicate_registration_is_a_conflict() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_email().returning(|_| Ok(None));
        users
            .expect_create_user()
            .times(1)
            .returning(|_| Err(EmailAlreadyRegistered.into()));

        let response = app(users)
            .oneshot(post_json(
                "/api/auth/register",
                json!({ "email": "ada@example.com", "password": "long enough" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CONFLICT);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "An account with this email already exists" })
        );
    }

    #[tokio::test]
    async fn registration_returns_the_created_user() {
        let mut users = MockUserRepository::new();
        users.expect_find_by_email().returning(|_| Ok(None));
        users.expect_create_user().times(1).returning(|insert| {
            let now = Utc::now();
            Ok(UserEntity {
                id: 7,
                email: insert.email,
                name: insert.name,
                password_hash: insert.password_hash,
                stripe_customer_id: None,
                subscription_status: insert.subscription_status,
                subscription_id: None,
                subscription_ends_at: None,
                created_at: now,
                updated_at: now,
            })
        });

        let response = app(users)
            .oneshot(post_json(
                "/api/auth/register",
                json!({ "email": "ada@example.com", "password": "long enough" }),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::CREATED);
        assert_eq!(body_json(response).await["user"]["id"], 7);
    }

    #[tokio::test]
    async fn logout_expires_the_session_cookie() {
        let mut request = post_json("/api/auth/logout", json!({}));
        request
            .headers_mut()
            .insert("cookie", "bff_session=stale".parse().unwrap());
        let response = app(MockUserRepository::new())
            .oneshot(request)
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default()
            .to_string();
        assert!(cookie.starts_with("bff_session="));
        assert_eq!(body_json(response).await, json!({ "success": true }));
    }

    #[tokio::test]
    async fn session_without_credentials_is_unauthorized() {
        let response = app(MockUserRepository::new())
            .oneshot(
                Request::builder()
                    .uri("/api/auth/session")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
