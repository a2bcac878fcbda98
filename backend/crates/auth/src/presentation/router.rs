//! Auth Router

use axum::{
    Router,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
};

use crate::application::config::AuthConfig;
use crate::domain::repository::AuthStore;
use crate::domain::value_object::GlobalRole;
use crate::infra::postgres::PgAuthRepository;
use crate::presentation::handlers::{self, AuthAppState};
use crate::presentation::middleware::{require_auth, require_global_role, require_tenant};

/// Create the Auth router with PostgreSQL repository
pub fn auth_router(repo: PgAuthRepository, config: AuthConfig) -> Router {
    auth_router_generic(repo, config)
}

/// Create a generic Auth router for any repository implementation
pub fn auth_router_generic<R: AuthStore>(repo: R, config: AuthConfig) -> Router {
    auth_routes(AuthAppState::new(repo, config))
}

/// Routes over an existing state, for callers that share the state with
/// their own protected routes
pub fn auth_routes<R: AuthStore>(state: AuthAppState<R>) -> Router {
    let admin = Router::new()
        .route("/admin/sessions", get(handlers::admin_list_sessions::<R>))
        .route("/admin/sessions/stats", get(handlers::admin_session_stats::<R>))
        .route(
            "/admin/sessions/{id}/logout",
            post(handlers::admin_logout_session::<R>),
        )
        .route(
            "/admin/users/{id}/sessions",
            get(handlers::admin_user_history::<R>),
        )
        .route("/admin/users/{id}/logout", post(handlers::admin_logout_user::<R>))
        .route("/admin/users/{id}/mfa/reset", post(handlers::admin_reset_mfa::<R>))
        .route("/admin/audit", get(handlers::admin_audit_events::<R>))
        .route("/admin/audit/stats", get(handlers::admin_audit_stats::<R>))
        .route_layer(from_fn_with_state(GlobalRole::Admin, require_global_role));

    let tenant = Router::new()
        .route("/permissions", get(handlers::permissions::<R>))
        .route_layer(from_fn(require_tenant));

    let protected = Router::new()
        .route("/logout", post(handlers::logout::<R>))
        .route("/me", get(handlers::me))
        .route("/societes", get(handlers::list_societes::<R>))
        .route("/login-societe", post(handlers::login_societe::<R>))
        .route(
            "/default-societe",
            get(handlers::get_default_societe::<R>).put(handlers::set_default_societe::<R>),
        )
        .route("/password", post(handlers::change_password::<R>))
        .route("/mfa/totp/setup", post(handlers::totp_setup::<R>))
        .route("/mfa/totp/verify", post(handlers::totp_verify::<R>))
        .route("/mfa/totp/disable", post(handlers::totp_disable::<R>))
        .route("/mfa/status", get(handlers::mfa_status::<R>))
        .route(
            "/mfa/totp/backup-codes/regenerate",
            post(handlers::regenerate_backup_codes::<R>),
        )
        .merge(tenant)
        .merge(admin)
        .route_layer(from_fn_with_state(state.clone(), require_auth::<R>));

    Router::new()
        .route("/register", post(handlers::register::<R>))
        .route("/login", post(handlers::login::<R>))
        .route("/login/mfa", post(handlers::verify_mfa::<R>))
        .route("/refresh", post(handlers::refresh::<R>))
        .merge(protected)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::body::{Body, to_bytes};
    use axum::extract::connect_info::MockConnectInfo;
    use axum::http::{Request, StatusCode, header};
    use axum::response::Response;
    use axum::routing::get;
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::domain::entity::{Membership, Societe};
    use crate::domain::repository::{MembershipRepository, SocieteRepository, UserRepository};
    use crate::domain::value_object::{AccessLevel, Email, SocieteRole, TotpSecret};
    use crate::infra::InMemoryAuthRepository;
    use crate::presentation::middleware::{PermissionGuard, require_permission};

    const PASSWORD: &str = "Laminoir-Froid-42!";

    struct TestApp {
        app: Router,
        repo: InMemoryAuthRepository,
    }

    impl TestApp {
        fn new() -> Self {
            Self::with_config(AuthConfig::development())
        }

        fn with_config(config: AuthConfig) -> Self {
            let repo = InMemoryAuthRepository::new();
            let state = AuthAppState::new(repo.clone(), config);

            let stock = Router::new()
                .route("/stock", get(|| async { "ok" }))
                .route_layer(from_fn_with_state(
                    PermissionGuard::new(state.clone(), "stock", "read", AccessLevel::Read),
                    require_permission::<InMemoryAuthRepository>,
                ))
                .route_layer(from_fn_with_state(
                    state.clone(),
                    require_auth::<InMemoryAuthRepository>,
                ));

            let app = auth_routes(state)
                .merge(stock)
                .layer(MockConnectInfo(SocketAddr::from(([10, 0, 0, 7], 40000))));
            Self { app, repo }
        }

        async fn send(&self, req: Request<Body>) -> Response {
            self.app.clone().oneshot(req).await.unwrap()
        }

        async fn post(&self, uri: &str, token: Option<&str>, body: Value) -> Response {
            let mut builder = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .header(header::USER_AGENT, "router-tests/1.0");
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(builder.body(Body::from(body.to_string())).unwrap())
                .await
        }

        async fn get(&self, uri: &str, token: Option<&str>) -> Response {
            let mut builder = Request::get(uri).header(header::USER_AGENT, "router-tests/1.0");
            if let Some(token) = token {
                builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
            }
            self.send(builder.body(Body::empty()).unwrap()).await
        }

        async fn register(&self, email: &str, acronym: &str) -> Value {
            let res = self
                .post(
                    "/register",
                    None,
                    json!({
                        "email": email,
                        "acronym": acronym,
                        "password": PASSWORD,
                        "nom": "Martin",
                        "prenom": "Claire",
                    }),
                )
                .await;
            assert_eq!(res.status(), StatusCode::CREATED);
            body_json(res).await
        }

        async fn login(&self, identifier: &str) -> Value {
            let res = self
                .post(
                    "/login",
                    None,
                    json!({ "identifier": identifier, "password": PASSWORD }),
                )
                .await;
            assert_eq!(res.status(), StatusCode::OK);
            body_json(res).await
        }

        async fn promote(&self, email: &str, role: GlobalRole) {
            let email = Email::new(email).unwrap();
            let user = self
                .repo
                .find_user_by_email(&email)
                .await
                .unwrap()
                .unwrap()
                .with_role(role);
            self.repo.update_user(&user).await.unwrap();
        }
    }

    async fn body_json(res: Response) -> Value {
        let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn access_token(login: &Value) -> String {
        login["tokens"]["accessToken"].as_str().unwrap().to_string()
    }

    fn login_body(identifier: &str, password: &str) -> Value {
        json!({ "identifier": identifier, "password": password })
    }

    #[tokio::test]
    async fn test_register_login_and_me() {
        let app = TestApp::new();
        app.register("claire.martin@topsteel.fr", "CMA").await;

        let login = app.login("CMA").await;
        assert_eq!(login["user"]["email"], "claire.martin@topsteel.fr");
        let token = access_token(&login);

        let res = app.get("/me", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let me = body_json(res).await;
        assert_eq!(me["email"], "claire.martin@topsteel.fr");
        assert_eq!(me["sessionId"], login["sessionId"]);
    }

    #[tokio::test]
    async fn test_login_sets_cookies() {
        let app = TestApp::new();
        app.register("paul@topsteel.fr", "PAU").await;

        let res = app
            .post(
                "/login",
                None,
                json!({ "email": "paul@topsteel.fr", "password": PASSWORD }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let cookies: Vec<&str> = res
            .headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();
        assert_eq!(cookies.len(), 2);
        assert!(cookies.iter().any(|c| c.starts_with("access_token=")));
        assert!(
            cookies
                .iter()
                .any(|c| c.starts_with("refresh_token=") && c.contains("Path=/api/auth"))
        );
        assert!(cookies.iter().all(|c| c.contains("HttpOnly")));
    }

    #[tokio::test]
    async fn test_protected_route_requires_token() {
        let app = TestApp::new();

        let res = app.get("/me", None).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            res.headers().get(header::WWW_AUTHENTICATE).unwrap(),
            "Bearer"
        );

        let res = app.get("/me", Some("not-a-jwt")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_access_cookie_authenticates() {
        let app = TestApp::new();
        app.register("cookie@topsteel.fr", "COO").await;
        let token = access_token(&app.login("COO").await);

        let req = Request::get("/me")
            .header(header::USER_AGENT, "router-tests/1.0")
            .header(header::COOKIE, format!("theme=dark; access_token={token}"))
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_login_requires_user_agent() {
        let app = TestApp::new();
        app.register("ua@topsteel.fr", "UAG").await;

        let req = Request::post("/login")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(
                json!({ "identifier": "UAG", "password": PASSWORD }).to_string(),
            ))
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_login_rate_limited() {
        let mut config = AuthConfig::development();
        config.login_rate_limit = platform::rate_limit::RateLimitConfig::new(2, 60);
        let app = TestApp::with_config(config);

        for _ in 0..2 {
            let res = app
                .post(
                    "/login",
                    None,
                    json!({ "identifier": "nobody@topsteel.fr", "password": "wrong" }),
                )
                .await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }

        let res = app
            .post(
                "/login",
                None,
                json!({ "identifier": "nobody@topsteel.fr", "password": "wrong" }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
        assert!(res.headers().contains_key(header::RETRY_AFTER));
    }

    #[tokio::test]
    async fn test_refresh_from_body_and_cookie() {
        let app = TestApp::new();
        app.register("refresh@topsteel.fr", "REF").await;
        let login = app.login("REF").await;
        let refresh_token = login["tokens"]["refreshToken"].as_str().unwrap().to_string();

        let res = app
            .post("/refresh", None, json!({ "refreshToken": refresh_token }))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let rotated = body_json(res).await;
        let rotated_token = rotated["tokens"]["refreshToken"].as_str().unwrap().to_string();
        assert_ne!(rotated_token, refresh_token);

        let req = Request::post("/refresh")
            .header(header::USER_AGENT, "router-tests/1.0")
            .header(header::COOKIE, format!("refresh_token={rotated_token}"))
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::OK);

        let req = Request::post("/refresh")
            .header(header::USER_AGENT, "router-tests/1.0")
            .body(Body::empty())
            .unwrap();
        let res = app.send(req).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_logout_revokes_token() {
        let app = TestApp::new();
        app.register("bye@topsteel.fr", "BYE").await;
        let token = access_token(&app.login("BYE").await);

        let res = app.post("/logout", Some(&token), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["endedSessions"], 1);

        let res = app.get("/me", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_permissions_require_tenant() {
        let app = TestApp::new();
        app.register("tenant@topsteel.fr", "TEN").await;
        let token = access_token(&app.login("TEN").await);

        let res = app.get("/permissions", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app.get("/stock", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_societe_login_grants_permissions() {
        let app = TestApp::new();
        let registered = app.register("owner@topsteel.fr", "OWN").await;
        let token = access_token(&app.login("OWN").await);

        let societe = Societe::new("Aciers du Nord", "ADN");
        app.repo.save_societe(&societe).await.unwrap();
        let user_id = serde_json::from_value(registered["userId"].clone()).unwrap();
        let mut membership = Membership::new(user_id, societe.id, SocieteRole::Owner, None);
        membership.is_default = true;
        app.repo.save_membership(&membership).await.unwrap();

        let res = app.get("/societes", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let societes = body_json(res).await;
        assert_eq!(societes[0]["code"], "ADN");
        assert_eq!(societes[0]["isDefault"], true);

        let res = app
            .post(
                "/login-societe",
                Some(&token),
                json!({ "societeId": societe.id }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let selected = body_json(res).await;
        assert_eq!(selected["tenant"]["societeCode"], "ADN");
        let tenant_token = access_token(&selected);

        let res = app.get("/permissions", Some(&tenant_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let permissions = body_json(res).await;
        assert_eq!(permissions["societeRole"], "OWNER");
        assert!(
            permissions["permissions"]
                .as_array()
                .unwrap()
                .iter()
                .any(|p| p == "*:*")
        );

        let res = app.get("/stock", Some(&tenant_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_admin_routes_require_admin_role() {
        let app = TestApp::new();
        app.register("user@topsteel.fr", "USR").await;
        app.register("admin@topsteel.fr", "ADM").await;
        app.promote("admin@topsteel.fr", GlobalRole::Admin).await;

        let user_token = access_token(&app.login("USR").await);
        let res = app.get("/admin/sessions", Some(&user_token)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let admin_token = access_token(&app.login("ADM").await);
        let res = app.get("/admin/sessions", Some(&admin_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await.as_array().unwrap().len(), 2);

        let res = app.get("/admin/sessions/stats", Some(&admin_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["active"], 2);
    }

    #[tokio::test]
    async fn test_admin_force_logout_user() {
        let app = TestApp::new();
        let target = app.register("target@topsteel.fr", "TGT").await;
        app.register("boss@topsteel.fr", "BOS").await;
        app.promote("boss@topsteel.fr", GlobalRole::Admin).await;

        let target_token = access_token(&app.login("TGT").await);
        let admin_token = access_token(&app.login("BOS").await);

        let uri = format!("/admin/users/{}/logout", target["userId"].as_str().unwrap());
        let res = app
            .post(&uri, Some(&admin_token), json!({ "reason": "poste réaffecté" }))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["endedSessions"], 1);

        let res = app.get("/me", Some(&target_token)).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_successful_login_keeps_ip_window() {
        let mut config = AuthConfig::development();
        config.login_ip_rate_limit = platform::rate_limit::RateLimitConfig::new(3, 60);
        let app = TestApp::with_config(config);
        app.register("ip@topsteel.fr", "IPW").await;

        for _ in 0..2 {
            let res = app.post("/login", None, login_body("IPW", "Mauvais-42!")).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = app.post("/login", None, login_body("IPW", PASSWORD)).await;
        assert_eq!(res.status(), StatusCode::OK);

        // the success counted against the address and did not clear it
        let res = app.post("/login", None, login_body("IPW", PASSWORD)).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);
    }

    #[tokio::test]
    async fn test_account_window_is_per_identifier() {
        let mut config = AuthConfig::development();
        config.login_rate_limit = platform::rate_limit::RateLimitConfig::new(2, 60);
        let app = TestApp::with_config(config);
        app.register("first@topsteel.fr", "FST").await;
        app.register("second@topsteel.fr", "SND").await;

        for _ in 0..2 {
            let res = app.post("/login", None, login_body("FST", "Mauvais-42!")).await;
            assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        }
        let res = app.post("/login", None, login_body("fst", PASSWORD)).await;
        assert_eq!(res.status(), StatusCode::TOO_MANY_REQUESTS);

        // another account from the same address is unaffected
        let res = app.post("/login", None, login_body("SND", PASSWORD)).await;
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_mfa_status_and_backup_code_routes() {
        let app = TestApp::new();
        app.register("mfa@topsteel.fr", "MFA").await;
        let token = access_token(&app.login("MFA").await);

        let res = app.get("/mfa/status", Some(&token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let status = body_json(res).await;
        assert_eq!(status["enabled"], false);
        assert_eq!(status["backupCodesRemaining"], 0);

        let res = app.post("/mfa/totp/setup", Some(&token), json!({})).await;
        assert_eq!(res.status(), StatusCode::OK);
        let secret = body_json(res).await["secret"].as_str().unwrap().to_string();
        let secret = TotpSecret::from_base32(secret).unwrap();
        let code = || secret.code_at(chrono::Utc::now().timestamp() as u64);

        let res = app
            .post("/mfa/totp/verify", Some(&token), json!({ "code": code() }))
            .await;
        assert_eq!(res.status(), StatusCode::OK);

        let status = body_json(app.get("/mfa/status", Some(&token)).await).await;
        assert_eq!(status["enabled"], true);
        assert_eq!(status["methods"], json!(["totp", "backup_code"]));
        assert_eq!(status["backupCodesRemaining"], 10);

        let res = app
            .post(
                "/mfa/totp/backup-codes/regenerate",
                Some(&token),
                json!({ "code": "000000" }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

        let res = app
            .post(
                "/mfa/totp/backup-codes/regenerate",
                Some(&token),
                json!({ "code": code() }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        assert_eq!(body_json(res).await["backupCodes"].as_array().unwrap().len(), 10);
    }

    #[tokio::test]
    async fn test_admin_audit_routes() {
        let app = TestApp::new();
        app.register("user@topsteel.fr", "USR").await;
        app.register("admin@topsteel.fr", "ADM").await;
        app.promote("admin@topsteel.fr", GlobalRole::Admin).await;

        let res = app.post("/login", None, login_body("USR", "Mauvais-42!")).await;
        assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
        let user_token = access_token(&app.login("USR").await);
        let admin_token = access_token(&app.login("ADM").await);

        let res = app.get("/admin/audit", Some(&user_token)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let res = app
            .get("/admin/audit?eventTypes=LOGIN_FAILED", Some(&admin_token))
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let page = body_json(res).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["events"][0]["eventType"], "LOGIN_FAILED");
        assert_eq!(page["events"][0]["success"], false);
        assert_eq!(page["events"][0]["ip"], "10.0.0.7");

        let res = app
            .get("/admin/audit?eventTypes=LOGIN_SUCCESS&limit=1", Some(&admin_token))
            .await;
        let page = body_json(res).await;
        assert_eq!(page["total"], 2);
        assert_eq!(page["events"].as_array().unwrap().len(), 1);

        let res = app
            .get("/admin/audit?eventTypes=LOGIN", Some(&admin_token))
            .await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST);

        let res = app.get("/admin/audit/stats", Some(&admin_token)).await;
        assert_eq!(res.status(), StatusCode::OK);
        let stats = body_json(res).await;
        assert_eq!(stats["total"], 3);
        assert_eq!(stats["failures"], 1);
        assert_eq!(stats["byEventType"]["LOGIN_SUCCESS"], 2);
    }

    #[tokio::test]
    async fn test_permission_denial_is_audited() {
        let app = TestApp::new();
        let registered = app.register("viewer@topsteel.fr", "VWR").await;
        app.register("admin@topsteel.fr", "ADM").await;
        app.promote("admin@topsteel.fr", GlobalRole::Admin).await;
        let token = access_token(&app.login("VWR").await);

        let societe = Societe::new("Tôles de l'Est", "TDE");
        app.repo.save_societe(&societe).await.unwrap();
        let user_id = serde_json::from_value(registered["userId"].clone()).unwrap();
        let membership = Membership::new(user_id, societe.id, SocieteRole::Viewer, None);
        app.repo.save_membership(&membership).await.unwrap();

        let res = app
            .post(
                "/login-societe",
                Some(&token),
                json!({ "societeId": societe.id }),
            )
            .await;
        assert_eq!(res.status(), StatusCode::OK);
        let tenant_token = access_token(&body_json(res).await);

        let res = app.get("/stock", Some(&tenant_token)).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);

        let admin_token = access_token(&app.login("ADM").await);
        let res = app
            .get("/admin/audit?eventTypes=ACCESS_DENIED", Some(&admin_token))
            .await;
        let page = body_json(res).await;
        assert_eq!(page["total"], 1);
        assert_eq!(page["events"][0]["resource"], "stock");
        assert_eq!(page["events"][0]["action"], "read");
        assert_eq!(page["events"][0]["societeId"], json!(societe.id));
    }
}
