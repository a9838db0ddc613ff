use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode},
};
use blockyard::config::Config;
use blockyard::db::Store;
use blockyard::domain::Permissions;
use blockyard::k8s::InMemoryCluster;
use blockyard::services::Registration;
use blockyard::state::SharedState;
use http_body_util::BodyExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tower::ServiceExt;

const PASSWORD: &str = "correct-horse-battery";

struct TestApp {
    router: Router,
    shared: Arc<SharedState>,
    cluster: Arc<InMemoryCluster>,
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.security.allow_insecure_jwt_secret = true;
    config.security.argon2_memory_cost_kib = 1024;
    config.security.argon2_time_cost = 1;
    config.kubernetes.save_settle_millis = 0;
    config.kubernetes.exec_timeout_seconds = 2;
    config.server.secure_cookies = false;
    config
}

async fn spawn_app() -> TestApp {
    let store = Store::in_memory().await.expect("Failed to open store");
    let cluster = Arc::new(InMemoryCluster::new());
    let shared = Arc::new(SharedState::from_parts(
        test_config(),
        store,
        cluster.clone(),
        None,
    ));
    let state = blockyard::api::create_app_state(shared.clone(), None);

    TestApp {
        router: blockyard::api::router(state),
        shared,
        cluster,
    }
}

impl TestApp {
    async fn seed_user(&self, username: &str, permissions: Permissions) {
        self.shared
            .auth_service
            .create_user(
                Registration {
                    username: username.to_string(),
                    email: format!("{username}@example.com"),
                    password: PASSWORD.to_string(),
                },
                permissions,
            )
            .await
            .expect("Failed to seed user");
    }

    async fn token(&self, username: &str) -> String {
        let (status, body) = self
            .send(
                "POST",
                "/api/auth/login",
                None,
                Some(json!({ "username": username, "password": PASSWORD })),
            )
            .await;
        assert_eq!(status, StatusCode::OK, "login failed: {body}");
        body["data"]["token"].as_str().unwrap().to_string()
    }

    async fn send(
        &self,
        method: &str,
        uri: &str,
        token: Option<&str>,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        let request = match body {
            Some(body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }
}

#[tokio::test]
async fn test_ping_is_public() {
    let app = spawn_app().await;

    let (status, body) = app.send("GET", "/api/ping", None, None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["status"], "ok");
}

#[tokio::test]
async fn test_protected_routes_require_credentials() {
    let app = spawn_app().await;

    let (status, body) = app.send("GET", "/api/servers", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["success"], false);

    let (status, _) = app
        .send("GET", "/api/auth/me", Some("not-a-token"), None)
        .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_register_login_and_me() {
    let app = spawn_app().await;

    let (status, body) = app
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": "carol",
                "email": "Carol@Example.com",
                "password": PASSWORD,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["user"]["capabilities"], json!(["view_server"]));

    let token = app.token("carol").await;
    let (status, body) = app.send("GET", "/api/auth/me", Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["username"], "carol");
    assert_eq!(body["data"]["email"], "carol@example.com");

    let (status, _) = app
        .send(
            "POST",
            "/api/auth/register",
            None,
            Some(json!({
                "username": "carol",
                "email": "other@example.com",
                "password": PASSWORD,
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_wrong_password_and_unknown_user_look_the_same() {
    let app = spawn_app().await;
    app.seed_user("dave", Permissions::READ_ONLY).await;

    let (status_wrong, body_wrong) = app
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "dave", "password": "not-the-password" })),
        )
        .await;
    let (status_unknown, body_unknown) = app
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "nobody", "password": "not-the-password" })),
        )
        .await;

    assert_eq!(status_wrong, StatusCode::UNAUTHORIZED);
    assert_eq!(status_unknown, StatusCode::UNAUTHORIZED);
    assert_eq!(body_wrong["error"], body_unknown["error"]);
}

#[tokio::test]
async fn test_api_key_authenticates_requests() {
    let app = spawn_app().await;
    app.seed_user("erin", Permissions::OPERATOR).await;
    let token = app.token("erin").await;

    let (status, body) = app
        .send(
            "POST",
            "/api/apikeys",
            Some(&token),
            Some(json!({ "description": "ci", "expires_in_days": 30 })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let key = body["data"]["key"].as_str().unwrap().to_string();
    let key_id = body["data"]["id"].as_i64().unwrap();
    assert!(key.starts_with("mcapi."));

    let request = Request::builder()
        .uri("/api/auth/me")
        .header("X-API-Key", &key)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let (_, body) = app.send("GET", "/api/apikeys", Some(&token), None).await;
    let listed = body["data"].as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert!(listed[0].get("key").is_none());
    assert_ne!(listed[0]["key_preview"].as_str().unwrap(), key);

    let (status, _) = app
        .send("DELETE", &format!("/api/apikeys/{key_id}"), Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let request = Request::builder()
        .uri("/api/auth/me")
        .header("X-API-Key", &key)
        .body(Body::empty())
        .unwrap();
    let response = app.router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_read_only_user_cannot_create_servers() {
    let app = spawn_app().await;
    app.seed_user("frank", Permissions::READ_ONLY).await;
    let token = app.token("frank").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/servers",
            Some(&token),
            Some(json!({ "name": "frank-world" })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(app.cluster.deployment_names().is_empty());
}

#[tokio::test]
async fn test_server_lifecycle_over_http() {
    let app = spawn_app().await;
    app.seed_user("alice", Permissions::OPERATOR).await;
    let token = app.token("alice").await;

    let (status, body) = app
        .send(
            "POST",
            "/api/servers",
            Some(&token),
            Some(json!({ "name": "alice-survival", "env": { "TYPE": "PAPER" } })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    assert_eq!(body["data"]["name"], "alice-survival");
    assert_eq!(body["data"]["status"], "Running");

    let (status, body) = app
        .send("GET", "/api/servers/alice-survival", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["workload"]["desired_replicas"], 1);

    let (status, body) = app
        .send(
            "POST",
            "/api/servers/alice-survival/exec",
            Some(&token),
            Some(json!({ "command": "say hello" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, body) = app
        .send(
            "POST",
            "/api/servers/alice-survival/expose",
            Some(&token),
            Some(json!({ "type": "NodePort" })),
        )
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert!(body["data"]["node_port"].as_i64().is_some());

    let (status, body) = app
        .send("POST", "/api/servers/alice-survival/stop", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["data"]["status"], "Stopped");

    let (status, body) = app
        .send("POST", "/api/servers/alice-survival/start", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["status"], "Running");

    let (status, body) = app
        .send("POST", "/api/servers/alice-survival/delete", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["warnings"].as_array().unwrap().is_empty());
    assert!(app.cluster.deployment_names().is_empty());
    assert!(app.cluster.volume_claim_names().is_empty());
    assert!(app.cluster.service_names().is_empty());

    let (status, _) = app
        .send("GET", "/api/servers/alice-survival", Some(&token), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_owner_bypass_without_capability() {
    let app = spawn_app().await;
    app.seed_user("gina", Permissions::READ_ONLY.with(blockyard::domain::Capability::CreateServer))
        .await;
    app.seed_user("hank", Permissions::READ_ONLY.with(blockyard::domain::Capability::CreateServer))
        .await;
    let gina = app.token("gina").await;
    let hank = app.token("hank").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/servers",
            Some(&gina),
            Some(json!({ "name": "gina-world" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    // Gina lacks stop_server but owns the server.
    let (status, body) = app
        .send("POST", "/api/servers/gina-world/stop", Some(&gina), None)
        .await;
    assert_eq!(status, StatusCode::OK, "{body}");

    let (status, _) = app
        .send("POST", "/api/servers/gina-world/start", Some(&hank), None)
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (_, body) = app.send("GET", "/api/servers", Some(&hank), None).await;
    assert!(body["data"].as_array().unwrap().is_empty());

    let (status, _) = app
        .send(
            "POST",
            "/api/servers",
            Some(&hank),
            Some(json!({ "name": "gina-world" })),
        )
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let app = spawn_app().await;
    app.seed_user("ivan", Permissions::OPERATOR).await;
    let token = app.token("ivan").await;

    let (status, _) = app
        .send(
            "POST",
            "/api/servers",
            Some(&token),
            Some(json!({ "name": "Not_Valid" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/api/servers",
            Some(&token),
            Some(json!({ "name": "ivan-world", "env": { "BAD-KEY": "1" } })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    app.send(
        "POST",
        "/api/servers",
        Some(&token),
        Some(json!({ "name": "ivan-world" })),
    )
    .await;

    let (status, _) = app
        .send(
            "POST",
            "/api/servers/ivan-world/expose",
            Some(&token),
            Some(json!({ "type": "Ingress" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/api/servers/ivan-world/expose",
            Some(&token),
            Some(json!({ "type": "MCRouter" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = app
        .send(
            "POST",
            "/api/servers/ivan-world/exec",
            Some(&token),
            Some(json!({ "command": "say hi\nstop" })),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_user_administration_is_admin_only() {
    let app = spawn_app().await;
    app.seed_user("root", Permissions::ALL).await;
    app.seed_user("judy", Permissions::READ_ONLY).await;
    let admin = app.token("root").await;
    let judy = app.token("judy").await;

    let (status, _) = app.send("GET", "/api/users", Some(&judy), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app.send("GET", "/api/users", Some(&admin), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"].as_array().unwrap().len(), 2);

    let (status, body) = app
        .send(
            "POST",
            "/api/users",
            Some(&admin),
            Some(json!({
                "username": "kate",
                "email": "kate@example.com",
                "password": PASSWORD,
                "permissions": Permissions::OPERATOR.bits(),
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED, "{body}");
    let kate_id = body["data"]["id"].as_i64().unwrap();

    let (status, _) = app
        .send(
            "PUT",
            &format!("/api/users/{kate_id}"),
            Some(&judy),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = app
        .send(
            "PUT",
            &format!("/api/users/{kate_id}"),
            Some(&admin),
            Some(json!({ "active": false })),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["active"], false);

    let (status, _) = app
        .send(
            "POST",
            "/api/auth/login",
            None,
            Some(json!({ "username": "kate", "password": PASSWORD })),
        )
        .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, _) = app
        .send("DELETE", &format!("/api/users/{kate_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = app
        .send("GET", &format!("/api/users/{kate_id}"), Some(&admin), None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_metrics_requires_admin() {
    let app = spawn_app().await;
    app.seed_user("leo", Permissions::OPERATOR).await;
    let token = app.token("leo").await;

    let (status, _) = app.send("GET", "/api/metrics", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_oauth_routes_without_provider() {
    let app = spawn_app().await;

    let (status, _) = app
        .send("GET", "/api/auth/oauth/authentik", None, None)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
