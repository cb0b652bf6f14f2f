//! End-to-end pipeline tests: authentication, forwarding and ops endpoints.

use agent_gateway::security::agent_secret::generate_secret;
use serde_json::{json, Value};

mod common;

use common::{
    client, closed_addr, config_for, mint_token, raw_request, spawn_gateway, start_backend, Reply, MASTER_KEY,
};

#[tokio::test]
async fn test_missing_credentials_rejected_before_upstream() {
    let ams = start_backend(|_| Reply::json(200, json!({"ok": true}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&ams.url(), &unused, &unused)).await;

    let res = client().get(gateway.url("/api/v1/ams/agents")).send().await.unwrap();
    assert_eq!(res.status(), 401);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
    assert_eq!(ams.hits(), 0);
}

#[tokio::test]
async fn test_token_request_is_rewritten_and_attributed() {
    let ams = start_backend(|_| Reply::json(201, json!({"id": "agent-1"}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&ams.url(), &unused, &unused)).await;

    let res = client()
        .post(gateway.url("/api/v1/ams/agents?limit=5"))
        .bearer_auth(mint_token("user-42"))
        .header("x-user-id", "someone-else")
        .header("idempotency-key", "k-1")
        .json(&json!({"name": "helper"}))
        .send()
        .await
        .unwrap();

    assert_eq!(res.status(), 201);
    assert_eq!(res.headers()["x-ratelimit-limit"], "1000");
    assert_eq!(res.headers()["x-ratelimit-remaining"], "999");
    assert!(res.headers().contains_key("x-ratelimit-reset"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["id"], "agent-1");

    let seen = ams.last();
    assert_eq!(seen.request_line(), "POST /agents?limit=5 HTTP/1.1");
    assert_eq!(seen.header("x-user-id"), Some("user-42"));
    assert_eq!(seen.header("idempotency-key"), Some("k-1"));
    assert_eq!(seen.header("authorization"), None);
    assert_eq!(seen.json()["name"], "helper");
}

#[tokio::test]
async fn test_master_key_admitted_on_completion_proxy() {
    let litellm = start_backend(|_| Reply::json(200, json!({"choices": []}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&unused, &unused, &litellm.url())).await;

    let res = client()
        .post(gateway.url("/api/v1/agents/user-1/proxy/chat/completions"))
        .bearer_auth(MASTER_KEY)
        .json(&json!({"model": "gpt-4o", "messages": []}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);

    let seen = litellm.last();
    assert_eq!(seen.request_line(), "POST /chat/completions HTTP/1.1");
    let body = seen.json();
    assert_eq!(body["user"], "user-1");
    assert_eq!(body["metadata"]["user_id"], "user-1");
    assert!(body["metadata"]["request_timestamp"].is_number());
}

#[tokio::test]
async fn test_generated_secret_cannot_act_for_another_user() {
    let litellm = start_backend(|_| Reply::json(200, json!({}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&unused, &unused, &litellm.url())).await;
    let secret = generate_secret("alice", MASTER_KEY);

    let res = client()
        .post(gateway.url("/api/v1/agents/bob/proxy"))
        .bearer_auth(&secret)
        .json(&json!({"model": "m"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 403);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");
    assert_eq!(litellm.hits(), 0);

    let res = client()
        .post(gateway.url("/api/v1/agents/alice/proxy"))
        .bearer_auth(&secret)
        .json(&json!({"model": "m"}))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(litellm.hits(), 1);
}

#[tokio::test]
async fn test_denylisted_operation_never_reaches_upstream() {
    let letta = start_backend(|_| Reply::json(200, json!([]))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&unused, &letta.url(), &unused)).await;
    let token = mint_token("user-1");

    for path in ["/api/v1/letta/agents", "/api/v1/letta/agents/agent-1"] {
        let res = client().get(gateway.url(path)).bearer_auth(&token).send().await.unwrap();
        assert_eq!(res.status(), 403, "{}", path);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["error"]["code"], "AUTHORIZATION_ERROR");
    }
    assert_eq!(letta.hits(), 0);

    let res = client()
        .get(gateway.url("/api/v1/letta/agents/agent-1/messages"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 200);
    assert_eq!(letta.last().request_line(), "GET /v1/agents/agent-1/messages HTTP/1.1");
}

#[tokio::test]
async fn test_dot_segments_cannot_reach_denylisted_operations() {
    let letta = start_backend(|_| Reply::json(200, json!({"deleted": true}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&unused, &letta.url(), &unused)).await;
    let token = mint_token("user-1");

    for path in [
        "/api/v1/letta/agents/x/../agent-1",
        "/api/v1/letta/../admin/users",
        "/api/v1/letta/%2e%2e/admin/users",
    ] {
        let reply = raw_request(
            gateway.addr,
            &format!(
                "DELETE {} HTTP/1.1\r\nHost: gateway\r\nAuthorization: Bearer {}\r\nConnection: close\r\n\r\n",
                path, token
            ),
        )
        .await;
        assert!(reply.starts_with("HTTP/1.1 400"), "{} -> {}", path, reply);
        assert!(reply.contains("VALIDATION_ERROR"), "{}", path);
    }
    assert_eq!(letta.hits(), 0);
}

#[tokio::test]
async fn test_upstream_client_errors_pass_through() {
    let ams = start_backend(|_| Reply::json(404, json!({"detail": "Agent not found"}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&ams.url(), &unused, &unused)).await;

    let res = client()
        .get(gateway.url("/api/v1/ams/agents/missing"))
        .bearer_auth(mint_token("user-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["detail"], "Agent not found");
}

#[tokio::test]
async fn test_unmounted_path_is_not_found() {
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&unused, &unused, &unused)).await;

    let res = client()
        .get(gateway.url("/api/v2/unknown"))
        .bearer_auth(mint_token("user-1"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), 404);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_ping_and_degraded_health() {
    let ams = start_backend(|_| Reply::json(200, json!({"status": "ok"}))).await;
    let unused = format!("http://{}", closed_addr().await);
    let gateway = spawn_gateway(config_for(&ams.url(), &unused, &unused)).await;

    let res = client().get(gateway.url("/ping")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    assert!(res.headers().contains_key("x-request-id"));
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["status"], "ok");

    let res = client().get(gateway.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), 200);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["overall_status"], "degraded");
    let services = body["services"].as_array().unwrap();
    let status_of = |name: &str| {
        services
            .iter()
            .find(|s| s["name"] == name)
            .map(|s| s["status"].clone())
            .unwrap()
    };
    assert_eq!(status_of("ams"), "healthy");
    assert_eq!(status_of("letta"), "unhealthy");
    assert_eq!(status_of("store"), "healthy");
    assert_eq!(ams.last().request_line(), "GET /health HTTP/1.1");
}
