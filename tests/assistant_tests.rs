// Integration tests for the assistant client
//
// A local HTTP server stands in for the chat-completions endpoint. Every
// failure class must collapse to "no reply" rather than an error.

use anyhow::Result;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};
use std::sync::{Arc, Mutex};
use voice_coach::config::AssistantSettings;
use voice_coach::AssistantClient;

#[derive(Clone, Default)]
struct Captured {
    bodies: Arc<Mutex<Vec<serde_json::Value>>>,
    auth_headers: Arc<Mutex<Vec<String>>>,
}

async fn serve(response: (StatusCode, String)) -> Result<(String, Captured)> {
    let captured = Captured::default();
    let state = captured.clone();

    let app = Router::new()
        .route(
            "/chat/completions",
            post(
                move |State(state): State<Captured>,
                      headers: HeaderMap,
                      Json(body): Json<serde_json::Value>| {
                    let response = response.clone();
                    async move {
                        if let Some(auth) = headers.get("authorization") {
                            state
                                .auth_headers
                                .lock()
                                .unwrap()
                                .push(auth.to_str().unwrap_or_default().to_string());
                        }
                        state.bodies.lock().unwrap().push(body);
                        response
                    }
                },
            ),
        )
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let base_url = format!("http://{}", listener.local_addr()?);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    Ok((base_url, captured))
}

fn settings(base_url: String) -> AssistantSettings {
    AssistantSettings {
        base_url,
        api_key: "llm-key".to_string(),
        model: "gpt-4o-mini".to_string(),
    }
}

#[tokio::test]
async fn test_query_returns_first_choice_content() -> Result<()> {
    // Setup: endpoint returns a well-formed completion
    let body = serde_json::json!({
        "choices": [
            { "message": { "role": "assistant", "content": "Rush the left lane now." } },
            { "message": { "role": "assistant", "content": "unused second choice" } }
        ]
    })
    .to_string();
    let (base_url, captured) = serve((StatusCode::OK, body)).await?;

    let client = AssistantClient::new(settings(base_url));
    let reply = client.query("what's our next move").await;

    assert_eq!(reply.as_deref(), Some("Rush the left lane now."));

    // Verify: the request carried the credential, the model, and both roles
    let auth = captured.auth_headers.lock().unwrap().clone();
    assert_eq!(auth, vec!["Bearer llm-key".to_string()]);
    let bodies = captured.bodies.lock().unwrap().clone();
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["model"], "gpt-4o-mini");
    assert_eq!(bodies[0]["messages"][0]["role"], "system");
    assert_eq!(bodies[0]["messages"][1]["role"], "user");
    assert_eq!(bodies[0]["messages"][1]["content"], "what's our next move");
    Ok(())
}

#[tokio::test]
async fn test_error_status_yields_no_reply() -> Result<()> {
    let body = serde_json::json!({ "error": { "message": "rate limited" } }).to_string();
    let (base_url, _captured) = serve((StatusCode::TOO_MANY_REQUESTS, body)).await?;

    let client = AssistantClient::new(settings(base_url));
    assert_eq!(client.query("anyone there").await, None);
    Ok(())
}

#[tokio::test]
async fn test_malformed_body_yields_no_reply() -> Result<()> {
    let (base_url, _captured) = serve((StatusCode::OK, "not json at all".to_string())).await?;

    let client = AssistantClient::new(settings(base_url));
    assert_eq!(client.query("anyone there").await, None);
    Ok(())
}

#[tokio::test]
async fn test_empty_choices_yield_no_reply() -> Result<()> {
    let body = serde_json::json!({ "choices": [] }).to_string();
    let (base_url, _captured) = serve((StatusCode::OK, body)).await?;

    let client = AssistantClient::new(settings(base_url));
    assert_eq!(client.query("anyone there").await, None);
    Ok(())
}

#[tokio::test]
async fn test_missing_credential_skips_request() -> Result<()> {
    // Setup: server would answer, but the client must never call it
    let body = serde_json::json!({
        "choices": [{ "message": { "role": "assistant", "content": "should not happen" } }]
    })
    .to_string();
    let (base_url, captured) = serve((StatusCode::OK, body)).await?;

    let mut cfg = settings(base_url);
    cfg.api_key = String::new();
    let client = AssistantClient::new(cfg);

    assert_eq!(client.query("anyone there").await, None);
    assert!(captured.bodies.lock().unwrap().is_empty());
    Ok(())
}
