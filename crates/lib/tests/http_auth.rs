//! Integration tests: start the server on a free port and drive the REST
//! API with reqwest. Cookies are carried by hand so the session and bearer
//! paths stay visibly separate.

use lib::config::Config;
use lib::server;
use serde_json::json;
use std::time::Duration;

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

async fn start_server() -> (u16, reqwest::Client) {
    let port = free_port();
    let mut config = Config::default();
    config.server.port = port;
    config.server.bind = "127.0.0.1".to_string();
    tokio::spawn(async move {
        let _ = server::run_server(config).await;
    });

    let client = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .expect("client");
    let url = format!("http://127.0.0.1:{}/", port);
    for _ in 0..100 {
        if let Ok(resp) = client.get(&url).send().await {
            if resp.status().is_success() {
                return (port, client);
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not become healthy on port {}", port);
}

fn api(port: u16, path: &str) -> String {
    format!("http://127.0.0.1:{}{}", port, path)
}

/// Cookie pair (name=value) from a response's Set-Cookie header.
fn session_cookie(resp: &reqwest::Response) -> String {
    let raw = resp
        .headers()
        .get(reqwest::header::SET_COOKIE)
        .expect("set-cookie header")
        .to_str()
        .expect("cookie str");
    raw.split(';').next().expect("cookie pair").to_string()
}

async fn signup(port: u16, client: &reqwest::Client, email: &str) -> (String, String) {
    let resp = client
        .post(api(port, "/api/auth/signup"))
        .json(&json!({
            "email": email,
            "firstName": "Rowan",
            "lastName": "Clarke",
            "userType": "adult",
        }))
        .send()
        .await
        .expect("signup");
    assert_eq!(resp.status(), 200);
    let cookie = session_cookie(&resp);
    let body: serde_json::Value = resp.json().await.expect("signup json");
    assert_eq!(body["success"], true);
    let token = body["authToken"].as_str().expect("authToken").to_string();
    (token, cookie)
}

#[tokio::test]
async fn signup_login_logout_flow() {
    let (port, client) = start_server().await;
    let (token, cookie) = signup(port, &client, "rowan@example.com").await;

    // Session cookie resolves the identity.
    let resp = client
        .get(api(port, "/api/auth/user"))
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .await
        .expect("auth/user via cookie");
    assert_eq!(resp.status(), 200);
    let user: serde_json::Value = resp.json().await.expect("user json");
    assert_eq!(user["email"], "rowan@example.com");

    // So does the bearer token.
    let resp = client
        .get(api(port, "/api/auth/user"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("auth/user via bearer");
    assert_eq!(resp.status(), 200);

    // Login by email issues a fresh session.
    let resp = client
        .post(api(port, "/api/auth/login"))
        .json(&json!({ "email": "rowan@example.com" }))
        .send()
        .await
        .expect("login");
    assert_eq!(resp.status(), 200);
    let login_cookie = session_cookie(&resp);

    // Logout destroys the session behind the cookie.
    let resp = client
        .get(api(port, "/api/logout"))
        .header(reqwest::header::COOKIE, &login_cookie)
        .send()
        .await
        .expect("logout");
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(api(port, "/api/auth/user"))
        .header(reqwest::header::COOKIE, &login_cookie)
        .send()
        .await
        .expect("auth/user after logout");
    assert_eq!(resp.status(), 401);

    // Bearer access is independent of the destroyed session.
    let resp = client
        .get(api(port, "/api/auth/user"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("auth/user via bearer after logout");
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn signup_requires_fields_and_login_requires_known_email() {
    let (port, client) = start_server().await;

    let resp = client
        .post(api(port, "/api/auth/signup"))
        .json(&json!({ "email": "half@example.com" }))
        .send()
        .await
        .expect("signup");
    assert_eq!(resp.status(), 400);

    let resp = client
        .post(api(port, "/api/auth/login"))
        .json(&json!({ "email": "nobody@example.com" }))
        .send()
        .await
        .expect("login");
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(api(port, "/api/auth/user"))
        .send()
        .await
        .expect("auth/user unauthenticated");
    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn session_debug_reflects_authentication() {
    let (port, client) = start_server().await;

    let resp = client
        .get(api(port, "/api/auth/session"))
        .send()
        .await
        .expect("session debug");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["isAuthenticated"], false);

    let (_, cookie) = signup(port, &client, "dana@example.com").await;
    let resp = client
        .get(api(port, "/api/auth/session"))
        .header(reqwest::header::COOKIE, &cookie)
        .send()
        .await
        .expect("session debug");
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["isAuthenticated"], true);
    assert_eq!(body["user"]["email"], "dana@example.com");
    // Token fields never appear in the dump.
    assert!(body["session"].get("accessToken").is_none());
}

#[tokio::test]
async fn dev_login_redirects_by_user_type() {
    let (port, client) = start_server().await;

    let signup_data = serde_json::to_string(&json!({
        "email": "kid@example.com",
        "firstName": "Sam",
        "lastName": "Low",
        "userType": "child",
    }))
    .expect("signup data");
    let resp = client
        .get(api(port, "/api/login"))
        .query(&[("signupData", signup_data.as_str())])
        .send()
        .await
        .expect("dev login");
    assert_eq!(resp.status(), 302);
    assert_eq!(
        resp.headers()
            .get(reqwest::header::LOCATION)
            .and_then(|l| l.to_str().ok()),
        Some("/child-dashboard")
    );

    // Without signupData the default dev user lands on the adult dashboard.
    let resp = client
        .get(api(port, "/api/login"))
        .send()
        .await
        .expect("dev login default");
    assert_eq!(resp.status(), 302);
    assert_eq!(
        resp.headers()
            .get(reqwest::header::LOCATION)
            .and_then(|l| l.to_str().ok()),
        Some("/dashboard")
    );
}

#[tokio::test]
async fn speech_and_chat_features_behind_the_gate() {
    let (port, client) = start_server().await;

    // Gated without credentials.
    let resp = client
        .post(api(port, "/api/speech/session"))
        .json(&json!({}))
        .send()
        .await
        .expect("speech session unauthenticated");
    assert_eq!(resp.status(), 401);

    let (token, _) = signup(port, &client, "vee@example.com").await;

    let resp = client
        .post(api(port, "/api/speech/session"))
        .bearer_auth(&token)
        .json(&json!({ "exerciseType": "articulation" }))
        .send()
        .await
        .expect("speech session");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    let speech_session_id = body["session"]["id"].as_str().expect("session id").to_string();

    let resp = client
        .post(api(port, "/api/speech/record"))
        .bearer_auth(&token)
        .json(&json!({
            "sessionId": speech_session_id,
            "transcript": "red lorry yellow lorry",
            "accuracy": 0.85,
        }))
        .send()
        .await
        .expect("speech record");
    assert_eq!(resp.status(), 200);

    let resp = client
        .get(api(port, "/api/speech/progress"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("speech progress");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["progress"][0]["sessionsCompleted"], 1);

    let resp = client
        .post(api(port, "/api/chat/session"))
        .bearer_auth(&token)
        .send()
        .await
        .expect("chat session");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    let chat_session_id = body["session"]["id"].as_str().expect("chat id").to_string();

    let resp = client
        .post(api(port, "/api/chat/message"))
        .bearer_auth(&token)
        .json(&json!({ "sessionId": chat_session_id, "content": "I felt nervous today" }))
        .send()
        .await
        .expect("chat message");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["message"]["role"], "assistant");
    assert!(body["message"]["emotion"].is_string());
    assert!(body["message"]["supportType"].is_string());

    let resp = client
        .get(api(port, &format!("/api/chat/messages/{}", chat_session_id)))
        .bearer_auth(&token)
        .send()
        .await
        .expect("chat messages");
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = resp.json().await.expect("json");
    assert_eq!(body["messages"].as_array().map(Vec::len), Some(2));

    // Another user's session is invisible.
    let (other_token, _) = signup(port, &client, "zed@example.com").await;
    let resp = client
        .get(api(port, &format!("/api/chat/messages/{}", chat_session_id)))
        .bearer_auth(&other_token)
        .send()
        .await
        .expect("chat messages other user");
    assert_eq!(resp.status(), 404);
}
