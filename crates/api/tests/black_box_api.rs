use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};

use chrono::{Duration, Utc};

use ferrobank_api::app::{AppServices, TokenLifetimes, build_app};
use ferrobank_auth::{Hs256TokenMaker, NewSession, NewUser, Role, TokenMaker, hash_password};
use ferrobank_infra::store::{InMemoryStore, SessionRepository, UserRepository};

const SECRET: &str = "test-secret-test-secret-test-secret";
const PASSWORD: &str = "secret123";

struct TestServer {
    base_url: String,
    store: InMemoryStore,
    client: reqwest::Client,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-memory store, ephemeral port.
        let store = InMemoryStore::new();
        let tokens = Arc::new(Hs256TokenMaker::new(SECRET.as_bytes()).unwrap());
        let lifetimes = TokenLifetimes {
            access: Duration::minutes(15),
            refresh: Duration::hours(24),
        };
        let services = AppServices::from_store(store.clone(), tokens, lifetimes, None);
        let app = build_app(services);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            store,
            client: reqwest::Client::new(),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn sign_up(&self, username: &str) -> Value {
        let res = self
            .client
            .post(self.url("/users"))
            .json(&json!({
                "username": username,
                "password": PASSWORD,
                "full_name": "Test User",
                "email": format!("{username}@example.com"),
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        res.json().await.unwrap()
    }

    /// Bankers cannot sign up over HTTP; insert one directly.
    async fn insert_banker(&self, username: &str) {
        self.store
            .create_user(&NewUser {
                username: username.to_string(),
                role: Role::Banker,
                hashed_password: hash_password(PASSWORD).unwrap(),
                full_name: "Bank Staff".to_string(),
                email: format!("{username}@bank.example"),
            })
            .await
            .unwrap();
    }

    async fn login(&self, username: &str) -> String {
        self.login_body(username).await["access_token"].as_str().unwrap().to_string()
    }

    async fn login_body(&self, username: &str) -> Value {
        let res = self
            .client
            .post(self.url("/users/login"))
            .json(&json!({ "username": username, "password": PASSWORD }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
        res.json().await.unwrap()
    }

    async fn renew(&self, refresh_token: &str) -> reqwest::Response {
        self.client
            .post(self.url("/tokens/renew_access"))
            .json(&json!({ "refresh_token": refresh_token }))
            .send()
            .await
            .unwrap()
    }

    /// Mint a refresh token for `username` and store a session for it,
    /// letting the caller tamper with the session first.
    async fn stored_session(&self, username: &str, tamper: impl FnOnce(&mut NewSession)) -> String {
        let maker = Hs256TokenMaker::new(SECRET.as_bytes()).unwrap();
        let (token, claims) = maker
            .create_token(username, Role::Depositor, Duration::hours(1), Utc::now())
            .unwrap();
        let mut session = NewSession::for_refresh_token(&claims, token.clone(), "test", "127.0.0.1");
        tamper(&mut session);
        self.store.create_session(&session).await.unwrap();
        token
    }

    async fn open_account(&self, token: &str, currency: &str) -> i64 {
        let res = self
            .client
            .post(self.url("/accounts"))
            .bearer_auth(token)
            .json(&json!({ "currency": currency }))
            .send()
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: Value = res.json().await.unwrap();
        assert_eq!(body["balance"], 0);
        body["id"].as_i64().unwrap()
    }

    async fn deposit(&self, banker_token: &str, account_id: i64, amount: i64) -> reqwest::Response {
        self.client
            .post(self.url(&format!("/accounts/{account_id}/adjustments")))
            .bearer_auth(banker_token)
            .json(&json!({ "amount": amount }))
            .send()
            .await
            .unwrap()
    }

    async fn transfer(&self, token: &str, from: i64, to: i64, amount: i64, currency: &str) -> reqwest::Response {
        self.client
            .post(self.url("/transfers"))
            .bearer_auth(token)
            .json(&json!({
                "from_account_id": from,
                "to_account_id": to,
                "amount": amount,
                "currency": currency,
            }))
            .send()
            .await
            .unwrap()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn error_code(res: reqwest::Response) -> String {
    let body: Value = res.json().await.unwrap();
    body["error"].as_str().unwrap_or_default().to_string()
}

#[tokio::test]
async fn health_is_public() {
    let srv = TestServer::spawn().await;
    let res = srv.client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn auth_required_for_protected_endpoints() {
    let srv = TestServer::spawn().await;

    let res = srv.client.get(srv.url("/accounts")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthorized");

    let res = srv
        .client
        .get(srv.url("/users/me"))
        .bearer_auth("not-a-token")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn sign_up_login_and_profile() {
    let srv = TestServer::spawn().await;

    let user = srv.sign_up("alice").await;
    assert_eq!(user["role"], "depositor");
    assert!(user.get("hashed_password").is_none());

    // duplicate username
    let res = srv
        .client
        .post(srv.url("/users"))
        .json(&json!({
            "username": "alice",
            "password": PASSWORD,
            "full_name": "Other Alice",
            "email": "other@example.com",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = srv
        .client
        .post(srv.url("/users/login"))
        .json(&json!({ "username": "alice", "password": "wrong-password" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = srv
        .client
        .post(srv.url("/users/login"))
        .json(&json!({ "username": "nobody", "password": PASSWORD }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let token = srv.login("alice").await;
    let me: Value = srv
        .client
        .get(srv.url("/users/me"))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["username"], "alice");

    let res = srv
        .client
        .patch(srv.url("/users/alice"))
        .bearer_auth(&token)
        .json(&json!({ "full_name": "Alice Liddell" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let updated: Value = res.json().await.unwrap();
    assert_eq!(updated["full_name"], "Alice Liddell");

    srv.sign_up("bob").await;
    let res = srv
        .client
        .patch(srv.url("/users/bob"))
        .bearer_auth(&token)
        .json(&json!({ "full_name": "Not Bob" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn invalid_sign_up_fields_are_rejected() {
    let srv = TestServer::spawn().await;
    let res = srv
        .client
        .post(srv.url("/users"))
        .json(&json!({
            "username": "Bad Name",
            "password": "123",
            "full_name": "Test User",
            "email": "not-an-email",
        }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: Value = res.json().await.unwrap();
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("username"));
    assert!(message.contains("password"));
    assert!(message.contains("email"));
}

#[tokio::test]
async fn accounts_are_private_to_their_owner() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.sign_up("bob").await;
    srv.insert_banker("teller").await;
    let alice = srv.login("alice").await;
    let bob = srv.login("bob").await;
    let banker = srv.login("teller").await;

    let id = srv.open_account(&alice, "USD").await;

    // one account per currency
    let res = srv
        .client
        .post(srv.url("/accounts"))
        .bearer_auth(&alice)
        .json(&json!({ "currency": "USD" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CONFLICT);

    let res = srv
        .client
        .post(srv.url("/accounts"))
        .bearer_auth(&alice)
        .json(&json!({ "currency": "XYZ" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv
        .client
        .get(srv.url(&format!("/accounts/{id}")))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv
        .client
        .get(srv.url("/accounts/999999"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    // depositors list only their own accounts, bankers may name anyone
    let res = srv
        .client
        .get(srv.url("/accounts?username=alice"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let listed: Value = srv
        .client
        .get(srv.url("/accounts?username=alice&page_id=1&page_size=5"))
        .bearer_auth(&banker)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);
    assert_eq!(listed["items"][0]["id"], id);

    let res = srv
        .client
        .get(srv.url("/accounts?page_size=4"))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn only_bankers_adjust_balances() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.insert_banker("teller").await;
    let alice = srv.login("alice").await;
    let banker = srv.login("teller").await;
    let id = srv.open_account(&alice, "USD").await;

    let res = srv.deposit(&alice, id, 100).await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.deposit(&banker, id, 100).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    assert_eq!(body["account"]["balance"], 100);
    assert_eq!(body["entry"]["amount"], 100);

    let res = srv.deposit(&banker, id, 0).await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);

    let res = srv.deposit(&banker, 999_999, 10).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let entries: Value = srv
        .client
        .get(srv.url(&format!("/accounts/{id}/entries")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(entries["items"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn transfer_moves_money_between_accounts() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.sign_up("bob").await;
    srv.insert_banker("teller").await;
    let alice = srv.login("alice").await;
    let bob = srv.login("bob").await;
    let banker = srv.login("teller").await;

    let a = srv.open_account(&alice, "USD").await;
    let b = srv.open_account(&bob, "USD").await;
    assert_eq!(srv.deposit(&banker, a, 100).await.status(), StatusCode::OK);
    assert_eq!(srv.deposit(&banker, b, 50).await.status(), StatusCode::OK);

    let res = srv.transfer(&alice, a, b, 10, "USD").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let result: Value = res.json().await.unwrap();
    assert_eq!(result["transfer"]["amount"], 10);
    assert_eq!(result["from_account"]["balance"], 90);
    assert_eq!(result["to_account"]["balance"], 60);
    assert_eq!(result["from_entry"]["amount"], -10);
    assert_eq!(result["to_entry"]["amount"], 10);

    let listed: Value = srv
        .client
        .get(srv.url("/transfers"))
        .bearer_auth(&bob)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(listed["items"].as_array().unwrap().len(), 1);

    // balances are not floored at zero
    let res = srv.transfer(&alice, a, b, 1_000, "USD").await;
    assert_eq!(res.status(), StatusCode::CREATED);
    let result: Value = res.json().await.unwrap();
    assert_eq!(result["from_account"]["balance"], -910);
}

#[tokio::test]
async fn transfer_validation_paths() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.sign_up("bob").await;
    let alice = srv.login("alice").await;
    let bob = srv.login("bob").await;

    let a_usd = srv.open_account(&alice, "USD").await;
    let a_eur = srv.open_account(&alice, "EUR").await;
    let b_usd = srv.open_account(&bob, "USD").await;

    // not the owner of the from account
    let res = srv.transfer(&bob, a_usd, b_usd, 10, "USD").await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);

    let res = srv.transfer(&alice, a_usd, 999_999, 10, "USD").await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = srv.transfer(&alice, a_usd, a_eur, 10, "USD").await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(error_code(res).await, "currency_mismatch");

    for (from, to, amount, currency) in [
        (a_usd, b_usd, 0, "USD"),
        (a_usd, b_usd, -5, "USD"),
        (a_usd, a_usd, 10, "USD"),
        (0, b_usd, 10, "USD"),
        (a_usd, b_usd, 10, "XYZ"),
    ] {
        let res = srv.transfer(&alice, from, to, amount, currency).await;
        assert_eq!(res.status(), StatusCode::BAD_REQUEST, "{from} -> {to} {amount} {currency}");
    }

    assert_eq!(srv.store.transfer_count().unwrap(), 0);
}

#[tokio::test]
async fn accounts_with_history_cannot_be_deleted() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.insert_banker("teller").await;
    let alice = srv.login("alice").await;
    let banker = srv.login("teller").await;

    let used = srv.open_account(&alice, "USD").await;
    let unused = srv.open_account(&alice, "GBP").await;
    assert_eq!(srv.deposit(&banker, used, 25).await.status(), StatusCode::OK);

    let res = srv
        .client
        .delete(srv.url(&format!("/accounts/{used}")))
        .bearer_auth(&banker)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::PRECONDITION_FAILED);

    let res = srv
        .client
        .delete(srv.url(&format!("/accounts/{unused}")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NO_CONTENT);

    let res = srv
        .client
        .delete(srv.url(&format!("/accounts/{unused}")))
        .bearer_auth(&alice)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn refresh_token_renews_access() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;

    let login = srv.login_body("alice").await;
    let refresh_token = login["refresh_token"].as_str().unwrap();
    assert!(login["session_id"].is_string());
    assert!(
        login["refresh_token_expires_at"].as_str().unwrap() > login["access_token_expires_at"].as_str().unwrap()
    );

    let res = srv.renew(refresh_token).await;
    assert_eq!(res.status(), StatusCode::OK);
    let body: Value = res.json().await.unwrap();
    let access_token = body["access_token"].as_str().unwrap();
    assert!(body["access_token_expires_at"].is_string());

    let me: Value = srv
        .client
        .get(srv.url("/users/me"))
        .bearer_auth(access_token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(me["username"], "alice");
}

#[tokio::test]
async fn renewal_requires_a_valid_refresh_token() {
    let srv = TestServer::spawn().await;

    let res = srv.renew("not-a-token").await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(error_code(res).await, "unauthorized");

    // signed and unexpired, but never issued by login
    srv.sign_up("alice").await;
    let maker = Hs256TokenMaker::new(SECRET.as_bytes()).unwrap();
    let (orphan, _) = maker
        .create_token("alice", Role::Depositor, Duration::hours(1), Utc::now())
        .unwrap();
    let res = srv.renew(&orphan).await;
    assert_eq!(res.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn renewal_is_refused_for_bad_sessions() {
    let srv = TestServer::spawn().await;
    srv.sign_up("alice").await;
    srv.sign_up("bob").await;

    let blocked = srv.stored_session("alice", |s| s.is_blocked = true).await;
    let foreign = srv.stored_session("alice", |s| s.username = "bob".to_string()).await;
    let replaced = srv
        .stored_session("alice", |s| s.refresh_token = "some-other-token".to_string())
        .await;
    let expired = srv
        .stored_session("alice", |s| s.expires_at = Utc::now() - Duration::minutes(1))
        .await;

    for token in [blocked, foreign, replaced, expired] {
        let res = srv.renew(&token).await;
        assert_eq!(res.status(), StatusCode::FORBIDDEN);
        assert_eq!(error_code(res).await, "forbidden");
    }

    let good = srv.stored_session("alice", |_| {}).await;
    assert_eq!(srv.renew(&good).await.status(), StatusCode::OK);
}
