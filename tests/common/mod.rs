#![allow(dead_code)]

use std::str::FromStr;
use std::sync::Arc;

use bigdecimal::BigDecimal;
use payflow_core::adapters::Repositories;
use payflow_core::config::Config;
use payflow_core::domain::{BalanceGuard, EntryType, NewLedgerEntry};
use payflow_core::handlers::webhook::{sign_payload, SIGNATURE_HEADER};
use payflow_core::health::HealthService;
use payflow_core::processor::{PaymentProcessor, SandboxProcessor};
use payflow_core::{create_app, AppState};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "test-webhook-secret";
pub const ADMIN_KEY: &str = "test-admin-key";

pub fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

pub fn test_config() -> Config {
    Config {
        processor_webhook_secret: WEBHOOK_SECRET.to_string(),
        admin_api_key: ADMIN_KEY.to_string(),
        poll_interval_secs: 1,
        bank_iban: Some("DE89370400440532013000".to_string()),
        ..Config::default()
    }
}

pub fn build_state(processor: Arc<dyn PaymentProcessor>) -> AppState {
    build_state_with(Repositories::in_memory(), processor)
}

pub fn build_state_with(repos: Repositories, processor: Arc<dyn PaymentProcessor>) -> AppState {
    AppState::new(&test_config(), repos, processor, HealthService::new(Vec::new()))
}

pub async fn new_account(state: &AppState) -> Uuid {
    let id = Uuid::new_v4();
    state.ledger.create_account(id).await.unwrap();
    id
}

pub async fn seed_balance(state: &AppState, account_id: Uuid, amount: &str) {
    state
        .ledger
        .apply_delta(
            NewLedgerEntry::new(account_id, dec(amount), EntryType::Credit, "seed"),
            BalanceGuard::AllowNegative,
        )
        .await
        .unwrap();
}

pub struct TestApp {
    pub base_url: String,
    pub state: AppState,
    pub processor: Arc<SandboxProcessor>,
    pub client: reqwest::Client,
}

pub async fn spawn_app() -> TestApp {
    let processor = Arc::new(SandboxProcessor::new());
    let state = build_state(processor.clone());
    let app = create_app(state.clone());

    let addr = std::net::SocketAddr::from(([127, 0, 0, 1], 0));
    let server = axum::Server::bind(&addr).serve(app.into_make_service());
    let actual_addr = server.local_addr();

    tokio::spawn(async move {
        server.await.unwrap();
    });

    TestApp {
        base_url: format!("http://{}", actual_addr),
        state,
        processor,
        client: reqwest::Client::new(),
    }
}

impl TestApp {
    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn admin_post(&self, path: &str, body: serde_json::Value) -> reqwest::Response {
        self.client
            .post(self.url(path))
            .bearer_auth(ADMIN_KEY)
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn create_account(&self) -> Uuid {
        let res = self
            .admin_post("/admin/accounts", serde_json::json!({}))
            .await;
        assert_eq!(res.status(), reqwest::StatusCode::CREATED);
        let body: serde_json::Value = res.json().await.unwrap();
        body["id"].as_str().unwrap().parse().unwrap()
    }

    pub async fn send_webhook(&self, payload: serde_json::Value) -> reqwest::Response {
        let body = serde_json::to_vec(&payload).unwrap();
        let signature = sign_payload(WEBHOOK_SECRET, &body);
        self.client
            .post(self.url("/webhooks/processor"))
            .header(SIGNATURE_HEADER, signature)
            .header("content-type", "application/json")
            .body(body)
            .send()
            .await
            .unwrap()
    }

    pub async fn balance(&self, account_id: Uuid) -> BigDecimal {
        let body: serde_json::Value = self
            .client
            .get(self.url(&format!("/accounts/{}", account_id)))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        dec(body["balance"].as_str().unwrap())
    }
}
