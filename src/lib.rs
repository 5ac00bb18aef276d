pub mod adapters;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod ports;
pub mod processor;
pub mod secrets;
pub mod services;
pub mod startup;
pub mod validation;

use std::sync::Arc;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};

use crate::adapters::Repositories;
use crate::config::Config;
use crate::health::HealthService;
use crate::processor::PaymentProcessor;
use crate::services::{
    DepositTracker, ExpiryWatchdog, LedgerService, PollingDriver, StatusReconciler,
    WithdrawalQueue,
};

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<LedgerService>,
    pub deposits: Arc<DepositTracker>,
    pub reconciler: Arc<StatusReconciler>,
    pub polling: Arc<PollingDriver>,
    pub withdrawals: Arc<WithdrawalQueue>,
    pub watchdog: Arc<ExpiryWatchdog>,
    pub health: Arc<HealthService>,
    pub webhook_secret: Arc<str>,
    pub admin_api_key: Arc<str>,
}

impl AppState {
    /// Wires every service over one set of repositories and one processor.
    pub fn new(
        config: &Config,
        repos: Repositories,
        processor: Arc<dyn PaymentProcessor>,
        health: HealthService,
    ) -> Self {
        let ledger = Arc::new(LedgerService::new(repos.ledger.clone()));
        let deposits = Arc::new(DepositTracker::new(
            repos.deposits.clone(),
            ledger.clone(),
            processor.clone(),
            config.deposit_settings(),
        ));
        let reconciler = Arc::new(StatusReconciler::new(
            repos.deposits.clone(),
            ledger.clone(),
            processor,
        ));
        let polling = Arc::new(PollingDriver::new(
            reconciler.clone(),
            config.poll_interval(),
        ));
        let withdrawals = Arc::new(WithdrawalQueue::new(
            repos.withdrawals.clone(),
            ledger.clone(),
            config.min_withdrawal_amount.clone(),
        ));
        let watchdog = Arc::new(ExpiryWatchdog::new(
            repos.deposits,
            reconciler.clone(),
            config.watchdog_interval(),
        ));

        Self {
            ledger,
            deposits,
            reconciler,
            polling,
            withdrawals,
            watchdog,
            health: Arc::new(health),
            webhook_secret: Arc::from(config.processor_webhook_secret.as_str()),
            admin_api_key: Arc::from(config.admin_api_key.as_str()),
        }
    }
}

pub fn create_app(state: AppState) -> Router {
    let admin = Router::new()
        .route("/accounts", post(handlers::admin::create_account))
        .route("/balance", post(handlers::admin::update_balance))
        .route("/accounts/:id/audit", get(handlers::admin::audit_account))
        .route("/withdrawals", get(handlers::admin::list_withdrawals))
        .route(
            "/withdrawals/:id/decision",
            post(handlers::admin::decide_withdrawal),
        )
        .route(
            "/deposits/:payment_id/status",
            post(handlers::admin::report_deposit_status),
        )
        .route_layer(axum_middleware::from_fn_with_state(
            state.admin_api_key.clone(),
            middleware::admin_auth,
        ));

    Router::new()
        .route("/health", get(handlers::health))
        .route("/deposits", post(handlers::deposits::create_deposit))
        .route("/deposits/bank", post(handlers::deposits::create_bank_deposit))
        .route("/deposits/:payment_id", get(handlers::deposits::get_deposit))
        .route(
            "/deposits/:payment_id/session",
            post(handlers::deposits::start_session).delete(handlers::deposits::stop_session),
        )
        .route(
            "/webhooks/processor",
            post(handlers::webhook::processor_callback),
        )
        .route("/accounts/:id", get(handlers::accounts::get_account))
        .route("/accounts/:id/ledger", get(handlers::accounts::get_ledger))
        .route("/accounts/:id/deposits", get(handlers::accounts::list_deposits))
        .route("/withdrawals", post(handlers::withdrawals::create_withdrawal))
        .route("/withdrawals/:id", get(handlers::withdrawals::get_withdrawal))
        .nest("/admin", admin)
        .layer(axum_middleware::from_fn(
            middleware::request_logger_middleware,
        ))
        .with_state(state)
}
