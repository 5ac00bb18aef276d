mod common;

use std::sync::Arc;

use bigdecimal::BigDecimal;
use common::{build_state, dec, new_account, seed_balance};
use payflow_core::domain::{
    deposit_reference, withdrawal_reference, BalanceGuard, Decision, EntryType, NewLedgerEntry,
    WithdrawalStatus,
};
use payflow_core::processor::SandboxProcessor;
use payflow_core::services::{BalanceUpdate, EngineError, SignalSource};
use payflow_core::validation::Network;
use payflow_core::AppState;

const ETH_ADDRESS: &str = "0x742d35Cc6634C0532925a3b844Bc454e4438f44e";

fn update(account_id: uuid::Uuid, delta: &str) -> BalanceUpdate {
    BalanceUpdate {
        account_id,
        delta: dec(delta),
        entry_type: EntryType::Adjustment,
        description: "manual correction".to_string(),
        actor_id: "ops@example.com".to_string(),
        reference: None,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_deltas_keep_balance_equal_to_ledger() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;

    let mut handles = Vec::new();
    for i in 0..50 {
        let ledger = state.ledger.clone();
        let delta = if i % 3 == 0 { "-2.50" } else { "4.25" };
        handles.push(tokio::spawn(async move {
            ledger.update_balance(update(account, delta)).await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // 17 debits of 2.50 and 33 credits of 4.25
    let expected = dec("97.75");
    let balance = state.ledger.account(account).await.unwrap().balance;
    assert_eq!(balance, expected);

    let history = state.ledger.history(account, 500, 0).await.unwrap();
    assert_eq!(history.len(), 50);
    let sum: BigDecimal = history.iter().map(|tx| tx.amount.clone()).sum();
    assert_eq!(sum, expected);

    let mut seqs: Vec<i64> = history.iter().map(|tx| tx.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 50);

    let latest = history.iter().max_by_key(|tx| tx.seq).unwrap();
    assert_eq!(latest.new_balance, expected);

    let audit = state.ledger.audit(account).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.entries, 50);
    assert_eq!(audit.ledger_sum, expected);
}

#[tokio::test]
async fn test_referenced_delta_is_applied_once() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;

    let mut first = update(account, "12.00");
    first.reference = Some("adjustment:ticket-42".to_string());
    let applied = state.ledger.update_balance(first.clone()).await.unwrap();
    assert!(!applied.replayed);

    let replay = state.ledger.update_balance(first).await.unwrap();
    assert!(replay.replayed);
    assert_eq!(replay.transaction.id, applied.transaction.id);
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("12.00"));
}

#[tokio::test]
async fn test_update_balance_validation() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;

    let mut missing_actor = update(account, "1.00");
    missing_actor.actor_id = "  ".to_string();
    assert!(matches!(
        state.ledger.update_balance(missing_actor).await,
        Err(EngineError::Validation(_))
    ));

    assert!(matches!(
        state.ledger.update_balance(update(account, "0")).await,
        Err(EngineError::Validation(_))
    ));

    assert!(matches!(
        state
            .ledger
            .update_balance(update(uuid::Uuid::new_v4(), "1.00"))
            .await,
        Err(EngineError::AccountNotFound(_))
    ));

    assert!(state.ledger.history(account, 50, 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_withdrawal_exceeding_balance_persists_nothing() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "40.00").await;

    let result = state
        .withdrawals
        .create_request(account, dec("50.00"), Network::Ethereum, ETH_ADDRESS)
        .await;
    assert!(matches!(result, Err(EngineError::InsufficientFunds { .. })));

    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("40.00"));
    assert_eq!(state.ledger.history(account, 50, 0).await.unwrap().len(), 1);
    assert!(state
        .withdrawals
        .list(WithdrawalStatus::Pending, 50, 0)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn test_approval_rechecks_balance() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "40.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("30.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    state
        .ledger
        .update_balance(update(account, "-20.00"))
        .await
        .unwrap();

    let result = state
        .withdrawals
        .decide(request.id, Decision::Approve, "reviewer-1", None)
        .await;
    assert!(matches!(result, Err(EngineError::InsufficientFunds { .. })));

    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("20.00"));
    assert_eq!(
        state.withdrawals.get(request.id).await.unwrap().status,
        WithdrawalStatus::Pending
    );
}

#[tokio::test]
async fn test_withdrawal_is_decided_once() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "40.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("30.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();

    let approved = state
        .withdrawals
        .decide(request.id, Decision::Approve, "reviewer-1", None)
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(approved.reviewed_by.as_deref(), Some("reviewer-1"));

    let again = state
        .withdrawals
        .decide(request.id, Decision::Approve, "reviewer-2", None)
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyDecided(_))));

    let reject = state
        .withdrawals
        .decide(
            request.id,
            Decision::Reject,
            "reviewer-2",
            Some("late".to_string()),
        )
        .await;
    assert!(matches!(reject, Err(EngineError::AlreadyDecided(_))));

    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("10.00"));
    let audit = state.ledger.audit(account).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.entries, 2);
}

async fn debit_without_review(state: &AppState, account: uuid::Uuid, id: uuid::Uuid, amount: &str) {
    state
        .ledger
        .apply_delta(
            NewLedgerEntry::new(account, -dec(amount), EntryType::Debit, "erc20 withdrawal")
                .with_reference(withdrawal_reference(id))
                .with_actor("reviewer-1"),
            BalanceGuard::RequireNonNegative,
        )
        .await
        .unwrap();
}

#[tokio::test]
async fn test_reject_after_interrupted_approval_keeps_debit() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "100.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("50.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    // The debit landed but the review was never recorded.
    debit_without_review(&state, account, request.id, "50.00").await;
    assert_eq!(
        state.withdrawals.get(request.id).await.unwrap().status,
        WithdrawalStatus::Pending
    );

    let reject = state
        .withdrawals
        .decide(
            request.id,
            Decision::Reject,
            "reviewer-2",
            Some("changed my mind".to_string()),
        )
        .await;
    assert!(matches!(reject, Err(EngineError::AlreadyDecided(_))));

    let stored = state.withdrawals.get(request.id).await.unwrap();
    assert_eq!(stored.status, WithdrawalStatus::Approved);
    assert_eq!(stored.reviewed_by.as_deref(), Some("reviewer-1"));
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("50.00"));

    let audit = state.ledger.audit(account).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.entries, 2);
}

#[tokio::test]
async fn test_retried_approval_after_interrupted_debit_is_not_charged_twice() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "100.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("50.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    debit_without_review(&state, account, request.id, "50.00").await;

    let approved = state
        .withdrawals
        .decide(request.id, Decision::Approve, "reviewer-1", None)
        .await
        .unwrap();
    assert_eq!(approved.status, WithdrawalStatus::Approved);
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("50.00"));
    assert_eq!(state.ledger.history(account, 50, 0).await.unwrap().len(), 2);

    let again = state
        .withdrawals
        .decide(request.id, Decision::Reject, "reviewer-2", None)
        .await;
    assert!(matches!(again, Err(EngineError::AlreadyDecided(_))));
}

#[tokio::test]
async fn test_pending_withdrawals_with_debit_are_recovered() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "100.00").await;

    let interrupted = state
        .withdrawals
        .create_request(account, dec("30.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    let untouched = state
        .withdrawals
        .create_request(account, dec("20.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    debit_without_review(&state, account, interrupted.id, "30.00").await;

    assert_eq!(state.withdrawals.reconcile_pending().await.unwrap(), 1);
    assert_eq!(
        state.withdrawals.get(interrupted.id).await.unwrap().status,
        WithdrawalStatus::Approved
    );
    assert_eq!(
        state.withdrawals.get(untouched.id).await.unwrap().status,
        WithdrawalStatus::Pending
    );
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("70.00"));

    assert_eq!(state.withdrawals.reconcile_pending().await.unwrap(), 0);
}

#[tokio::test]
async fn test_balance_updates_cannot_claim_flow_references() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    let intent = state
        .deposits
        .create_deposit(account, dec("100.00"), "btc")
        .await
        .unwrap();
    let withdrawal_id = uuid::Uuid::new_v4();

    for reference in [
        deposit_reference(&intent.payment_id),
        withdrawal_reference(withdrawal_id),
        format!("  DEPOSIT:{}", intent.payment_id),
    ] {
        let mut squat = update(account, "1.00");
        squat.reference = Some(reference);
        assert!(matches!(
            state.ledger.update_balance(squat).await,
            Err(EngineError::Validation(_))
        ));
    }
    assert!(state.ledger.history(account, 50, 0).await.unwrap().is_empty());

    let outcome = state
        .reconciler
        .apply_signal(&intent.payment_id, "finished", SignalSource::Webhook)
        .await
        .unwrap();
    assert!(outcome.credited);
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("100.00"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_approvals_debit_once() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "100.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("60.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();

    let mut handles = Vec::new();
    for i in 0..6 {
        let withdrawals = state.withdrawals.clone();
        let id = request.id;
        handles.push(tokio::spawn(async move {
            withdrawals
                .decide(id, Decision::Approve, &format!("reviewer-{}", i), None)
                .await
        }));
    }

    let mut approved = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => approved += 1,
            Err(EngineError::AlreadyDecided(_)) => {}
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    assert_eq!(approved, 1);
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("40.00"));
}

#[tokio::test]
async fn test_rejection_leaves_balance_untouched() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;
    seed_balance(&state, account, "40.00").await;

    let request = state
        .withdrawals
        .create_request(account, dec("20.00"), Network::Ethereum, ETH_ADDRESS)
        .await
        .unwrap();
    let rejected = state
        .withdrawals
        .decide(
            request.id,
            Decision::Reject,
            "reviewer-1",
            Some("destination flagged".to_string()),
        )
        .await
        .unwrap();

    assert_eq!(rejected.status, WithdrawalStatus::Rejected);
    assert_eq!(rejected.reason.as_deref(), Some("destination flagged"));
    assert_eq!(state.ledger.account(account).await.unwrap().balance, dec("40.00"));

    let pending = state
        .withdrawals
        .list(WithdrawalStatus::Pending, 50, 0)
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn test_withdrawal_request_validation() {
    let state = build_state(Arc::new(SandboxProcessor::new()));
    let account = new_account(&state).await;

    let below = state
        .withdrawals
        .create_request(account, dec("1.00"), Network::Ethereum, ETH_ADDRESS)
        .await;
    assert!(matches!(below, Err(EngineError::BelowMinimum { .. })));

    let bad_address = state
        .withdrawals
        .create_request(account, dec("20.00"), Network::Ethereum, "not-an-address")
        .await;
    assert!(matches!(bad_address, Err(EngineError::InvalidAddress(_))));
}
