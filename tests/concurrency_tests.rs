use loyalty_transfer::application::config::{ConcurrencyMode, EngineConfig};
use loyalty_transfer::application::engine::TransferEngine;
use loyalty_transfer::domain::account::{AccountId, Balance};
use loyalty_transfer::domain::ports::{AccountStore, StoreHandle};
use loyalty_transfer::domain::transfer::{IdempotencyToken, TransferRequest};
use loyalty_transfer::error::{ErrorKind, TransferError};
use loyalty_transfer::infrastructure::in_memory::InMemoryStore;
use std::sync::Arc;
use std::time::Duration;

mod common;

const MODES: [ConcurrencyMode; 2] = [ConcurrencyMode::Pessimistic, ConcurrencyMode::Optimistic];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_contended_sender_never_overdraws() {
    const TASKS: u64 = 50;
    const AMOUNT: u64 = 10;

    for mode in MODES {
        let engine = common::engine_with(mode, &[(1, (TASKS - 1) * AMOUNT), (2, 0)]).await;

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let engine = engine.clone();
                tokio::spawn(async move {
                    engine
                        .submit(TransferRequest::new(AccountId(1), AccountId(2), AMOUNT))
                        .await
                })
            })
            .collect();

        let mut completed = 0;
        let mut insufficient = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => completed += 1,
                Err(TransferError::InsufficientFunds { .. }) => insufficient += 1,
                Err(other) => panic!("unexpected error in {mode:?} mode: {other}"),
            }
        }

        assert_eq!(completed, TASKS - 1, "{mode:?}");
        assert_eq!(insufficient, 1, "{mode:?}");
        assert_eq!(engine.balance(AccountId(1)).await.unwrap(), Balance::ZERO);
        assert_eq!(
            engine.balance(AccountId(2)).await.unwrap(),
            Balance::new((TASKS - 1) * AMOUNT)
        );
        assert!(engine.reconcile(AccountId(1)).await.unwrap().is_consistent());
        assert!(engine.reconcile(AccountId(2)).await.unwrap().is_consistent());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_same_token_applies_once() {
    for mode in MODES {
        let engine = common::engine_with(mode, &[(1, 100), (2, 0)]).await;
        let token = IdempotencyToken::new("race").unwrap();

        let handles: Vec<_> = (0..20)
            .map(|_| {
                let engine = engine.clone();
                let request = TransferRequest::new(AccountId(1), AccountId(2), 30).with_token(token.clone());
                tokio::spawn(async move { engine.submit(request).await })
            })
            .collect();

        let mut ids = Vec::new();
        for handle in handles {
            ids.push(handle.await.unwrap().unwrap().id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1, "{mode:?}");

        assert_eq!(engine.balance(AccountId(1)).await.unwrap(), Balance::new(70));
        assert_eq!(engine.balance(AccountId(2)).await.unwrap(), Balance::new(30));
        assert_eq!(engine.ledger(AccountId(2)).await.unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_opposite_directions_do_not_deadlock() {
    for mode in MODES {
        let engine = common::engine_with(mode, &[(1, 1_000), (2, 1_000)]).await;

        let handles: Vec<_> = (0..100)
            .map(|i| {
                let engine = engine.clone();
                let (from, to) = if i % 2 == 0 { (1, 2) } else { (2, 1) };
                tokio::spawn(async move {
                    engine
                        .submit(TransferRequest::new(AccountId(from), AccountId(to), 7))
                        .await
                })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let total = engine.balance(AccountId(1)).await.unwrap().0 + engine.balance(AccountId(2)).await.unwrap().0;
        assert_eq!(total, 2_000, "{mode:?}");
        assert_eq!(engine.balance(AccountId(1)).await.unwrap(), Balance::new(1_000));
    }
}

#[tokio::test]
async fn test_lock_timeout_mutates_nothing() {
    let store: StoreHandle = Arc::new(InMemoryStore::new());
    let engine = TransferEngine::with_config(
        store.clone(),
        EngineConfig {
            lock_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        },
    );
    engine.open_account(AccountId(1), 100).await.unwrap();
    engine.open_account(AccountId(2), 0).await.unwrap();

    let held = store.lock(&[AccountId(2)], Duration::from_secs(1)).await.unwrap();
    let token = IdempotencyToken::new("slow").unwrap();
    let request = TransferRequest::new(AccountId(1), AccountId(2), 40).with_token(token.clone());

    let err = engine.submit(request.clone()).await.unwrap_err();
    assert!(matches!(err, TransferError::Timeout(_)));
    assert_eq!(err.kind(), ErrorKind::Internal);
    assert_eq!(err.code(), "INTERNAL_ERROR");

    assert_eq!(engine.balance(AccountId(1)).await.unwrap(), Balance::new(100));
    assert_eq!(engine.balance(AccountId(2)).await.unwrap(), Balance::ZERO);
    assert_eq!(engine.ledger(AccountId(1)).await.unwrap().len(), 1);
    assert!(engine.ledger(AccountId(2)).await.unwrap().is_empty());
    assert!(engine.get_by_token(&token).await.is_err());

    // The same token goes through once the locks are free.
    drop(held);
    let transfer = engine.submit(request).await.unwrap();
    assert_eq!(transfer.token, token);
    assert_eq!(engine.balance(AccountId(2)).await.unwrap(), Balance::new(40));
}
