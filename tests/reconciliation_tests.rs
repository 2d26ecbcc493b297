use loyalty_transfer::application::config::ConcurrencyMode;
use loyalty_transfer::application::engine::Adjustment;
use loyalty_transfer::domain::account::AccountId;
use loyalty_transfer::domain::ledger::EventKind;
use loyalty_transfer::domain::transfer::TransferRequest;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;

const ACCOUNTS: u64 = 6;

/// Random mix of transfers, earns and redeems; some fail. Afterwards every
/// account's ledger must replay to its balance and no points are created
/// except through earn/redeem.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_random_workload_reconciles() {
    let mut rng = StdRng::seed_from_u64(42);
    let opening: Vec<(u64, u64)> = (1..=ACCOUNTS).map(|id| (id, rng.gen_range(0..500))).collect();
    let engine = common::engine_with(ConcurrencyMode::Optimistic, &opening).await;

    let mut handles = Vec::new();
    for _ in 0..400 {
        let engine = engine.clone();
        let from = rng.gen_range(1..=ACCOUNTS);
        let to = rng.gen_range(1..=ACCOUNTS);
        let amount = rng.gen_range(1..120);
        let roll = rng.gen_range(0..10);
        handles.push(tokio::spawn(async move {
            match roll {
                0 => engine
                    .adjust(Adjustment::new(AccountId(from), amount as i64, EventKind::Earn))
                    .await
                    .map(|e| e.delta),
                1 => engine
                    .adjust(Adjustment::new(AccountId(from), -(amount as i64), EventKind::Redeem))
                    .await
                    .map(|e| e.delta),
                _ => engine
                    .submit(TransferRequest::new(AccountId(from), AccountId(to), amount))
                    .await
                    .map(|_| 0),
            }
        }));
    }

    let mut minted: i64 = 0;
    for handle in handles {
        if let Ok(delta) = handle.await.unwrap() {
            minted += delta;
        }
    }

    let mut total: i64 = 0;
    for id in 1..=ACCOUNTS {
        let reconciliation = engine.reconcile(AccountId(id)).await.unwrap();
        assert!(reconciliation.is_consistent(), "account {id} drifted");
        total += reconciliation.balance.0 as i64;
    }

    let opened: i64 = opening.iter().map(|(_, b)| *b as i64).sum();
    assert_eq!(total, opened + minted);
}
