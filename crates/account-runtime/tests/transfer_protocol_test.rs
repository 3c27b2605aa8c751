//! End-to-end transfer protocol tests over real entity actors

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use account_core::{
    account_persistence_id, transfer_persistence_id, AccountError, Delivery, Money, TransferEvent, TransferKind,
    TransferStage, TransferState, TransferStatus,
};
use account_runtime::{
    AccountManager, AccountService, ActorAccountService, RuntimeConfig, ServiceTimeouts,
    StepReply, TransferRequest,
};
use account_storage::{EntityJournal, InMemoryJournal, Journal, RocksJournal};
use chrono::Utc;
use uuid::Uuid;

fn money(v: &str) -> Money {
    v.parse().unwrap()
}

fn config() -> RuntimeConfig {
    RuntimeConfig {
        account_snapshot_interval: 3,
        transfer_snapshot_interval: 2,
        redelivery_interval: Duration::from_millis(100),
        ..RuntimeConfig::default()
    }
}

async fn accounts_with_balance(
    service: &impl AccountService,
    balance: &str,
) -> (Uuid, Uuid) {
    let source = service
        .create_account(Uuid::new_v4(), "source".into())
        .await
        .unwrap();
    let target = service
        .create_account(Uuid::new_v4(), "target".into())
        .await
        .unwrap();
    service
        .deposit_money(Uuid::new_v4(), source, money(balance))
        .await
        .unwrap();
    (source, target)
}

async fn wait_for_finish(manager: &AccountManager, transfer_id: Uuid) -> TransferState {
    for _ in 0..100 {
        let state = manager.retrieve_transfer(transfer_id).await.unwrap();
        if state.is_finished() {
            return state;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("transfer {} did not finish", transfer_id);
}

/// Open the RocksDB journal at `path`, waiting until a previous instance has let go of it
async fn reopen(path: &Path) -> Arc<dyn Journal> {
    for _ in 0..100 {
        match RocksJournal::open(path) {
            Ok(journal) => return Arc::new(journal),
            Err(_) => tokio::time::sleep(Duration::from_millis(20)).await,
        }
    }
    panic!("journal at {} is still locked", path.display());
}

#[test_log::test(tokio::test)]
async fn test_transfer_moves_money() {
    let manager = Arc::new(AccountManager::new(Arc::new(InMemoryJournal::new()), config()));
    let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
    let (source, target) = accounts_with_balance(&service, "100.50").await;

    let transfer_id = Uuid::new_v4();
    let transfer = service
        .make_transfer(transfer_id, source, target, money("40.25"))
        .await
        .unwrap();

    assert_eq!(transfer.id, transfer_id);
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(
        service.retrieve_account(source).await.unwrap().balance,
        money("60.25")
    );
    assert_eq!(
        service.retrieve_account(target).await.unwrap().balance,
        money("40.25")
    );

    let source_state = service.retrieve_account(source).await.unwrap();
    assert!(source_state.current_transfers.is_empty());
    assert!(source_state.has_completed_transfer(transfer_id));
}

#[test_log::test(tokio::test)]
async fn test_transfer_with_low_balance_leaves_balances() {
    let manager = Arc::new(AccountManager::new(Arc::new(InMemoryJournal::new()), config()));
    let service = ActorAccountService::new(manager, ServiceTimeouts::default());
    let (source, target) = accounts_with_balance(&service, "10").await;

    let transfer = service
        .make_transfer(Uuid::new_v4(), source, target, money("10.01"))
        .await
        .unwrap();

    assert_eq!(transfer.status, TransferStatus::LowBalance);
    assert_eq!(service.retrieve_account(source).await.unwrap().balance, money("10"));
    assert_eq!(service.retrieve_account(target).await.unwrap().balance, Money::ZERO);
}

#[test_log::test(tokio::test)]
async fn test_concurrent_transfers_keep_total_balance() {
    let manager = Arc::new(AccountManager::new(Arc::new(InMemoryJournal::new()), config()));
    let service = Arc::new(ActorAccountService::new(
        manager,
        ServiceTimeouts::default(),
    ));
    let (a, b) = accounts_with_balance(service.as_ref(), "100").await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let service = service.clone();
        let (source, target) = if i % 2 == 0 { (a, b) } else { (b, a) };
        handles.push(tokio::spawn(async move {
            service
                .make_transfer(Uuid::new_v4(), source, target, money("7"))
                .await
        }));
    }
    for handle in handles {
        let transfer = handle.await.unwrap().unwrap();
        assert!(matches!(
            transfer.status,
            TransferStatus::Completed | TransferStatus::LowBalance
        ));
    }

    let total = service.retrieve_account(a).await.unwrap().balance
        + service.retrieve_account(b).await.unwrap().balance;
    assert_eq!(total, money("100"));
}

#[test_log::test(tokio::test)]
async fn test_redelivered_steps_are_idempotent() {
    let manager = Arc::new(AccountManager::new(Arc::new(InMemoryJournal::new()), config()));
    let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
    let (source, target) = accounts_with_balance(&service, "50").await;

    let transfer_id = Uuid::new_v4();
    service
        .make_transfer(transfer_id, source, target, money("20"))
        .await
        .unwrap();

    // every step of the finished transfer delivered again
    let steps = [
        Delivery::BlockMoney {
            account_id: source,
            transfer_id,
            target_account_id: target,
            amount: money("20"),
        },
        Delivery::DepositMoney {
            account_id: target,
            transfer_id,
            source_account_id: source,
            amount: money("20"),
        },
        Delivery::CompleteTransfer {
            account_id: source,
            transfer_id,
        },
    ];
    let replies = [
        StepReply::MoneyBlocked,
        StepReply::MoneyDeposited,
        StepReply::TransferCompleted,
    ];
    for (step, expected) in steps.iter().zip(replies) {
        let reply = manager.account(step.account_id()).deliver(step).await.unwrap();
        assert_eq!(reply, expected);
    }

    assert_eq!(service.retrieve_account(source).await.unwrap().balance, money("30"));
    assert_eq!(service.retrieve_account(target).await.unwrap().balance, money("20"));
}

#[test_log::test(tokio::test)]
async fn test_duplicate_transfer_id_is_rejected() {
    let manager = Arc::new(AccountManager::new(Arc::new(InMemoryJournal::new()), config()));
    let service = ActorAccountService::new(manager, ServiceTimeouts::default());
    let (source, target) = accounts_with_balance(&service, "50").await;

    let transfer_id = Uuid::new_v4();
    service
        .make_transfer(transfer_id, source, target, money("1"))
        .await
        .unwrap();
    let err = service
        .make_transfer(transfer_id, source, target, money("1"))
        .await
        .unwrap_err();
    assert_eq!(err, AccountError::TransferAlreadyExists(transfer_id));

    // a deposit can not reuse a transfer id either
    let err = service
        .deposit_money(transfer_id, target, money("1"))
        .await
        .unwrap_err();
    assert_eq!(err, AccountError::TransferAlreadyExists(transfer_id));
}

#[test_log::test(tokio::test)]
async fn test_interrupted_transfer_resumes_after_restart() {
    let journal: Arc<dyn Journal> = Arc::new(InMemoryJournal::new());
    let transfer_id = Uuid::new_v4();

    let (source, target) = {
        let manager = Arc::new(AccountManager::new(journal.clone(), config()));
        let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
        let (source, target) = accounts_with_balance(&service, "80").await;

        // the source has blocked the money and the transfer recorded it,
        // then the process stopped before the deposit was delivered
        let reply = manager
            .account(source)
            .deliver(&Delivery::BlockMoney {
                account_id: source,
                transfer_id,
                target_account_id: target,
                amount: money("30"),
            })
            .await
            .unwrap();
        assert_eq!(reply, StepReply::MoneyBlocked);

        let mut transfer: EntityJournal<TransferEvent, TransferState> =
            EntityJournal::new(journal.clone(), transfer_persistence_id(transfer_id), 0);
        transfer
            .persist(&TransferEvent::Started {
                id: transfer_id,
                kind: TransferKind::Transfer,
                source_account_id: source,
                target_account_id: target,
                amount: money("30"),
                time: Utc::now(),
            })
            .await
            .unwrap();
        transfer
            .persist(&TransferEvent::MoneyBlocked { time: Utc::now() })
            .await
            .unwrap();

        manager.shutdown().await;
        (source, target)
    };

    let manager = Arc::new(AccountManager::new(journal, config()));
    assert_eq!(manager.recover_in_flight().await.unwrap(), 1);

    let state = wait_for_finish(&manager, transfer_id).await;
    assert_eq!(state.status, TransferStatus::Completed);
    assert_eq!(state.stage, TransferStage::Completed);
    assert_eq!(manager.retrieve_account(source).await.unwrap().balance, money("50"));
    assert_eq!(manager.retrieve_account(target).await.unwrap().balance, money("30"));

    // finished transfers are not resumed again
    assert_eq!(manager.recover_in_flight().await.unwrap(), 0);
    manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_transfer_on_rocksdb_journal() {
    let dir = tempfile::tempdir().unwrap();
    let journal: Arc<dyn Journal> = Arc::new(RocksJournal::open(dir.path()).unwrap());
    let manager = Arc::new(AccountManager::new(journal.clone(), config()));
    let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
    let (source, target) = accounts_with_balance(&service, "5").await;

    let transfer = service
        .make_transfer(Uuid::new_v4(), source, target, money("5"))
        .await
        .unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);

    // Started, MoneyBlocked, MoneyDeposited, Completed
    let persistence_id = transfer_persistence_id(transfer.id);
    assert_eq!(journal.highest_sequence_nr(&persistence_id).await.unwrap(), 4);
    assert!(journal.load_snapshot(&persistence_id).await.unwrap().is_some());

    manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_balances_survive_rocksdb_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transfer_id = Uuid::new_v4();

    let (source, target) = {
        let journal = reopen(dir.path()).await;
        let manager = Arc::new(AccountManager::new(journal.clone(), config()));
        let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
        let (source, target) = accounts_with_balance(&service, "100.35").await;
        let transfer = service
            .make_transfer(transfer_id, source, target, money("40.125"))
            .await
            .unwrap();
        assert_eq!(transfer.status, TransferStatus::Completed);

        manager.shutdown().await;
        (source, target)
    };

    let journal = reopen(dir.path()).await;

    // Created, MoneyDeposited, MoneyBlocked, TransferCompleted with a snapshot every 3 events
    let persistence_id = account_persistence_id(source);
    let snapshot = journal.load_snapshot(&persistence_id).await.unwrap().unwrap();
    assert_eq!(snapshot.sequence_nr, 3);
    assert!(journal.highest_sequence_nr(&persistence_id).await.unwrap() > snapshot.sequence_nr);

    let manager = Arc::new(AccountManager::new(journal, config()));
    assert_eq!(manager.recover_in_flight().await.unwrap(), 0);
    let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());

    let source_state = service.retrieve_account(source).await.unwrap();
    assert_eq!(source_state.balance, money("60.225"));
    assert!(source_state.current_transfers.is_empty());
    assert_eq!(
        service.retrieve_account(target).await.unwrap().balance,
        money("40.125")
    );
    let transfer = service.retrieve_transfer(transfer_id).await.unwrap();
    assert_eq!(transfer.status, TransferStatus::Completed);
    assert_eq!(transfer.amount, money("40.125"));

    // the used transfer id stays taken after the restart
    let err = service
        .make_transfer(transfer_id, source, target, money("1"))
        .await
        .unwrap_err();
    assert_eq!(err, AccountError::TransferAlreadyExists(transfer_id));

    manager.shutdown().await;
}

#[test_log::test(tokio::test)]
async fn test_interrupted_transfer_resumes_after_rocksdb_restart() {
    let dir = tempfile::tempdir().unwrap();
    let transfer_id = Uuid::new_v4();

    let (source, target) = {
        let journal = reopen(dir.path()).await;
        let manager = Arc::new(AccountManager::new(journal.clone(), config()));
        let service = ActorAccountService::new(manager.clone(), ServiceTimeouts::default());
        let (source, target) = accounts_with_balance(&service, "12.5").await;

        let reply = manager
            .account(source)
            .deliver(&Delivery::BlockMoney {
                account_id: source,
                transfer_id,
                target_account_id: target,
                amount: money("7.75"),
            })
            .await
            .unwrap();
        assert_eq!(reply, StepReply::MoneyBlocked);

        let mut transfer: EntityJournal<TransferEvent, TransferState> =
            EntityJournal::new(journal.clone(), transfer_persistence_id(transfer_id), 0);
        transfer
            .persist(&TransferEvent::Started {
                id: transfer_id,
                kind: TransferKind::Transfer,
                source_account_id: source,
                target_account_id: target,
                amount: money("7.75"),
                time: Utc::now(),
            })
            .await
            .unwrap();
        transfer
            .persist(&TransferEvent::MoneyBlocked { time: Utc::now() })
            .await
            .unwrap();

        manager.shutdown().await;
        (source, target)
    };

    let manager = Arc::new(AccountManager::new(reopen(dir.path()).await, config()));
    assert_eq!(manager.recover_in_flight().await.unwrap(), 1);

    let state = wait_for_finish(&manager, transfer_id).await;
    assert_eq!(state.status, TransferStatus::Completed);
    assert_eq!(manager.retrieve_account(source).await.unwrap().balance, money("4.75"));
    assert_eq!(manager.retrieve_account(target).await.unwrap().balance, money("7.75"));

    manager.shutdown().await;
}
