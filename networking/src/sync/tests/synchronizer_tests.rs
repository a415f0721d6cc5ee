use std::time::Duration;

use crate::sync::error::SyncError;
use crate::sync::synchronizer::Synchronizer;

#[tokio::test]
async fn zero_slots_complete_immediately() {
    let (synchronizer, tokens) = Synchronizer::new(0);
    assert!(tokens.is_empty());
    assert_eq!(synchronizer.wait().await, Ok(()));
}

#[tokio::test]
async fn waits_for_every_token() {
    let (synchronizer, mut tokens) = Synchronizer::new(3);

    let waiter = {
        let synchronizer = synchronizer.clone();
        tokio::spawn(async move { synchronizer.wait().await })
    };

    tokens.pop().unwrap().signal(Ok(()));
    tokens.pop().unwrap().signal(Ok(()));
    tokio::task::yield_now().await;
    assert!(!waiter.is_finished());

    tokens.pop().unwrap().signal(Ok(()));
    assert_eq!(waiter.await.unwrap(), Ok(()));
}

#[tokio::test]
async fn first_failure_code_wins() {
    let (synchronizer, mut tokens) = Synchronizer::new(3);

    tokens.pop().unwrap().signal(Ok(()));
    tokens.pop().unwrap().signal(Err(SyncError::Timeout));
    tokens.pop().unwrap().signal(Err(SyncError::Stopped));

    assert_eq!(synchronizer.wait().await, Err(SyncError::Timeout));
}

#[tokio::test]
async fn all_success_reports_success() {
    let (synchronizer, tokens) = Synchronizer::new(4);

    for token in tokens {
        token.signal(Ok(()));
    }

    assert_eq!(synchronizer.wait().await, Ok(()));
}

#[tokio::test]
async fn concurrent_signals_wake_the_waiter_once() {
    let (synchronizer, tokens) = Synchronizer::new(8);

    let waiter = {
        let synchronizer = synchronizer.clone();
        tokio::spawn(async move { synchronizer.wait().await })
    };

    let mut signals = Vec::new();
    for token in tokens {
        signals.push(tokio::spawn(async move {
            token.signal(Ok(()));
        }));
    }

    for signal in signals {
        signal.await.unwrap();
    }

    let result = tokio::time::timeout(Duration::from_secs(5), waiter)
        .await
        .expect("synchronizer never completed")
        .unwrap();
    assert_eq!(result, Ok(()));
}
