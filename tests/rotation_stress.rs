//! Concurrency checks: simultaneous cold-start self-initialization,
//! issuance racing rotations, and contested refresh rotation.

mod common;

use common::{build_stack, test_config};
use futures::future::join_all;
use std::sync::Arc;
use token_authority::models::UserInfo;
use uuid::Uuid;

fn user(name: &str) -> UserInfo {
    UserInfo {
        user_id: Uuid::new_v4(),
        username: name.to_string(),
        roles: vec!["User".to_string()],
    }
}

#[tokio::test]
async fn concurrent_cold_start_creates_one_key() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());
    let stack = build_stack(&config).await?;

    // Eight tasks hit an uninitialized store at once; the first through
    // the write lock rotates and the rest reuse its key.
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let keys = Arc::clone(&stack.keys);
            tokio::spawn(async move { keys.current_signing_key().await })
        })
        .collect();

    let mut key_ids = Vec::new();
    for result in join_all(tasks).await {
        key_ids.push(result??.key_id);
    }
    key_ids.sort();
    key_ids.dedup();
    assert_eq!(key_ids.len(), 1);
    assert_eq!(stack.keys.snapshot().await.keys.len(), 1);
    Ok(())
}

#[tokio::test]
async fn issuance_and_validation_race_rotations() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());
    let stack = build_stack(&config).await?;
    stack.keys.rotate_key(None).await?;

    let rotator = {
        let keys = Arc::clone(&stack.keys);
        tokio::spawn(async move {
            for _ in 0..3 {
                keys.rotate_key(None).await?;
            }
            Ok::<_, token_authority::AuthError>(())
        })
    };

    let workers: Vec<_> = (0..6)
        .map(|i| {
            let issuer = Arc::clone(&stack.issuer);
            tokio::spawn(async move {
                let worker_user = user(&format!("user-{}", i));
                for _ in 0..5 {
                    let issued = issuer.issue_access_token(&worker_user).await?;
                    issuer.validate_access_token(&issued.token).await?;
                }
                Ok::<_, token_authority::AuthError>(())
            })
        })
        .collect();

    rotator.await??;
    for worker in join_all(workers).await {
        worker??;
    }

    // Every key minted during the run is unexpired and stays trusted.
    let snapshot = stack.keys.snapshot().await;
    assert_eq!(snapshot.keys.len(), 4);
    assert!(snapshot.current_key_id.is_some());
    Ok(())
}

#[tokio::test]
async fn contested_refresh_rotation_single_winner() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let config = test_config(dir.path());
    let stack = build_stack(&config).await?;

    let alice = user("alice");
    let original = stack.ledger.issue_initial(alice.user_id, "10.0.0.1").await?;

    let tasks: Vec<_> = (0..16)
        .map(|i| {
            let ledger = Arc::clone(&stack.ledger);
            let value = original.token_value.clone();
            tokio::spawn(async move { ledger.rotate(&value, &format!("10.1.0.{}", i)).await })
        })
        .collect();

    let mut winners = Vec::new();
    for result in join_all(tasks).await {
        if let Ok(replacement) = result? {
            winners.push(replacement);
        }
    }
    assert_eq!(winners.len(), 1);

    // The loser attempts wrote nothing: the ledger holds exactly the
    // original and the single winner's replacement.
    let rows = stack.ledger.tokens_for_user(alice.user_id).await?;
    assert_eq!(rows.len(), 2);
    Ok(())
}
