//! Challenge issuance, expiry and cleanup.

mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use common::*;
use devattest_core::store::Challenge;
use devattest_core::{AttestError, AttestationPayload, ChallengeStore, Platform};

#[tokio::test]
async fn test_expired_challenge_is_rejected() {
    let ca = TestCa::new();
    let h = Harness::new(&ca, None);

    let token = Uuid::new_v4();
    h.challenges
        .create(Challenge {
            token,
            raw_bytes: vec![1u8; 32],
            platform: Platform::Ios,
            expires_at: Utc::now() - Duration::seconds(1),
        })
        .await
        .unwrap();

    let payload = AttestationPayload {
        challenge_token: token.to_string(),
        key_id: Some("AAAA".into()),
        attestation: Some("AAAA".into()),
        ..Default::default()
    };
    let err = h.verifier.verify(Platform::Ios, &payload).await.unwrap_err();
    assert!(matches!(err, AttestError::ChallengeInvalid));
}

#[tokio::test]
async fn test_issued_challenges_are_distinct() {
    let ca = TestCa::new();
    let h = Harness::new(&ca, None);

    let a = h.verifier.issue_challenge(Platform::Ios).await.unwrap();
    let b = h.verifier.issue_challenge(Platform::Ios).await.unwrap();
    assert_ne!(a.token, b.token);
    assert_ne!(a.client_challenge, b.client_challenge);
    assert!(a.expires_at > Utc::now());
    assert_eq!(h.challenges.len(), 2);
}

#[tokio::test]
async fn test_cleanup_removes_only_expired() {
    let ca = TestCa::new();
    let h = Harness::new(&ca, None);

    h.verifier.issue_challenge(Platform::Android).await.unwrap();
    for _ in 0..3 {
        h.challenges
            .create(Challenge {
                token: Uuid::new_v4(),
                raw_bytes: vec![0u8; 32],
                platform: Platform::Android,
                expires_at: Utc::now() - Duration::minutes(1),
            })
            .await
            .unwrap();
    }

    assert_eq!(h.verifier.cleanup_expired().await.unwrap(), 3);
    assert_eq!(h.challenges.len(), 1);
}

#[tokio::test]
async fn test_concurrent_verification_consumes_once() {
    let ca = TestCa::new();
    let h = Arc::new(Harness::new(&ca, None));
    let issued = h.verifier.issue_challenge(Platform::Web).await.unwrap();

    let payload = AttestationPayload {
        challenge_token: issued.token.to_string(),
        ..Default::default()
    };

    let mut handles = Vec::new();
    for _ in 0..8 {
        let h = h.clone();
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            h.verifier.verify(Platform::Web, &payload).await
        }));
    }

    let mut consumed = 0;
    for handle in handles {
        match handle.await.unwrap() {
            // Web consumes the challenge then stops at dispatch
            Err(AttestError::UnsupportedPlatform(_)) => consumed += 1,
            Err(AttestError::ChallengeInvalid) => {}
            other => panic!("unexpected result: {other:?}"),
        }
    }
    assert_eq!(consumed, 1);
}
