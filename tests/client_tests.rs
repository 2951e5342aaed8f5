#![cfg(feature = "server")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use tokio::net::TcpListener;

use keycheck::admin::{AdminService, AdminSettings, SecretMode};
use keycheck::client::{spawn_revalidation, CheckOutcome, LicenseClient, RevalidationFailure};
use keycheck::clock::{Clock, SystemClock};
use keycheck::server::{build_router, AppState};
use keycheck::store::{LicenseStore, MemoryStore};
use keycheck::validation::{ValidationService, ValidationSettings};

const ADMIN_KEY: &str = "client-test-admin";

/// Spin up a keycheck server on a random port and return its base URL and
/// the admin service backing it.
async fn spawn_test_server() -> (String, Arc<AdminService>) {
    let store: Arc<dyn LicenseStore> = Arc::new(MemoryStore::new());
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let admin = Arc::new(AdminService::new(
        store.clone(),
        clock.clone(),
        AdminSettings {
            admin_key: ADMIN_KEY.to_string(),
            secret_mode: SecretMode::PerLicense,
        },
    ));
    let validation = ValidationService::new(store.clone(), clock, ValidationSettings::default());

    let router = build_router(AppState {
        validation: Arc::new(validation),
        admin: admin.clone(),
        store,
        db_type: "memory".to_string(),
    });

    let listener = TcpListener::bind(SocketAddr::from(([127, 0, 0, 1], 0)))
        .await
        .expect("failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("server failed");
    });

    (format!("http://{}", addr), admin)
}

#[tokio::test]
async fn client_counts_down_then_is_rejected() {
    let (base_url, admin) = spawn_test_server().await;
    let license = admin
        .create_license(Some(ADMIN_KEY), Some("L1"), Some(1), Some(2))
        .await
        .unwrap();
    let client = LicenseClient::new(base_url, "L1", license.secret.unwrap());

    match client.check().await.unwrap() {
        CheckOutcome::Active {
            checks_remaining,
            valid_until,
        } => {
            assert_eq!(checks_remaining, 1);
            assert_eq!(valid_until, license.valid_until);
        }
        other => panic!("expected active, got {other:?}"),
    }
    assert!(client.check().await.unwrap().is_active());

    assert_eq!(
        client.check().await.unwrap(),
        CheckOutcome::Rejected {
            status: 429,
            code: Some("TOO_MANY_REQUESTS".to_string()),
        }
    );
}

#[tokio::test]
async fn wrong_secret_is_rejected_with_forbidden() {
    let (base_url, admin) = spawn_test_server().await;
    admin
        .create_license(Some(ADMIN_KEY), Some("L1"), Some(1), Some(2))
        .await
        .unwrap();
    let client = LicenseClient::new(base_url, "L1", "guessed");

    assert_eq!(
        client.check().await.unwrap(),
        CheckOutcome::Rejected {
            status: 403,
            code: Some("INVALID_OR_EXPIRED".to_string()),
        }
    );
}

#[tokio::test]
async fn revalidation_stops_on_first_rejection() {
    let (base_url, admin) = spawn_test_server().await;
    let license = admin
        .create_license(Some(ADMIN_KEY), Some("L1"), Some(1), Some(3))
        .await
        .unwrap();
    let client = LicenseClient::new(base_url, "L1", license.secret.unwrap());

    let (tx, rx) = tokio::sync::oneshot::channel();
    let handle = spawn_revalidation(client, StdDuration::from_millis(20), move |failure| {
        let _ = tx.send(failure);
    });

    let failure = tokio::time::timeout(StdDuration::from_secs(5), rx)
        .await
        .expect("revalidation did not stop")
        .unwrap();
    assert_eq!(
        failure,
        RevalidationFailure::Rejected {
            status: 429,
            code: Some("TOO_MANY_REQUESTS".to_string()),
        }
    );
    handle.await.unwrap();
}
