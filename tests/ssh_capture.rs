use russh::client::{self, AuthResult};
use russh::keys::ssh_key::rand_core::OsRng;
use russh::keys::ssh_key::Algorithm;
use russh::keys::{PrivateKey, PublicKey};
use snare::configuration::types::ServerConfig;
use snare::configuration::Config;
use snare::data_capture::{CaptureChannel, Received};
use snare::error_handling::types::SessionError;
use snare::session_management::{ExitReason, SessionManager, SessionState};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use uuid::Uuid;

struct AcceptAnyServerKey;

impl client::Handler for AcceptAnyServerKey {
    type Error = russh::Error;

    async fn check_server_key(&mut self, _server_public_key: &PublicKey) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

fn config() -> Config {
    Config {
        server: ServerConfig {
            auth_rejection_time_ms: 0,
            ..ServerConfig::default()
        },
        ..Config::default()
    }
}

fn manager(config: &Config) -> Arc<SessionManager> {
    let key = PrivateKey::random(&mut OsRng, Algorithm::Ed25519).unwrap();
    Arc::new(SessionManager::new(config, key))
}

fn peer() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(198, 51, 100, 23)), 51515)
}

async fn connect(stream: DuplexStream) -> client::Handle<AcceptAnyServerKey> {
    tokio::time::timeout(
        Duration::from_secs(10),
        client::connect_stream(Arc::new(client::Config::default()), stream, AcceptAnyServerKey),
    )
    .await
    .expect("handshake in time")
    .expect("handshake")
}

/// Tries every password in turn; the server may hang up right after the last one.
async fn try_passwords(handle: &mut client::Handle<AcceptAnyServerKey>, user: &str, passwords: &[&str]) {
    for password in passwords {
        match handle.authenticate_password(user, *password).await {
            Ok(AuthResult::Success) => panic!("honeypot granted access"),
            Ok(AuthResult::Failure { .. }) => {}
            Err(_) => break,
        }
    }
}

#[tokio::test]
async fn test_three_wrong_passwords_are_captured_and_denied() {
    let _ = env_logger::builder().is_test(true).try_init();
    let config = config();
    let manager = manager(&config);
    let (server_side, client_side) = tokio::io::duplex(64 * 1024);
    let (sender, mut receiver) = CaptureChannel::create(&config.capture);

    let served = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.serve(Uuid::new_v4(), server_side, peer(), sender).await })
    };

    let mut handle = connect(client_side).await;
    try_passwords(&mut handle, "admin", &["123456", "p\"\\w", ""]).await;

    let outcome = tokio::time::timeout(Duration::from_secs(15), served)
        .await
        .expect("session ended in time")
        .unwrap()
        .unwrap();
    drop(handle);

    assert_eq!(outcome.reason, ExitReason::AttemptsExhausted);
    assert_eq!(outcome.attempts, 3);
    assert_eq!(outcome.history[1], SessionState::Denied);
    assert!(matches!(
        outcome.final_state,
        SessionState::Closed | SessionState::ForceAborted
    ));

    let mut records = Vec::new();
    loop {
        match tokio::time::timeout(Duration::from_secs(5), receiver.receive(None))
            .await
            .expect("channel drained in time")
            .unwrap()
        {
            Received::Record(record) => records.push(record),
            Received::Closed => break,
            Received::Timeout => unreachable!("no timeout was requested"),
        }
    }

    assert_eq!(records.len(), 3);
    assert!(records.iter().all(|r| r.username == b"admin".to_vec()));
    assert_eq!(records[1].password, b"p\"\\w".to_vec());
    assert_eq!(records[2].password, Vec::<u8>::new());
    assert_eq!(
        records.iter().map(|r| r.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
}

#[tokio::test]
async fn test_session_report_counts_captured_records() {
    let config = config();
    let manager = manager(&config);
    let (server_side, client_side) = tokio::io::duplex(64 * 1024);

    let served = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.handle_session(server_side, peer()).await })
    };

    let mut handle = connect(client_side).await;
    try_passwords(&mut handle, "root", &["root", "toor", "raspberry"]).await;

    let report = tokio::time::timeout(Duration::from_secs(20), served)
        .await
        .expect("session ended in time")
        .unwrap();
    drop(handle);

    assert_eq!(report.exit_reason, Some(ExitReason::AttemptsExhausted));
    assert_eq!(report.attempts, 3);
    assert_eq!(report.captured, 3);
    assert!(report.error.is_none());
    assert_eq!(manager.get_active_session_count(), 0);
}

#[tokio::test]
async fn test_client_leaving_early_ends_session() {
    let config = config();
    let manager = manager(&config);
    let (server_side, client_side) = tokio::io::duplex(64 * 1024);
    let (sender, mut receiver) = CaptureChannel::create(&config.capture);

    let served = {
        let manager = Arc::clone(&manager);
        tokio::spawn(async move { manager.serve(Uuid::new_v4(), server_side, peer(), sender).await })
    };

    let mut handle = connect(client_side).await;
    try_passwords(&mut handle, "pi", &["raspberry"]).await;
    drop(handle);

    let result = tokio::time::timeout(Duration::from_secs(15), served)
        .await
        .expect("session ended in time")
        .unwrap();
    match result {
        Ok(outcome) => {
            assert_eq!(outcome.reason, ExitReason::PeerDisconnected);
            assert_eq!(outcome.attempts, 1);
        }
        Err(e) => assert!(matches!(e, SessionError::ProtocolFatal(_))),
    }

    match receiver.receive(Some(Duration::from_secs(5))).await.unwrap() {
        Received::Record(record) => {
            assert_eq!(record.username, b"pi".to_vec());
            assert_eq!(record.attempt, 1);
        }
        other => panic!("expected the captured attempt, got {:?}", other),
    }
}
