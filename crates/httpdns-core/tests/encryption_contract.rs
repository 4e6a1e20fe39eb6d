//! Contract Test: Payload Protection
//!
//! In symmetric mode the domain list leaves the process sealed and the
//! answer comes back sealed; in signed-token mode every request carries a
//! verifiable signature. A service answering with the wrong key is a soft
//! failure like any other malformed answer.

mod common;

use async_trait::async_trait;
use common::*;
use httpdns_core::error::{Error, Result};
use httpdns_core::resolver::cipher::PayloadCipher;
use httpdns_core::traits::{HintRanker, Scheme, Transport, TransportRequest};
use httpdns_core::{ConfigHandle, Coordinator, Credentials, EncryptionMode, ManualClock, StackMode};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Service double that opens sealed requests and seals its answers
struct SealedService {
    cipher: PayloadCipher,
    seen: Mutex<Vec<TransportRequest>>,
}

#[async_trait]
impl Transport for SealedService {
    async fn send(&self, request: &TransportRequest, _timeout: Duration) -> Result<Vec<u8>> {
        self.seen.lock().unwrap().push(request.clone());

        let dn = request
            .param("dn")
            .ok_or_else(|| Error::transport("missing dn"))?;
        let domain = self.cipher.open(dn.as_bytes())?;
        let body = match domain.as_str() {
            "secure.example.com" => "10.9.8.7,300",
            _ => "0",
        };
        Ok(self.cipher.seal(body)?.into_bytes())
    }

    fn transport_name(&self) -> &'static str {
        "sealed"
    }
}

fn coordinator(
    mode: EncryptionMode,
    service_key: &str,
) -> (Coordinator, Arc<SealedService>) {
    let credentials = Credentials::new("test-app", 1000, "shared-key").with_token("token-1");
    let mut config = test_config();
    config.credentials = credentials;
    config.encryption = mode;

    let service = Arc::new(SealedService {
        cipher: PayloadCipher::new(
            &Credentials::new("test-app", 1000, service_key).with_token("token-1"),
            mode,
        ),
        seen: Mutex::new(Vec::new()),
    });

    let (coordinator, _events) = Coordinator::from_parts(
        ConfigHandle::new(config).unwrap(),
        service.clone(),
        None,
        Arc::new(ManualClock::new()),
        Arc::new(HintRanker),
    );
    (coordinator, service)
}

#[tokio::test]
async fn symmetric_mode_round_trips_through_the_service() {
    let (coordinator, service) = coordinator(EncryptionMode::Symmetric, "shared-key");

    let ips = coordinator
        .lookup("secure.example.com", StackMode::V4)
        .await
        .unwrap();
    assert_eq!(ips, vec![ip("10.9.8.7")]);

    let seen = service.seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_ne!(seen[0].param("dn"), Some("secure.example.com"));
    assert_eq!(seen[0].scheme, Scheme::Http);
}

#[tokio::test]
async fn wrong_key_is_a_soft_failure_on_every_server() {
    let (coordinator, service) = coordinator(EncryptionMode::Symmetric, "other-key");

    let result = coordinator.lookup("secure.example.com", StackMode::V4).await;
    assert!(matches!(result, Err(Error::NoCachedFallback { .. })));
    assert_eq!(service.seen.lock().unwrap().len(), 9);
}

#[tokio::test]
async fn signed_token_requests_are_authenticated() {
    let (coordinator, service) = coordinator(EncryptionMode::SignedToken, "shared-key");

    coordinator
        .lookup("secure.example.com", StackMode::V4)
        .await
        .unwrap();

    let seen = service.seen.lock().unwrap();
    let request = &seen[0];
    assert_eq!(request.scheme, Scheme::Https);
    assert_eq!(request.param("dn"), Some("secure.example.com"));
    assert_eq!(request.param("token"), Some("token-1"));

    let ts: i64 = request.param("ts").unwrap().parse().unwrap();
    let expected = service
        .cipher
        .sign("secure.example.com", 1000, ts)
        .unwrap()
        .unwrap();
    assert_eq!(request.param("sig"), Some(expected.signature.as_str()));
}
