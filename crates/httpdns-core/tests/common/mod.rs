//! Test doubles and common utilities for contract tests
//!
//! The scripted transport speaks the plain-text wire format of the resolution
//! service and records every request, so tests can assert on the exact
//! number and targets of outbound resolutions.

#![allow(dead_code)]

use async_trait::async_trait;
use httpdns_core::error::{Error, Result};
use httpdns_core::traits::{HintRanker, Transport, TransportRequest};
use httpdns_core::{
    CacheStore, ConfigHandle, Coordinator, Credentials, HttpDnsConfig, ManualClock,
    ResolverEvent, ServerConfig,
};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

pub const PRIMARY: &str = "primary.test";
pub const BACKUP_1: &str = "backup-1.test";
pub const BACKUP_2: &str = "backup-2.test";

/// How a scripted server reacts to a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMode {
    /// Answer from the scripted answers
    Up,
    /// Fail immediately with a transport error
    Down,
    /// Never answer (the resolver's timeout fires)
    Hang,
    /// Answer with a fixed body, whatever was asked
    Garbage(String),
}

/// One recorded request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub server: String,
    pub domains: Vec<String>,
}

/// Plain-text resolution service double
pub struct ScriptedTransport {
    answers: Mutex<HashMap<String, String>>,
    default_answer: Mutex<String>,
    servers: Mutex<HashMap<String, ServerMode>>,
    delay: Mutex<Duration>,
    calls: Mutex<Vec<Call>>,
    call_count: AtomicUsize,
}

impl ScriptedTransport {
    /// Every server up, every domain answered with `10.0.0.1,600`
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            answers: Mutex::new(HashMap::new()),
            default_answer: Mutex::new("10.0.0.1,600".to_string()),
            servers: Mutex::new(HashMap::new()),
            delay: Mutex::new(Duration::ZERO),
            calls: Mutex::new(Vec::new()),
            call_count: AtomicUsize::new(0),
        })
    }

    /// Body returned for `domain` (single-domain format)
    pub fn set_answer(&self, domain: &str, body: &str) {
        self.answers
            .lock()
            .unwrap()
            .insert(domain.to_string(), body.to_string());
    }

    /// Body returned for domains without a scripted answer
    pub fn set_default_answer(&self, body: &str) {
        *self.default_answer.lock().unwrap() = body.to_string();
    }

    pub fn set_server(&self, server: &str, mode: ServerMode) {
        self.servers
            .lock()
            .unwrap()
            .insert(server.to_string(), mode);
    }

    /// Apply `mode` to the three default servers
    pub fn set_all_servers(&self, mode: ServerMode) {
        for server in [PRIMARY, BACKUP_1, BACKUP_2] {
            self.set_server(server, mode.clone());
        }
    }

    /// Delay before every answer
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn call_count(&self) -> usize {
        self.call_count.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// Servers targeted, in request order
    pub fn servers_called(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.server).collect()
    }

    /// Number of requests that asked for `domain`
    pub fn requests_for(&self, domain: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.domains.iter().any(|d| d == domain))
            .count()
    }

    fn body_for(&self, domains: &[String]) -> String {
        let answers = self.answers.lock().unwrap();
        let default = self.default_answer.lock().unwrap();
        let answer = |d: &String| answers.get(d).cloned().unwrap_or_else(|| default.clone());

        if let [domain] = domains {
            return answer(domain);
        }
        domains
            .iter()
            .map(|d| format!("{}.:{}", d, answer(d)))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&self, request: &TransportRequest, _timeout: Duration) -> Result<Vec<u8>> {
        let domains: Vec<String> = request
            .param("dn")
            .unwrap_or_default()
            .split(',')
            .map(str::to_string)
            .collect();

        self.call_count.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().unwrap().push(Call {
            server: request.server.clone(),
            domains: domains.clone(),
        });

        let mode = self
            .servers
            .lock()
            .unwrap()
            .get(&request.server)
            .cloned()
            .unwrap_or(ServerMode::Up);

        // Answered as of the moment the request arrived
        let body = self.body_for(&domains);

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        match mode {
            ServerMode::Up => Ok(body.into_bytes()),
            ServerMode::Down => Err(Error::transport(format!(
                "connection refused by {}",
                request.server
            ))),
            ServerMode::Hang => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            ServerMode::Garbage(body) => Ok(body.into_bytes()),
        }
    }

    fn transport_name(&self) -> &'static str {
        "scripted"
    }
}

/// Default test configuration: three servers, plain mode
pub fn test_config() -> HttpDnsConfig {
    let mut config = HttpDnsConfig::new(Credentials::new("test-app", 1000, "test-key"), PRIMARY);
    config.servers = ServerConfig::new(PRIMARY).with_backups([BACKUP_1, BACKUP_2]);
    config
}

/// Everything a contract test needs
pub struct Harness {
    pub coordinator: Coordinator,
    pub events: mpsc::Receiver<ResolverEvent>,
    pub transport: Arc<ScriptedTransport>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new(config: HttpDnsConfig) -> Self {
        Self::with_store(config, None)
    }

    pub fn with_store(config: HttpDnsConfig, store: Option<Arc<dyn CacheStore>>) -> Self {
        Self::with_clock(config, store, Arc::new(ManualClock::new()))
    }

    pub fn with_clock(
        config: HttpDnsConfig,
        store: Option<Arc<dyn CacheStore>>,
        clock: Arc<ManualClock>,
    ) -> Self {
        let transport = ScriptedTransport::new();
        let (coordinator, events) = Coordinator::from_parts(
            ConfigHandle::new(config).expect("test config is valid"),
            transport.clone(),
            store,
            clock.clone(),
            Arc::new(HintRanker),
        );

        Self {
            coordinator,
            events,
            transport,
            clock,
        }
    }

    /// Wait until no resolution is in flight
    pub async fn wait_idle(&self) {
        for _ in 0..1000 {
            if self.coordinator.in_flight() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("resolutions still in flight");
    }

    /// Drain every event received so far
    pub fn drain_events(&mut self) -> Vec<ResolverEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Distinct servers in first-seen order
pub fn distinct(servers: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    servers
        .iter()
        .filter(|s| seen.insert(s.to_string()))
        .cloned()
        .collect()
}

pub fn ip(s: &str) -> std::net::IpAddr {
    s.parse().expect("valid IP literal")
}
