//! Minimal embedding example for httpdns-core
//!
//! This example demonstrates using httpdns-core as a library in a custom
//! application. The transport is an in-process service, so the example runs
//! without network access; the primary server starts out down to show
//! failover.

use httpdns_core::traits::{Transport, TransportRequest};
use httpdns_core::{
    Coordinator, Credentials, Error, HttpDnsConfig, NetworkChangeEvent, NetworkKind, Result,
    ServerConfig, StackMode,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// In-process resolution service
struct EmbeddedService {
    zone: HashMap<&'static str, &'static str>,
    primary_up: AtomicBool,
    calls: AtomicUsize,
}

impl EmbeddedService {
    fn new() -> Self {
        Self {
            zone: HashMap::from([
                ("www.example.com", "93.184.216.34;93.184.216.35,600"),
                ("api.example.com", "10.1.0.7,120"),
                ("img.example.com", "10.1.0.9,300"),
            ]),
            primary_up: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    fn answer(&self, domain: &str) -> &'static str {
        self.zone.get(domain).copied().unwrap_or("0")
    }
}

#[async_trait::async_trait]
impl Transport for EmbeddedService {
    async fn send(&self, request: &TransportRequest, _timeout: Duration) -> Result<Vec<u8>> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if request.server == "primary.demo" && !self.primary_up.load(Ordering::SeqCst) {
            return Err(Error::transport("primary.demo is down"));
        }

        let domains: Vec<&str> = request
            .param("dn")
            .unwrap_or_default()
            .split(',')
            .collect();
        println!("[Service] {} <- {:?}", request.server, domains);

        let body = match domains.as_slice() {
            [domain] => self.answer(domain).to_string(),
            many => many
                .iter()
                .map(|domain| format!("{}.:{}", domain, self.answer(domain)))
                .collect::<Vec<_>>()
                .join("\n"),
        };
        Ok(body.into_bytes())
    }

    fn transport_name(&self) -> &'static str {
        "embedded"
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    println!("=== Embedded httpdns-core Example ===\n");

    let mut config = HttpDnsConfig::new(Credentials::new("demo-app", 1000, ""), "primary.demo");
    config.servers = ServerConfig::new("primary.demo").with_backups(["backup.demo"]);
    config.failover.retry_before_switch = 2;
    config.event_channel_capacity = 100;

    let service = Arc::new(EmbeddedService::new());

    println!("1. Creating coordinator...");
    let (coordinator, mut event_rx) = Coordinator::new(config, service.clone(), None)?;

    let event_listener = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            println!("[Event] {:?}", event);
        }
        println!("Event listener stopped");
    });

    println!("2. Single lookup (primary is down, expect a switch)...");
    let ips = coordinator.lookup("www.example.com", StackMode::V4).await?;
    println!("   www.example.com -> {:?}", ips);

    println!("3. Concurrent lookups of one domain share a request...");
    let before = service.calls.load(Ordering::SeqCst);
    let lookups = (0..5).map(|_| {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.lookup("api.example.com", StackMode::V4).await })
    });
    for handle in lookups {
        let _ = handle.await;
    }
    println!(
        "   5 lookups, {} request(s)",
        service.calls.load(Ordering::SeqCst) - before
    );

    println!("4. Batch lookup...");
    let results = coordinator
        .lookup_batch(
            &["www.example.com", "img.example.com", "missing.example.com"],
            StackMode::V4,
        )
        .await;
    let mut results: Vec<_> = results.into_iter().collect();
    results.sort_by(|a, b| a.0.cmp(&b.0));
    for (domain, result) in results {
        match result {
            Ok(ips) => println!("   {} -> {:?}", domain, ips),
            Err(e) => println!("   {} failed: {}", domain, e),
        }
    }

    println!("5. Network change invalidates the cache...");
    service.primary_up.store(true, Ordering::SeqCst);
    let (network_tx, network_rx) = tokio::sync::mpsc::unbounded_channel();
    let watcher = coordinator.watch_network(Box::pin(
        tokio_stream::wrappers::UnboundedReceiverStream::new(network_rx),
    ));
    let _ = network_tx.send(NetworkChangeEvent::new(NetworkKind::Cellular));
    tokio::time::sleep(Duration::from_millis(50)).await;
    println!("   cached entries after change: {}", coordinator.cache().len());

    drop(network_tx);
    let _ = watcher.await;
    drop(coordinator);
    let _ = tokio::time::timeout(Duration::from_millis(100), event_listener).await;

    println!("\n=== Embedding Successful ===");
    println!("Key Points:");
    println!("- The transport is supplied by the application");
    println!("- Concurrent lookups are deduplicated");
    println!("- Failover and cache policy run inside the core");

    Ok(())
}
