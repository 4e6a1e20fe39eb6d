// # httpdnsd - HTTPDNS Daemon
//
// Thin integration layer over httpdns-core. All resolution, caching and
// failover logic lives in the core; this binary only:
// 1. Reads configuration from environment variables
// 2. Initializes logging and the runtime
// 3. Wires the HTTP transport, the cache store and the coordinator
// 4. Pre-resolves, answers the requested lookups, keeps the keepalive set
//    warm until SIGINT/SIGTERM
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Service
// - `HTTPDNS_DNS_ID`: Numeric account id (required)
// - `HTTPDNS_APP_ID`: Application id
// - `HTTPDNS_DNS_KEY`: Shared key (required for symmetric / signed_token)
// - `HTTPDNS_TOKEN`: Access token (required for signed_token)
// - `HTTPDNS_ENCRYPTION`: plain, symmetric or signed_token (default plain)
// - `HTTPDNS_SERVERS`: Comma-separated servers, primary first (required)
// - `HTTPDNS_USE_HTTPS`: true/false
//
// ### Resolution
// - `HTTPDNS_TIMEOUT_MS`: Per-attempt timeout
// - `HTTPDNS_LOOKUP_TIMEOUT_MS`: How long a lookup waits for a resolution
// - `HTTPDNS_RETRY_BEFORE_SWITCH`: Failures before switching server
// - `HTTPDNS_SWITCH_BACK_MINUTES`: Cool-down before returning to the primary
// - `HTTPDNS_STACK`: v4, v6 or dual (default v4)
// - `HTTPDNS_ROUTE_IP`: Client IP forwarded to the service
// - `HTTPDNS_LOCAL_DNS_FALLBACK`: true/false
//
// ### Cache
// - `HTTPDNS_EXPIRED_IP`: Serve expired records when resolution fails
// - `HTTPDNS_EXPIRED_IP_GRACE_SECS`: Bound on how long past expiry
// - `HTTPDNS_CACHE_PATH`: Persist the cache to this file
//
// ### Domains
// - `HTTPDNS_PRE_RESOLVE`: Comma-separated domains resolved at startup
// - `HTTPDNS_KEEPALIVE`: Comma-separated `domain[:stack]` entries
// - `HTTPDNS_KEEPALIVE_INTERVAL_SECS`: Keepalive cadence
// - `HTTPDNS_LOOKUP`: Comma-separated domains to resolve and print
//
// ## Example
//
// ```bash
// export HTTPDNS_DNS_ID=1000
// export HTTPDNS_DNS_KEY=your_key
// export HTTPDNS_ENCRYPTION=symmetric
// export HTTPDNS_SERVERS=119.29.29.98,119.28.28.98
// export HTTPDNS_KEEPALIVE=api.example.com,img.example.com:dual
// export HTTPDNS_CACHE_PATH=/var/lib/httpdns/cache.json
//
// httpdnsd www.example.com
// ```

use anyhow::Result;
use httpdns_core::{
    Coordinator, Credentials, EncryptionMode, HttpDnsConfig, KeepaliveDomain, KeepaliveScheduler,
    ServerConfig, StackMode,
};
use std::env;
use std::net::IpAddr;
use std::process::ExitCode;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{Level, debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[cfg(unix)]
use tokio::signal::unix::{SignalKind, signal};

/// Exit codes for different termination scenarios
///
/// These codes follow systemd conventions:
/// - 0: Clean shutdown
/// - 1: Configuration or startup error
/// - 2: Runtime error (unexpected)
#[derive(Debug, Clone, Copy)]
enum HttpDnsExitCode {
    /// Clean shutdown (normal exit)
    CleanShutdown = 0,
    /// Configuration error or startup failure
    ConfigError = 1,
    /// Runtime error (unexpected failure)
    RuntimeError = 2,
}

impl From<HttpDnsExitCode> for ExitCode {
    fn from(code: HttpDnsExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

/// Daemon settings
struct Settings {
    config: HttpDnsConfig,
    lookups: Vec<String>,
    log_level: String,
}

impl Settings {
    /// Load settings from environment variables and arguments
    fn from_env() -> Result<Self> {
        let dns_id: u32 = parse_env("HTTPDNS_DNS_ID")?.ok_or_else(|| {
            anyhow::anyhow!(
                "HTTPDNS_DNS_ID is required. Set it via: export HTTPDNS_DNS_ID=your_account_id"
            )
        })?;

        let mut credentials = Credentials::new(
            env::var("HTTPDNS_APP_ID").unwrap_or_default(),
            dns_id,
            env::var("HTTPDNS_DNS_KEY").unwrap_or_default(),
        );
        if let Ok(token) = env::var("HTTPDNS_TOKEN") {
            credentials = credentials.with_token(token);
        }

        let servers = list_env("HTTPDNS_SERVERS");
        let Some((primary, backups)) = servers.split_first() else {
            anyhow::bail!(
                "HTTPDNS_SERVERS must list at least one server. \
                Set it via: export HTTPDNS_SERVERS=119.29.29.98,119.28.28.98"
            );
        };

        let mut config = HttpDnsConfig::new(credentials, primary.clone());
        config.servers = ServerConfig::new(primary.clone()).with_backups(backups.iter().cloned());
        config.servers.use_https = parse_env("HTTPDNS_USE_HTTPS")?.unwrap_or(false);

        config.encryption = match env::var("HTTPDNS_ENCRYPTION")
            .unwrap_or_else(|_| "plain".to_string())
            .to_lowercase()
            .as_str()
        {
            "plain" => EncryptionMode::Plain,
            "symmetric" => EncryptionMode::Symmetric,
            "signed_token" => EncryptionMode::SignedToken,
            other => anyhow::bail!(
                "HTTPDNS_ENCRYPTION '{}' is not supported. \
                Supported modes: plain, symmetric, signed_token",
                other
            ),
        };

        if let Some(timeout) = parse_env("HTTPDNS_TIMEOUT_MS")? {
            config.timeout_ms = timeout;
        }
        if let Some(timeout) = parse_env("HTTPDNS_LOOKUP_TIMEOUT_MS")? {
            config.lookup_timeout_ms = timeout;
        }
        if let Some(retries) = parse_env("HTTPDNS_RETRY_BEFORE_SWITCH")? {
            config.failover.retry_before_switch = retries;
        }
        if let Some(minutes) = parse_env("HTTPDNS_SWITCH_BACK_MINUTES")? {
            config.failover.switch_back_minutes = minutes;
        }
        if let Some(stack) = parse_env::<StackMode>("HTTPDNS_STACK")? {
            config.default_stack = stack;
        }
        config.route_ip = parse_env::<IpAddr>("HTTPDNS_ROUTE_IP")?;
        config.local_dns_fallback = parse_env("HTTPDNS_LOCAL_DNS_FALLBACK")?.unwrap_or(false);

        config.cache.expired_ip_enabled = parse_env("HTTPDNS_EXPIRED_IP")?.unwrap_or(false);
        config.cache.expired_ip_grace_secs = parse_env("HTTPDNS_EXPIRED_IP_GRACE_SECS")?;
        if let Ok(path) = env::var("HTTPDNS_CACHE_PATH") {
            config.cache.persist_enabled = true;
            config.cache.persist_path = Some(path);
        }

        config.pre_resolve = list_env("HTTPDNS_PRE_RESOLVE");

        let keepalive = list_env("HTTPDNS_KEEPALIVE");
        config.keepalive.enabled = !keepalive.is_empty();
        config.keepalive.domains = keepalive
            .iter()
            .map(|entry| parse_keepalive_entry(entry, config.default_stack))
            .collect::<Result<_>>()?;
        if let Some(interval) = parse_env("HTTPDNS_KEEPALIVE_INTERVAL_SECS")? {
            config.keepalive.interval_secs = interval;
        }

        let mut lookups = list_env("HTTPDNS_LOOKUP");
        lookups.extend(env::args().skip(1));

        Ok(Self {
            config,
            lookups,
            log_level: env::var("HTTPDNS_LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Validate the settings
    ///
    /// Range checks with actionable messages first, then the core's own
    /// validation of the assembled configuration.
    fn validate(&self) -> Result<()> {
        if !(100..=60_000).contains(&self.config.timeout_ms) {
            anyhow::bail!(
                "HTTPDNS_TIMEOUT_MS must be between 100 and 60000. Got: {}",
                self.config.timeout_ms
            );
        }

        if !(1..=10).contains(&self.config.failover.retry_before_switch) {
            anyhow::bail!(
                "HTTPDNS_RETRY_BEFORE_SWITCH must be between 1 and 10. Got: {}",
                self.config.failover.retry_before_switch
            );
        }

        if self.config.keepalive.enabled && !(10..=3600).contains(&self.config.keepalive.interval_secs)
        {
            anyhow::bail!(
                "HTTPDNS_KEEPALIVE_INTERVAL_SECS must be between 10 and 3600 seconds. Got: {}",
                self.config.keepalive.interval_secs
            );
        }

        if let Some(path) = self.config.cache.persist_path.as_deref()
            && let Some(parent) = std::path::Path::new(path).parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            anyhow::bail!(
                "HTTPDNS_CACHE_PATH parent directory does not exist: {}. \
                Create it first: sudo mkdir -p {}",
                parent.display(),
                parent.display()
            );
        }

        if !self.config.servers.use_https && self.config.encryption == EncryptionMode::Plain {
            eprintln!(
                "WARNING: plain mode over HTTP sends domain names in clear text. \
                Consider HTTPDNS_ENCRYPTION=symmetric or HTTPDNS_USE_HTTPS=true."
            );
        }

        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!(
                "HTTPDNS_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }

        self.config.validate()?;
        Ok(())
    }
}

/// Parse an optional environment variable
fn parse_env<T>(name: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("{} has an invalid value '{}': {}", name, raw, e)),
        Err(_) => Ok(None),
    }
}

/// Comma-separated environment variable
fn list_env(name: &str) -> Vec<String> {
    env::var(name)
        .unwrap_or_default()
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// `domain[:stack]`
fn parse_keepalive_entry(entry: &str, default_stack: StackMode) -> Result<KeepaliveDomain> {
    match entry.split_once(':') {
        Some((domain, stack)) => {
            let stack = stack.parse::<StackMode>().map_err(|e| {
                anyhow::anyhow!("HTTPDNS_KEEPALIVE entry '{}' has a bad stack: {}", entry, e)
            })?;
            Ok(KeepaliveDomain::new(domain.trim(), stack))
        }
        None => Ok(KeepaliveDomain::new(entry, default_stack)),
    }
}

fn main() -> ExitCode {
    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return HttpDnsExitCode::ConfigError.into();
        }
    };

    if let Err(e) = settings.validate() {
        eprintln!("Configuration validation error: {}", e);
        return HttpDnsExitCode::ConfigError.into();
    }

    let log_level = match settings.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder().with_max_level(log_level).finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return HttpDnsExitCode::ConfigError.into();
    }

    info!("Starting httpdnsd daemon");
    info!(
        "Configuration loaded: {} server(s), {} keepalive domain(s)",
        settings.config.servers.all().len(),
        settings.config.keepalive.domains.len()
    );

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return HttpDnsExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        if let Err(e) = run_daemon(settings).await {
            error!("Daemon error: {}", e);
            HttpDnsExitCode::RuntimeError
        } else {
            HttpDnsExitCode::CleanShutdown
        }
    });

    result.into()
}

/// Run the daemon
async fn run_daemon(settings: Settings) -> Result<()> {
    let Settings {
        config, lookups, ..
    } = settings;

    let transport = build_transport()?;

    let store: Option<Arc<dyn httpdns_core::CacheStore>> = match config.cache.persist_path.as_deref() {
        Some(path) => {
            info!("Persisting cache to {}", path);
            Some(Arc::new(httpdns_core::FileCacheStore::new(path).await?))
        }
        None => None,
    };

    let stack = config.default_stack;
    let keepalive_enabled = config.keepalive.enabled;
    let (coordinator, mut events) = Coordinator::new(config, transport, store)?;

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("Event: {:?}", event);
        }
    });

    match coordinator.load_persisted().await {
        Ok(count) if count > 0 => info!("Restored {} cached record(s)", count),
        Ok(_) => {}
        Err(e) => warn!("Failed to restore persisted cache: {}", e),
    }

    coordinator.pre_resolve().await;

    if !lookups.is_empty() {
        let mut results: Vec<_> = coordinator
            .lookup_batch(&lookups, stack)
            .await
            .into_iter()
            .collect();
        results.sort_by(|a, b| a.0.cmp(&b.0));

        for (domain, result) in results {
            match result {
                Ok(ips) => {
                    let ips: Vec<String> = ips.iter().map(ToString::to_string).collect();
                    println!("{} {}", domain, ips.join(" "));
                }
                Err(e) => warn!("{}: {}", domain, e),
            }
        }
    }

    if !keepalive_enabled {
        coordinator.flush().await?;
        info!("Nothing to keep warm, exiting");
        return Ok(());
    }

    let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel();
    let scheduler = KeepaliveScheduler::new(coordinator.clone());
    let keepalive = tokio::spawn(async move {
        scheduler.run_with_shutdown(Some(shutdown_rx)).await;
    });

    info!("Daemon initialized successfully");

    let signal = wait_for_shutdown().await?;
    info!("Received shutdown signal: {}", signal);

    let _ = shutdown_tx.send(());
    if let Err(e) = keepalive.await {
        warn!("Keepalive task ended abnormally: {}", e);
    }

    coordinator.flush().await?;
    info!("Cache flushed, daemon stopped");
    Ok(())
}

#[cfg(feature = "http")]
fn build_transport() -> Result<Arc<dyn httpdns_core::Transport>> {
    info!("Using HTTP transport");
    Ok(Arc::new(httpdns_transport_http::HttpTransport::new()?))
}

#[cfg(not(feature = "http"))]
fn build_transport() -> Result<Arc<dyn httpdns_core::Transport>> {
    anyhow::bail!("httpdnsd was built without a transport. Enable the `http` feature.")
}

/// Wait for shutdown signals (SIGTERM, SIGINT)
///
/// # Returns
///
/// Returns the name of the signal received.
#[cfg(unix)]
async fn wait_for_shutdown() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGTERM handler: {}", e))?;
    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to setup SIGINT handler: {}", e))?;

    let signal = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(signal)
}

/// Wait for shutdown signals (SIGINT only)
///
/// Fallback implementation for non-Unix platforms.
#[cfg(not(unix))]
async fn wait_for_shutdown() -> Result<&'static str> {
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to wait for CTRL-C: {}", e))?;
    Ok("SIGINT")
}
