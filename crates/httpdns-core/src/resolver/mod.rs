//! Remote resolution with server failover
//!
//! The [`Resolver`] turns a set of domains into [`ResolutionRecord`]s by
//! talking to the resolution service through a [`Transport`]. Every attempt
//! targets the active server of the shared [`FailoverState`] and is bounded
//! by the per-attempt timeout. Soft failures (timeout, malformed or empty
//! answer, transport error) count against the active server and move the
//! pool to the next server once the threshold is reached.
//!
//! The resolver does not cache anything; that is the coordinator's job.

pub mod cipher;
pub mod codec;
pub mod failover;

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::clock::Clock;
use crate::config::{ConfigHandle, HttpDnsConfig};
use crate::error::{Error, Result};
use crate::events::{EventSink, ResolverEvent};
use crate::record::{ResolutionRecord, StackMode};
use crate::traits::{IpRanker, Transport};

use cipher::PayloadCipher;
use codec::Answer;
use failover::{FailoverState, FailureOutcome};

/// Per-domain outcome of a batch resolution
pub type BatchOutcome = HashMap<String, Result<ResolutionRecord>>;

/// Resolves domains against the configured server pool
pub struct Resolver {
    config: ConfigHandle,
    transport: Arc<dyn Transport>,
    ranker: Arc<dyn IpRanker>,
    clock: Arc<dyn Clock>,
    events: EventSink,
    failover: Mutex<FailoverState>,
}

impl Resolver {
    /// Create a resolver
    ///
    /// # Parameters
    ///
    /// - `config`: Shared configuration; each attempt reads a fresh snapshot
    /// - `transport`: Request/response primitive towards the service
    /// - `ranker`: Orders the returned addresses
    /// - `clock`: Time source for records and failover cool-down
    /// - `events`: Event sink for server switches
    pub fn new(
        config: ConfigHandle,
        transport: Arc<dyn Transport>,
        ranker: Arc<dyn IpRanker>,
        clock: Arc<dyn Clock>,
        events: EventSink,
    ) -> Self {
        let servers = config.snapshot().servers.all();
        Self {
            config,
            transport,
            ranker,
            clock,
            events,
            failover: Mutex::new(FailoverState::new(servers)),
        }
    }

    /// Resolve one normalized domain
    pub async fn resolve(&self, domain: &str, stack: StackMode) -> Result<ResolutionRecord> {
        let domains = [domain.to_string()];
        let mut outcome = self.resolve_chunk(&domains, stack).await?;
        outcome
            .remove(domain)
            .unwrap_or_else(|| Err(Error::malformed(format!("no answer for {}", domain))))
    }

    /// Resolve several normalized domains
    ///
    /// Domains are sent `batch_size` at a time. When a whole batch fails,
    /// every domain in it gets the batch error. Every input domain has an
    /// entry in the result.
    pub async fn resolve_batch(&self, domains: &[String], stack: StackMode) -> BatchOutcome {
        let mut unique: Vec<String> = Vec::with_capacity(domains.len());
        for domain in domains {
            if !unique.contains(domain) {
                unique.push(domain.clone());
            }
        }

        let batch_size = self.config.snapshot().batch_size.max(1);
        let mut results = HashMap::with_capacity(unique.len());

        for chunk in unique.chunks(batch_size) {
            match self.resolve_chunk(chunk, stack).await {
                Ok(outcome) => results.extend(outcome),
                Err(e) => {
                    for domain in chunk {
                        results.insert(domain.clone(), Err(replicate(&e)));
                    }
                }
            }
        }

        results
    }

    /// Copy of the current failover state
    pub fn failover_state(&self) -> FailoverState {
        self.failover.lock().clone()
    }

    /// Server the next attempt would target
    pub fn active_server(&self) -> String {
        let config = self.config.snapshot();
        let mut failover = self.failover.lock();
        failover.sync_servers(&config.servers.all());
        failover
            .active_server(self.clock.now(), config.failover.switch_back_after())
            .1
    }

    /// One logical resolution: attempts until success or the pool is spent
    async fn resolve_chunk(&self, domains: &[String], stack: StackMode) -> Result<BatchOutcome> {
        let mut attempts: u32 = 0;

        loop {
            let config = self.config.snapshot();
            let servers = config.servers.all();
            let threshold = config.failover.retry_before_switch.max(1);
            let max_attempts = threshold.saturating_mul(servers.len() as u32);

            if attempts >= max_attempts {
                error!(
                    "All servers exhausted resolving {} after {} attempt(s)",
                    domains.join(","),
                    attempts
                );
                return Err(Error::AllServersExhausted { attempts });
            }

            let (index, server) = self.select_server(&config, &servers);
            attempts += 1;

            match self.attempt(&config, &server, domains, stack).await {
                Ok(answers) => {
                    self.failover.lock().record_success(index);
                    debug!(
                        "Attempt {} against {} answered {} domain(s)",
                        attempts,
                        server,
                        answers.len()
                    );
                    return Ok(self.build_records(&config, answers, stack));
                }
                Err(e) if e.is_soft_failure() => {
                    warn!("Attempt {} against {} failed: {}", attempts, server, e);
                    let outcome = self
                        .failover
                        .lock()
                        .record_failure(index, self.clock.now(), threshold);
                    if let FailureOutcome::Switched { from, to } = outcome {
                        info!(
                            "Switching from {} to {} after {} consecutive failure(s)",
                            from, to, threshold
                        );
                        self.events.emit(ResolverEvent::ServerSwitched {
                            from,
                            to,
                            failures: threshold,
                        });
                    }
                }
                Err(e) => {
                    error!("Resolution of {} aborted: {}", domains.join(","), e);
                    return Err(e);
                }
            }
        }
    }

    fn select_server(&self, config: &HttpDnsConfig, servers: &[String]) -> (usize, String) {
        let mut failover = self.failover.lock();
        failover.sync_servers(servers);

        let was_on_backup = failover.active_index() != 0;
        let (index, server) =
            failover.active_server(self.clock.now(), config.failover.switch_back_after());

        if was_on_backup && index == 0 {
            self.events.emit(ResolverEvent::SwitchedBackToPrimary {
                server: server.clone(),
            });
        }
        (index, server)
    }

    /// A single request against a single server
    async fn attempt(
        &self,
        config: &HttpDnsConfig,
        server: &str,
        domains: &[String],
        stack: StackMode,
    ) -> Result<HashMap<String, Result<Answer>>> {
        let cipher = PayloadCipher::new(&config.credentials, config.encryption);
        let request = codec::build_request(
            server,
            domains,
            stack,
            config,
            &cipher,
            self.clock.now().timestamp(),
        )?;

        let timeout = config.attempt_timeout();
        let body = match tokio::time::timeout(timeout, self.transport.send(&request, timeout)).await
        {
            Ok(result) => result?,
            Err(_) => return Err(Error::timeout(server, config.timeout_ms)),
        };

        let text = cipher.open(&body)?;
        codec::parse_batch(&text, domains, stack)
    }

    fn build_records(
        &self,
        config: &HttpDnsConfig,
        answers: HashMap<String, Result<Answer>>,
        stack: StackMode,
    ) -> BatchOutcome {
        let now = self.clock.now();

        answers
            .into_iter()
            .map(|(domain, answer)| {
                let record = answer.and_then(|answer| {
                    let ttl = answer
                        .ttl_secs
                        .map(|t| {
                            t.max(config.cache.min_ttl_secs)
                                .min(config.cache.max_ttl_secs)
                        })
                        .unwrap_or(config.cache.default_ttl_secs);
                    let ips = self
                        .ranker
                        .rank(&domain, answer.ips, config.rank_hints(&domain));
                    ResolutionRecord::new(ips, now, ttl, stack)
                });
                (domain, record)
            })
            .collect()
    }
}

/// Re-create an error for every member of a failed batch
fn replicate(error: &Error) -> Error {
    match error {
        Error::AllServersExhausted { attempts } => Error::AllServersExhausted {
            attempts: *attempts,
        },
        Error::Timeout { server, timeout_ms } => Error::timeout(server.clone(), *timeout_ms),
        Error::MalformedResponse(msg) => Error::malformed(msg.clone()),
        Error::Transport(msg) => Error::transport(msg.clone()),
        Error::Encryption(msg) => Error::encryption(msg.clone()),
        Error::Config(msg) => Error::config(msg.clone()),
        other => Error::Other(other.to_string()),
    }
}
