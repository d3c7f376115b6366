//! Readiness polling with a fixed backoff
//!
//! A session is ready once the chain client answers a chain id query. The
//! probe is retried on a fixed interval until it succeeds, the attempt budget
//! or deadline runs out, or the session is cancelled.

use crate::chain::{ChainClient, ClientConfig};
use crate::config::ReadinessConfig;
use crate::error::{FlowError, FlowResult};

use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Fixed-interval retry schedule with an attempt budget and/or a deadline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
}

impl RetryPolicy {
    pub fn from_config(config: &ReadinessConfig) -> Self {
        Self {
            interval: config.interval(),
            max_attempts: config.max_attempts,
            timeout: config.timeout(),
        }
    }

    fn exhausted(&self, attempts: u32, started: Instant) -> bool {
        self.max_attempts.is_some_and(|max| attempts >= max)
            || self.timeout.is_some_and(|t| started.elapsed() >= t)
    }
}

/// Probe `client` until it answers. Returns the number of attempts made.
pub async fn poll_until_ready(
    client: &dyn ChainClient,
    config: &ClientConfig,
    policy: &RetryPolicy,
    token: &CancellationToken,
) -> FlowResult<u32> {
    let started = Instant::now();
    let mut attempts = 0;

    loop {
        if token.is_cancelled() {
            return Err(FlowError::Cancelled);
        }

        attempts += 1;
        let probe = tokio::select! {
            _ = token.cancelled() => return Err(FlowError::Cancelled),
            probe = client.chain_id(config) => probe,
        };

        match probe {
            Ok(chain_id) => {
                debug!(
                    "Chain client ready after {} attempts (chain {})",
                    attempts, chain_id
                );
                return Ok(attempts);
            }
            Err(e) => {
                debug!("Readiness probe {} failed: {}", attempts, e);
            }
        }

        if policy.exhausted(attempts, started) {
            return Err(FlowError::ReadinessTimeout { attempts });
        }

        tokio::select! {
            _ = token.cancelled() => return Err(FlowError::Cancelled),
            _ = tokio::time::sleep(policy.interval) => {}
        }
    }
}
