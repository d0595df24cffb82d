//! Keeping several replicas of one calendar converged.
//!
//! A [`SyncedCalendar`] owns the replicas that must hold the same events.
//! Each `sync()` runs rounds of pull, resolve and push until a round changes
//! nothing. Transient backend failures abort the round and retry it after an
//! exponential sleep.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use futures::future::{join_all, try_join_all};
use tracing::{debug, info, warn};

use crate::backend::CalendarBackend;
use crate::config::{SyncPolicy, SyncedCalendarConfig};
use crate::error::{BridgeError, BridgeResult};
use crate::replica::ReplicaStore;
use crate::resolve::resolve;

pub struct SyncedCalendar {
    name: String,
    replicas: Vec<ReplicaStore>,
    /// Every event id ever seen on any replica.
    event_ids: BTreeSet<String>,
    policy: SyncPolicy,
}

impl SyncedCalendar {
    pub fn new(name: impl Into<String>, replicas: Vec<ReplicaStore>, policy: SyncPolicy) -> Self {
        SyncedCalendar {
            name: name.into(),
            replicas,
            event_ids: BTreeSet::new(),
            policy,
        }
    }

    /// Connect every replica of a configured calendar.
    ///
    /// `backends` maps domain names to the backend serving that domain.
    pub async fn connect(
        name: &str,
        config: &SyncedCalendarConfig,
        backends: &BTreeMap<String, Arc<dyn CalendarBackend>>,
        policy: &SyncPolicy,
    ) -> BridgeResult<Self> {
        let mut replicas = Vec::with_capacity(config.replicas.len());

        for replica in &config.replicas {
            let backend = backends.get(&replica.domain).ok_or_else(|| {
                BridgeError::Config(format!(
                    "Domain {} referenced in calendar config not defined.",
                    replica.domain
                ))
            })?;
            replicas.push(ReplicaStore::connect(replica, backend.clone(), policy.clone()).await?);
        }

        Ok(SyncedCalendar::new(name, replicas, policy.clone()))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn replicas(&self) -> &[ReplicaStore] {
        &self.replicas
    }

    pub fn replica(&self, index: usize) -> Option<&ReplicaStore> {
        self.replicas.get(index)
    }

    pub fn replica_mut(&mut self, index: usize) -> Option<&mut ReplicaStore> {
        self.replicas.get_mut(index)
    }

    pub fn event_ids(&self) -> &BTreeSet<String> {
        &self.event_ids
    }

    /// Run rounds until the replicas agree. Returns the total number of
    /// changes over all rounds.
    pub async fn sync(&mut self) -> BridgeResult<usize> {
        let result = self.converge().await;

        for replica in &mut self.replicas {
            replica.reset_backoff();
        }

        result
    }

    async fn converge(&mut self) -> BridgeResult<usize> {
        let mut total = 0;
        let mut rounds = 0;
        let mut iterations: u32 = 0;
        let mut failures = 0;

        loop {
            if rounds >= self.policy.iteration_limit {
                return Err(BridgeError::IterationLimit {
                    calendar: self.name.clone(),
                    limit: self.policy.iteration_limit,
                });
            }

            match self.run_round().await {
                Ok(changes) => {
                    rounds += 1;
                    iterations += 1;
                    failures = 0;
                    total += changes;
                    debug!(calendar = %self.name, round = rounds, changes, total, "round finished");

                    if changes == 0 {
                        info!(calendar = %self.name, rounds, changes = total, "in sync");
                        return Ok(total);
                    }
                }
                Err(e) if e.is_transient() => {
                    iterations += 1;
                    failures += 1;
                    if failures > self.policy.max_transient_retries {
                        warn!(calendar = %self.name, failures, error = %e, "giving up after repeated transient failures");
                        return Err(e);
                    }

                    let delay = self.policy.retry_delay(iterations);
                    let penalty = self.policy.rate_limit_penalty(iterations);
                    warn!(
                        calendar = %self.name,
                        error = %e,
                        retry_in_ms = delay.as_millis() as u64,
                        "transient failure, retrying round"
                    );

                    tokio::time::sleep(delay).await;
                    for replica in &mut self.replicas {
                        replica.inflate_backoff(penalty);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One pull, resolve and push pass. Returns the number of distinct events
    /// that changed on any replica.
    async fn run_round(&mut self) -> BridgeResult<usize> {
        for replica in &mut self.replicas {
            replica.take_touched();
        }

        let pulled: usize = try_join_all(self.replicas.iter_mut().map(|r| r.pull()))
            .await?
            .into_iter()
            .sum();
        settle(join_all(self.replicas.iter_mut().map(|r| r.begin_batch())).await)?;

        // Edits made on a read-only replica must not take part in resolution.
        for replica in self.replicas.iter_mut().filter(|r| r.is_read_only()) {
            replica.flush_dirty().await?;
        }

        for replica in &self.replicas {
            self.event_ids.extend(replica.event_ids().cloned());
        }

        let mut reconciled = 0;
        for id in &self.event_ids {
            let Some(canonical) = resolve(self.replicas.iter().filter_map(|r| r.event(id))) else {
                continue;
            };
            for replica in &mut self.replicas {
                if replica.reconcile(&canonical).await? {
                    reconciled += 1;
                }
            }
        }

        let mut flushed = 0;
        for replica in &mut self.replicas {
            flushed += replica.flush_dirty().await?;
        }

        // Every batch runs to completion, even when a sibling fails.
        settle(join_all(self.replicas.iter_mut().map(|r| r.commit_batch())).await)?;

        let changed: BTreeSet<String> = self
            .replicas
            .iter_mut()
            .flat_map(|r| r.take_touched())
            .collect();

        debug!(calendar = %self.name, pulled, reconciled, flushed, "round");
        Ok(changed.len())
    }
}

/// Collapse per-replica results into one, reporting the first failure. A
/// transient failure wins over a fatal one so the round gets retried.
fn settle<T>(results: Vec<BridgeResult<T>>) -> BridgeResult<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut first_error: Option<BridgeError> = None;

    for result in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => match &first_error {
                None => first_error = Some(e),
                Some(current) if !current.is_transient() && e.is_transient() => {
                    first_error = Some(e)
                }
                Some(_) => warn!(error = %e, "further replica failure"),
            },
        }
    }

    match first_error {
        Some(e) => Err(e),
        None => Ok(values),
    }
}
