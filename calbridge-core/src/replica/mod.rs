//! One calendar's local view of the shared event set.
//!
//! A [`ReplicaStore`] caches every event of its calendar, keeps the incremental
//! sync cursor, and owns the batch of writes queued during a round. Results of
//! pulls and of writes flow through the same merge rule, so the cache always
//! reflects what the backend last confirmed plus any local edit still marked
//! dirty.

mod batch;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::backend::{CalendarBackend, ListRequest, WriteOp};
use crate::config::{ReplicaConfig, SyncPolicy};
use crate::error::{BackendError, BridgeError, BridgeResult, ErrorKind};
use crate::event::{Event, EventFields};

pub use batch::Batch;

pub struct ReplicaStore {
    name: String,
    calendar_id: String,
    read_only: bool,
    backend: Arc<dyn CalendarBackend>,
    policy: SyncPolicy,

    cursor: Option<String>,
    events: BTreeMap<String, Event>,
    batch: Option<Batch>,
    backoff: Duration,

    /// Event ids changed by pulls or writes issued since the last drain.
    touched: BTreeSet<String>,
    /// Event ids reconciliation already queued in the open batch.
    queued: BTreeSet<String>,
}

impl ReplicaStore {
    pub fn new(
        name: impl Into<String>,
        calendar_id: impl Into<String>,
        read_only: bool,
        backend: Arc<dyn CalendarBackend>,
        policy: SyncPolicy,
    ) -> Self {
        ReplicaStore {
            name: name.into(),
            calendar_id: calendar_id.into(),
            read_only,
            backend,
            policy,
            cursor: None,
            events: BTreeMap::new(),
            batch: None,
            backoff: Duration::ZERO,
            touched: BTreeSet::new(),
            queued: BTreeSet::new(),
        }
    }

    /// Build a replica from its config entry, checking that the calendar exists
    /// in the domain and that the account may write to it (or read it, for
    /// read-only replicas).
    pub async fn connect(
        config: &ReplicaConfig,
        backend: Arc<dyn CalendarBackend>,
        policy: SyncPolicy,
    ) -> BridgeResult<Self> {
        let calendars = backend.list_calendars().await?;

        let info = calendars
            .into_iter()
            .find(|c| c.id == config.calendar_id)
            .ok_or_else(|| {
                BridgeError::Config(format!(
                    "Calendar {} not found in domain {}",
                    config.calendar_id, config.domain
                ))
            })?;

        if !info.access_role.allows(config.read_only) {
            return Err(BridgeError::Config(format!(
                "Insufficient access to calendar {} in domain {} ({:?})",
                config.calendar_id, config.domain, info.access_role
            )));
        }

        let name = format!("{} [{}]", info.summary, config.domain);
        info!(replica = %name, read_only = config.read_only, "connected");

        Ok(ReplicaStore::new(
            name,
            config.calendar_id.clone(),
            config.read_only,
            backend,
            policy,
        ))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub fn cursor(&self) -> Option<&str> {
        self.cursor.as_deref()
    }

    pub fn backoff(&self) -> Duration {
        self.backoff
    }

    /// Writes queued in the open batch, or 0 when none is open.
    pub fn batch_len(&self) -> usize {
        self.batch.as_ref().map_or(0, Batch::len)
    }

    pub fn events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn active_events(&self) -> impl Iterator<Item = &Event> {
        self.events.values().filter(|e| e.is_active())
    }

    pub fn event_ids(&self) -> impl Iterator<Item = &String> {
        self.events.keys()
    }

    pub fn event(&self, id: &str) -> Option<&Event> {
        self.events.get(id)
    }

    /// Mutable access for local edits. Editing fields marks the event dirty,
    /// and the next sync pushes it.
    pub fn event_mut(&mut self, id: &str) -> Option<&mut Event> {
        self.events.get_mut(id)
    }

    /// Fetch everything that changed remotely since the stored cursor.
    ///
    /// Returns the number of cached events that changed. An expired cursor
    /// falls back to a full resync.
    pub async fn pull(&mut self) -> BridgeResult<usize> {
        match self.pull_pages().await {
            Err(BridgeError::Backend(e)) if e.kind == ErrorKind::CursorExpired => {
                warn!(replica = %self.name, error = %e, "sync cursor expired");
                self.full_resync().await
            }
            result => result,
        }
    }

    /// Forget the cursor and every clean cached event, then pull everything.
    /// Local edits that were not pushed yet survive.
    pub async fn full_resync(&mut self) -> BridgeResult<usize> {
        info!(replica = %self.name, "full resync");
        self.cursor = None;
        self.events.retain(|_, event| event.is_dirty());
        self.pull_pages().await
    }

    async fn pull_pages(&mut self) -> BridgeResult<usize> {
        let mut request = ListRequest {
            sync_token: self.cursor.clone(),
            page_token: None,
            show_deleted: true,
        };

        // The cursor only moves once the last page is in.
        let mut incoming = Vec::new();
        let next_cursor = loop {
            let page = self
                .backend
                .list_events(&self.calendar_id, &request)
                .await?;
            incoming.extend(page.items);

            match page.next_page_token {
                Some(token) => request.page_token = Some(token),
                None => break page.next_sync_token,
            }
        };

        let mut changed = 0;
        for event in incoming {
            if let Some(id) = self.merge(event) {
                self.touched.insert(id);
                changed += 1;
            }
        }

        if next_cursor.is_none() {
            warn!(replica = %self.name, "backend returned no sync cursor, next pull is a full resync");
        }
        self.cursor = next_cursor;

        if changed > 0 {
            info!(replica = %self.name, changed, "pulled");
        }
        Ok(changed)
    }

    /// Fold one backend copy into the cache. Returns the id when the cached
    /// copy was replaced.
    ///
    /// A content-equal echo only raises the cached revision and timestamp, and
    /// clears the dirty flag since the backend now holds that content. A local
    /// edit is only overwritten by a copy that was updated after it.
    fn merge(&mut self, incoming: Event) -> Option<String> {
        let Some(id) = incoming.id.clone() else {
            warn!(replica = %self.name, "ignoring event without id");
            return None;
        };

        match self.events.get_mut(&id) {
            Some(cached) if cached.content_hash() == incoming.content_hash() => {
                cached.sequence = cached.sequence.max(incoming.sequence);
                if incoming.updated > cached.updated {
                    cached.updated = incoming.updated;
                }
                cached.mark_clean();
                None
            }
            Some(cached)
                if cached.is_dirty() && incoming.compare(Some(cached)) != Ordering::Greater =>
            {
                debug!(replica = %self.name, event = %cached, "keeping local edit");
                None
            }
            cached => {
                let replaced = cached.is_some();
                debug!(replica = %self.name, event = %incoming, replaced, "merged");
                self.events.insert(id.clone(), incoming);
                Some(id)
            }
        }
    }

    /// Open a batch. A batch left open by an aborted round is committed first.
    pub async fn begin_batch(&mut self) -> BridgeResult<()> {
        if self.batch.is_some() {
            warn!(replica = %self.name, queued = self.batch_len(), "committing batch left open");
            self.commit_batch().await?;
        }
        self.batch = Some(Batch::new());
        self.queued.clear();
        Ok(())
    }

    /// Execute the open batch and merge its results.
    ///
    /// Sleeps off the accumulated backoff first; the backoff is only cleared
    /// once the backend answered. Returns the number of writes that succeeded.
    /// If any write was rejected, the others are still merged and the batch
    /// fails with the first item error.
    pub async fn commit_batch(&mut self) -> BridgeResult<usize> {
        let Some(batch) = self.batch.take() else {
            return Ok(0);
        };
        if batch.is_empty() {
            return Ok(0);
        }

        let delay = self.backoff;
        if !delay.is_zero() {
            debug!(replica = %self.name, delay_ms = delay.as_millis() as u64, "applying backoff");
            tokio::time::sleep(delay).await;
        }

        let (inserts, updates) = batch.counts();
        info!(replica = %self.name, inserts, updates, "committing batch");

        let ops = batch.into_ops();
        let total = ops.len();
        let results = match self.backend.execute_batch(&self.calendar_id, &ops).await {
            Ok(results) => results,
            Err(e) => {
                warn!(replica = %self.name, total, error = %e, "batch call failed");
                return Err(e.into());
            }
        };
        self.backoff = Duration::ZERO;

        let mut failed = 0;
        let mut first_error: Option<BackendError> = None;
        for (op, result) in ops.iter().zip(results) {
            match result {
                Ok(event) => {
                    self.merge(event);
                }
                Err(e) => {
                    warn!(replica = %self.name, op = op.symbol(), event = %op.event(), error = %e, "write rejected");
                    failed += 1;
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(source) => {
                let penalty = self.policy.batch_failure_penalty() * failed as u32;
                self.backoff += penalty;
                Err(BridgeError::BatchItem {
                    calendar: self.name.clone(),
                    failed,
                    total,
                    source,
                })
            }
            None => Ok(total),
        }
    }

    /// Queue `op` in the open batch, or execute it right away when no batch is
    /// open. Read-only replicas never write.
    pub async fn enqueue_or_execute(&mut self, op: WriteOp) -> BridgeResult<()> {
        if self.read_only {
            debug!(replica = %self.name, op = op.symbol(), event = %op.event(), "read-only, skipping write");
            return Ok(());
        }

        let queued = match self.batch.as_mut() {
            Some(batch) => {
                batch.push(op);
                batch.len()
            }
            None => {
                debug!(replica = %self.name, op = op.symbol(), event = %op.event(), "writing");
                let event = op.execute(self.backend.as_ref(), &self.calendar_id).await?;
                self.merge(event);
                return Ok(());
            }
        };

        self.backoff += self.policy.per_write_delay();

        if queued > self.policy.max_actions_per_batch {
            self.commit_batch().await?;
            self.batch = Some(Batch::new());
        }

        Ok(())
    }

    /// Bring this replica's copy of one event in line with the canonical
    /// version. Returns whether a write was issued.
    pub async fn reconcile(&mut self, canonical: &Event) -> BridgeResult<bool> {
        let Some(id) = canonical.id.as_deref() else {
            return Ok(false);
        };

        let op = match self.events.get(id) {
            // Never create a tombstone.
            None if !canonical.is_active() => return Ok(false),
            None => WriteOp::Insert {
                event: canonical.clone(),
            },
            Some(local) if !local.is_active() && !canonical.is_active() => return Ok(false),
            Some(local)
                if canonical.content_hash() != local.content_hash()
                    || local.sequence < canonical.sequence =>
            {
                WriteOp::Update {
                    event_id: id.to_string(),
                    event: canonical.clone(),
                }
            }
            Some(_) => return Ok(false),
        };

        if self.read_only {
            debug!(replica = %self.name, op = op.symbol(), event = %canonical, "read-only, skipping write");
            return Ok(false);
        }

        // A local edit stays dirty until the backend echoes the write back.
        debug!(replica = %self.name, op = op.symbol(), event = %canonical, "reconcile");
        self.touched.insert(id.to_string());
        if self.batch.is_some() {
            self.queued.insert(id.to_string());
        }
        self.enqueue_or_execute(op).await?;
        Ok(true)
    }

    /// Push local edits that reconciliation did not already cover.
    ///
    /// The dirty flag clears once the backend confirms the write. On a
    /// read-only replica the edits are discarded instead.
    pub async fn flush_dirty(&mut self) -> BridgeResult<usize> {
        let dirty: Vec<String> = self
            .events
            .iter()
            .filter(|(id, event)| event.is_dirty() && !self.queued.contains(*id))
            .map(|(id, _)| id.clone())
            .collect();

        if self.read_only {
            if !dirty.is_empty() {
                // The next pull lists the calendar again and restores the backend's copies.
                warn!(replica = %self.name, dropped = dirty.len(), "read-only, dropping local edits");
                for id in &dirty {
                    self.events.remove(id);
                }
                self.cursor = None;
            }
            return Ok(0);
        }

        let mut flushed = 0;
        for id in dirty {
            let Some(event) = self.events.get(&id).cloned() else {
                continue;
            };
            self.touched.insert(id.clone());
            self.enqueue_or_execute(WriteOp::Update {
                event_id: id,
                event,
            })
            .await?;
            flushed += 1;
        }
        Ok(flushed)
    }

    /// Create a new event on this replica. The backend assigns its id, and it
    /// enters the cache once the write result is merged.
    pub async fn create_event(&mut self, fields: EventFields) -> BridgeResult<()> {
        self.enqueue_or_execute(WriteOp::Insert {
            event: Event::new(fields),
        })
        .await
    }

    pub(crate) fn take_touched(&mut self) -> BTreeSet<String> {
        std::mem::take(&mut self.touched)
    }

    pub(crate) fn inflate_backoff(&mut self, by: Duration) {
        self.backoff += by;
    }

    pub(crate) fn reset_backoff(&mut self) {
        self.backoff = Duration::ZERO;
    }
}
