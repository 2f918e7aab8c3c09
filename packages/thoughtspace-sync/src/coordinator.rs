use thoughtspace_core::{
    apply_batch,
    ids::ClientId,
    timestamp::Timestamp,
    traits::LogStore,
    EngineConfig,
};
use tracing::{info, instrument, warn};

use crate::error::Result;
use crate::state::ClientState;
use crate::transport::Transport;

/// Tuning knobs for the coordinator itself, distinct from the CRDT Engine's own config.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Max operations applied through the engine per catch-up chunk (§6 `pull_chunk_size`).
    pub pull_chunk_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            pull_chunk_size: 1000,
        }
    }
}

/// Drives a local [`LogStore`] through the Sync Coordinator state machine against a [`Transport`]
/// connected to one thoughtspace's Relay.
pub struct SyncCoordinator<S, T> {
    client_id: ClientId,
    store: S,
    transport: T,
    state: ClientState,
    engine_config: EngineConfig,
    sync_config: SyncConfig,
}

impl<S, T> SyncCoordinator<S, T>
where
    S: LogStore,
    T: Transport,
{
    pub fn new(client_id: ClientId, store: S, transport: T) -> Self {
        Self {
            client_id,
            store,
            transport,
            state: ClientState::Disconnected,
            engine_config: EngineConfig::default(),
            sync_config: SyncConfig::default(),
        }
    }

    pub fn with_sync_config(mut self, sync_config: SyncConfig) -> Self {
        self.sync_config = sync_config;
        self
    }

    pub fn state(&self) -> &ClientState {
        &self.state
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// The maximum `sync_timestamp` observed from any non-self client; the cursor for
    /// catch-up and the threshold deciding `Hydrating` vs `Catching-Up`.
    fn local_cursor(&self) -> Result<Option<Timestamp>> {
        let cursor = self
            .store
            .read_from(None)?
            .into_iter()
            .filter(|op| op.client_id != self.client_id)
            .filter_map(|op| op.sync_timestamp)
            .max();
        Ok(cursor)
    }

    /// Connect: hydrate (no cursor yet) or catch up (cursor exists), then flush any pending
    /// locally-originated operations and enter `Live`.
    #[instrument(skip(self))]
    pub async fn connect(&mut self) -> Result<()> {
        match self.local_cursor()? {
            None => {
                self.state = ClientState::Hydrating;
                self.hydrate().await?;
            }
            Some(_) => {
                self.state = ClientState::CatchingUp;
                self.catch_up().await?;
            }
        }
        self.push_pending().await?;
        self.state = ClientState::Live;
        info!("sync coordinator live");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn hydrate(&mut self) -> Result<()> {
        let snapshot = self.transport.hydrate().await?;
        self.store.clear()?;
        for (node, parent) in snapshot.nodes {
            self.store.put_parent(&node, parent)?;
        }
        for op in snapshot.operations {
            self.store.append(op)?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn catch_up(&mut self) -> Result<()> {
        loop {
            let cursor = self.local_cursor()?;
            let batch = self.transport.pull_since(cursor).await?;
            if batch.operations.is_empty() {
                break;
            }
            for chunk in batch.operations.chunks(self.sync_config.pull_chunk_size) {
                apply_batch(&mut self.store, chunk.to_vec(), &self.engine_config)?;
                for op in chunk {
                    if let Some(sync_ts) = &op.sync_timestamp {
                        self.store.mark_synced(&op.timestamp, sync_ts.clone())?;
                    }
                }
            }
            let reached_upper_bound = match (&batch.upper_limit, self.local_cursor()?) {
                (Some(upper), Some(cursor)) => cursor >= *upper,
                _ => true,
            };
            if reached_upper_bound {
                break;
            }
        }
        Ok(())
    }

    /// Push every locally-originated, not-yet-acknowledged operation.
    #[instrument(skip(self))]
    pub async fn push_pending(&mut self) -> Result<()> {
        let pending: Vec<_> = self
            .store
            .read_from(None)?
            .into_iter()
            .filter(|op| op.sync_timestamp.is_none() && op.client_id == self.client_id)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }
        let sync_timestamp = self.transport.push(pending.clone()).await?;
        for op in &pending {
            self.store.mark_synced(&op.timestamp, sync_timestamp.clone())?;
        }
        Ok(())
    }

    /// Drain the live broadcast subscription until the transport closes it. Each batch is
    /// idempotent on `timestamp`, so re-delivery from a reconnect is harmless.
    #[instrument(skip(self))]
    pub async fn receive_live(&mut self) -> Result<()> {
        while let Some(batch) = self.transport.recv_live().await? {
            apply_batch(&mut self.store, batch.operations.clone(), &self.engine_config)?;
            for op in &batch.operations {
                if let Some(sync_ts) = &op.sync_timestamp {
                    self.store.mark_synced(&op.timestamp, sync_ts.clone())?;
                }
            }
        }
        Ok(())
    }

    /// Transport reported a loss; any in-flight stream is considered cancelled.
    pub fn disconnect(&mut self) {
        self.state = ClientState::Disconnected;
    }

    /// Irrecoverable local divergence: discard the local replica and re-hydrate from scratch.
    #[instrument(skip(self, reason), fields(reason = %reason))]
    pub async fn fail_and_recover(&mut self, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        warn!(%reason, "sync coordinator entering recovery");
        self.state = ClientState::Error(reason);
        self.store.clear()?;
        self.state = ClientState::Hydrating;
        self.hydrate().await?;
        self.state = ClientState::Live;
        Ok(())
    }
}
