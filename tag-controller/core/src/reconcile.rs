use crate::{
    clock::Clock,
    resource::{Conditions, ResourceTags},
    store::{ResourceStore, StoreError},
};
use std::{future::Future, sync::Arc};
use tokio::time;
use tracing::{debug, error, instrument};


/// Merges observations into the store, one record per logical key.
///
/// Both ingestion paths write through a `Reconciler`; it is the single place
/// where records are created and updated.
#[derive(Clone)]
pub struct Reconciler {
    store: Arc<dyn ResourceStore>,
    clock: Arc<dyn Clock>,
    timeout: time::Duration,
}

/// The write performed by a successful upsert.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Written {
    Created { id: String },
    Updated { id: String },
}

#[derive(Debug, thiserror::Error)]
pub enum UpsertError {
    #[error("failed to find {conditions}: {source}")]
    Find {
        conditions: Conditions,
        #[source]
        source: StoreError,
    },

    #[error("failed to create {conditions}: {source}")]
    Create {
        conditions: Conditions,
        #[source]
        source: StoreError,
    },

    #[error("failed to update {conditions}: {source}")]
    Update {
        conditions: Conditions,
        #[source]
        source: StoreError,
    },

    #[error("store operation on {conditions} timed out after {timeout:?}")]
    Timeout {
        conditions: Conditions,
        timeout: time::Duration,
    },
}

// === impl Reconciler ===

impl Reconciler {
    pub const DEFAULT_TIMEOUT: time::Duration = time::Duration::from_secs(5);

    pub fn new(store: Arc<dyn ResourceStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            timeout: Self::DEFAULT_TIMEOUT,
        }
    }

    /// Bounds each store operation.
    pub fn with_timeout(self, timeout: time::Duration) -> Self {
        Self { timeout, ..self }
    }

    /// Creates a record for `record`'s logical key, or replaces the existing
    /// one while preserving its `id` and creation time.
    ///
    /// Every write clears `sent_at` so that the record is pushed again.
    /// Failures are logged and returned; nothing is retried inline, the next
    /// observation of the same object converges the store.
    #[instrument(skip_all, fields(resource = %record.conditions()))]
    pub async fn upsert(&self, record: ResourceTags) -> Result<Written, UpsertError> {
        let size = record.size();
        let res = self.try_upsert(record).await;
        match res {
            Ok(ref written) => debug!(?written, size, "Wrote record"),
            Err(ref error) => error!(%error, "Failed to write record"),
        }
        res
    }

    async fn try_upsert(&self, mut record: ResourceTags) -> Result<Written, UpsertError> {
        let conditions = record.conditions();

        debug!("Searching for an existing record");
        match self.find(&conditions).await? {
            Some(found) => self.update(found, record).await,
            None => match self.create(&mut record).await {
                Err(UpsertError::Create {
                    source: StoreError::Conflict(_),
                    ..
                }) => {
                    // Another writer created the key after our lookup.
                    debug!("Record created concurrently");
                    let found = self.find(&conditions).await?.ok_or_else(|| {
                        UpsertError::Update {
                            conditions: conditions.clone(),
                            source: StoreError::NotFound(conditions.clone()),
                        }
                    })?;
                    self.update(found, record).await
                }
                res => res,
            },
        }
    }

    async fn find(&self, conditions: &Conditions) -> Result<Option<ResourceTags>, UpsertError> {
        self.timed(conditions, self.store.find_first_by(conditions))
            .await?
            .map_err(|source| UpsertError::Find {
                conditions: conditions.clone(),
                source,
            })
    }

    async fn create(&self, record: &mut ResourceTags) -> Result<Written, UpsertError> {
        debug!("Creating record");
        let conditions = record.conditions();
        let now = self.clock.now();
        record.record_created = Some(now);
        record.record_updated = Some(now);
        record.sent_at = None;

        let store = &self.store;
        let write = async {
            let mut tx = store.begin().await?;
            tx.create(record).await?;
            tx.commit().await
        };
        let res = self.timed(&conditions, write).await?;
        res.map_err(|source| UpsertError::Create { conditions, source })?;

        Ok(Written::Created {
            id: record.id.clone().unwrap_or_default(),
        })
    }

    async fn update(
        &self,
        found: ResourceTags,
        mut record: ResourceTags,
    ) -> Result<Written, UpsertError> {
        debug!("Updating existing record");
        let conditions = record.conditions();
        record.id = found.id;
        record.record_created = found.record_created;
        record.record_updated = Some(self.clock.now());
        record.sent_at = None;

        let store = &self.store;
        let write = async {
            let mut tx = store.begin().await?;
            tx.update(&record).await?;
            tx.commit().await
        };
        let res = self.timed(&conditions, write).await?;
        res.map_err(|source| UpsertError::Update { conditions, source })?;

        Ok(Written::Updated {
            id: record.id.unwrap_or_default(),
        })
    }

    async fn timed<T>(
        &self,
        conditions: &Conditions,
        op: impl Future<Output = Result<T, StoreError>>,
    ) -> Result<Result<T, StoreError>, UpsertError> {
        time::timeout(self.timeout, op)
            .await
            .map_err(|_| UpsertError::Timeout {
                conditions: conditions.clone(),
                timeout: self.timeout,
            })
    }
}

impl std::fmt::Debug for Reconciler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconciler")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

// === impl Written ===

impl Written {
    pub fn id(&self) -> &str {
        match self {
            Self::Created { id } | Self::Updated { id } => id,
        }
    }
}
