use crate::resource::{Conditions, ResourceTags};

mod memory;

pub use self::memory::MemoryStore;

/// A predicate evaluated against stored records.
pub type Predicate<'a> = &'a (dyn Fn(&ResourceTags) -> bool + Send + Sync);

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A record already exists for the logical key.
    #[error("record already exists: {0}")]
    Conflict(Conditions),

    #[error("record not found: {0}")]
    NotFound(Conditions),

    #[error("record has no id: {0}")]
    MissingId(Conditions),

    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// Durable storage for resource tag records.
///
/// Implementations must enforce that at most one record exists per logical
/// key, including under concurrent writers: a `create` for a key that
/// already exists fails with [`StoreError::Conflict`].
#[async_trait::async_trait]
pub trait ResourceStore: Send + Sync {
    /// Returns the first record matching `conditions`.
    async fn find_first_by(
        &self,
        conditions: &Conditions,
    ) -> Result<Option<ResourceTags>, StoreError>;

    /// Returns every record for which `predicate` holds.
    async fn find_all_by(&self, predicate: Predicate<'_>) -> Result<Vec<ResourceTags>, StoreError>;

    /// Begins a transaction. Writes become visible when the transaction is
    /// committed; dropping it uncommitted discards them.
    async fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError>;
}

/// A scoped, atomic set of writes.
#[async_trait::async_trait]
pub trait Transaction: Send {
    /// Inserts a new record, assigning its `id`.
    async fn create(&mut self, record: &mut ResourceTags) -> Result<(), StoreError>;

    /// Replaces the stored record with the same `id`.
    async fn update(&mut self, record: &ResourceTags) -> Result<(), StoreError>;

    async fn commit(&mut self) -> Result<(), StoreError>;
}

#[async_trait::async_trait]
impl<S: ResourceStore + ?Sized> ResourceStore for std::sync::Arc<S> {
    async fn find_first_by(
        &self,
        conditions: &Conditions,
    ) -> Result<Option<ResourceTags>, StoreError> {
        (**self).find_first_by(conditions).await
    }

    async fn find_all_by(&self, predicate: Predicate<'_>) -> Result<Vec<ResourceTags>, StoreError> {
        (**self).find_all_by(predicate).await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction + '_>, StoreError> {
        (**self).begin().await
    }
}
