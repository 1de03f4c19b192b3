#![deny(warnings, rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod clock;
pub mod filter;
pub mod reconcile;
mod resource;
pub mod settings;
pub mod store;

pub use self::{
    clock::{Clock, MockClock, SystemClock},
    filter::{filter, Pattern},
    reconcile::{Reconciler, UpsertError, Written},
    resource::{Conditions, MetricLabels, ResourceTags, ResourceType, Tags, UnknownResourceType},
    settings::{ClassFilter, Resources, Settings},
    store::{MemoryStore, ResourceStore, StoreError, Transaction},
};
