use crate::workload::Workload;
use kube::api::{Api, ListParams};

pub type Error = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Requests one page of a cluster-wide list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PageRequest {
    pub limit: u32,
    pub continue_token: Option<String>,
}

#[derive(Clone, Debug)]
pub struct Page<K> {
    pub items: Vec<K>,
    /// Set when more items remain.
    pub continue_token: Option<String>,
}

/// Read-only, paginated access to cluster resources.
#[async_trait::async_trait]
pub trait Cluster: Send + Sync {
    async fn list<K: Workload>(&self, page: &PageRequest) -> Result<Page<K>, Error>;
}

#[async_trait::async_trait]
impl Cluster for kube::Client {
    async fn list<K: Workload>(&self, page: &PageRequest) -> Result<Page<K>, Error> {
        let mut params = ListParams::default().limit(page.limit);
        if let Some(token) = page.continue_token.as_deref() {
            params = params.continue_token(token);
        }

        let list = Api::<K>::all(self.clone()).list(&params).await?;
        Ok(Page {
            items: list.items,
            continue_token: list.metadata.continue_.filter(|t| !t.is_empty()),
        })
    }
}
