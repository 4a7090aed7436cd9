//! Client for the Civo Kubernetes clusters API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use super::{ProviderCluster, ProviderGateway};
use crate::config::DesiredCluster;
use crate::error::{ProviderError, ProviderResult};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// One page of `GET /clusters`.
#[derive(Debug, Deserialize)]
struct ClusterPage {
    #[serde(default)]
    pages: u32,
    #[serde(default)]
    items: Vec<ProviderCluster>,
}

/// Bearer-authenticated REST client.
#[derive(Clone)]
pub struct CivoClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CivoClient {
    /// `base_url` is the clusters collection, e.g.
    /// `https://api.civo.com/v2/kubernetes/clusters`.
    pub fn new(base_url: impl Into<String>, token: impl Into<String>) -> ProviderResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: token.into(),
        })
    }

    /// Map a non-2xx response to [`ProviderError::Status`].
    async fn check(resp: reqwest::Response) -> ProviderResult<reqwest::Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(ProviderError::Status {
            status: status.as_u16(),
            body,
        })
    }

    async fn fetch_page(&self, page: u32) -> ProviderResult<ClusterPage> {
        let resp = self
            .http
            .get(&self.base_url)
            .bearer_auth(&self.token)
            .query(&[("page", page)])
            .send()
            .await?;
        let body = Self::check(resp).await?.text().await?;
        serde_json::from_str(&body).map_err(|e| ProviderError::Decode(e.to_string()))
    }
}

#[async_trait]
impl ProviderGateway for CivoClient {
    async fn list_clusters(&self) -> ProviderResult<Vec<ProviderCluster>> {
        let mut clusters = Vec::new();
        let mut page = 1;
        loop {
            let current = self.fetch_page(page).await?;
            clusters.extend(current.items);
            if page >= current.pages {
                break;
            }
            page += 1;
        }
        debug!("Listed {} clusters from Civo", clusters.len());
        Ok(clusters)
    }

    async fn create_cluster(&self, cluster: &DesiredCluster) -> ProviderResult<()> {
        debug!("Creating cluster {} in Civo", cluster.name);
        let mut form = vec![("name", cluster.name.clone())];
        if let Some(nodes) = cluster.nodes {
            form.push(("num_target_nodes", nodes.to_string()));
        }

        let resp = self
            .http
            .post(&self.base_url)
            .bearer_auth(&self.token)
            .form(&form)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }

    async fn delete_cluster(&self, id: &str) -> ProviderResult<()> {
        debug!("Deleting cluster {} in Civo", id);
        let resp = self
            .http
            .delete(format!("{}/{}", self.base_url, id))
            .bearer_auth(&self.token)
            .send()
            .await?;
        Self::check(resp).await?;
        Ok(())
    }
}
