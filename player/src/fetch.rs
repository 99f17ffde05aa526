//! Downloads the campaign and its images from the master's bulk channel

use log::{debug, info};
use reqwest::{Client, StatusCode, Url};
use shared::resources::{AssetCache, DATA_FILE};
use shared::{Campaign, CampaignData, CampaignError};
use std::collections::BTreeSet;
use std::net::{IpAddr, SocketAddr};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("{url} answered {status}")]
    Status { url: Url, status: StatusCode },

    #[error("cannot build a URL for {path}: {reason}")]
    InvalidUrl { path: String, reason: String },

    #[error(transparent)]
    Campaign(#[from] CampaignError),
}

/// Base URL of the master's bulk channel. IPv6 hosts are bracketed.
pub fn base_url(master: IpAddr, port: u16) -> String {
    format!("http://{}/", SocketAddr::new(master, port))
}

pub struct ResourceClient {
    client: Client,
    base: Url,
}

impl ResourceClient {
    pub fn new(master: IpAddr, port: u16) -> Result<Self, FetchError> {
        let base = base_url(master, port);
        let base = Url::parse(&base).map_err(|e| FetchError::InvalidUrl {
            path: base.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            client: Client::new(),
            base,
        })
    }

    pub fn url(&self, path: &str) -> Result<Url, FetchError> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|e| FetchError::InvalidUrl {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, FetchError> {
        let url = self.url(path)?;
        debug!("GET {}", url);
        let response = self.client.get(url.clone()).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status { url, status });
        }
        Ok(response)
    }

    pub async fn data(&self) -> Result<CampaignData, FetchError> {
        Ok(self.get(DATA_FILE).await?.json().await?)
    }

    pub async fn bytes(&self, path: &str) -> Result<Vec<u8>, FetchError> {
        Ok(self.get(path).await?.bytes().await?.to_vec())
    }

    /// Fetches every image the document's fragments reference.
    pub async fn assets(&self, data: &CampaignData) -> Result<AssetCache, FetchError> {
        let paths: BTreeSet<&str> = data.fragments.values().map(|f| f.path.as_str()).collect();
        let mut cache = AssetCache::new();
        for path in paths {
            let bytes = self.bytes(path).await?;
            debug!("Fetched {} ({} bytes)", path, bytes.len());
            cache.insert(path, bytes);
        }
        Ok(cache)
    }

    /// The live campaign, validated against the fetched images.
    pub async fn campaign(&self) -> Result<(Campaign, AssetCache), FetchError> {
        let data = self.data().await?;
        let assets = self.assets(&data).await?;
        let campaign = Campaign::load(data, &assets)?;
        info!(
            "Fetched campaign with {} pages and {} images",
            campaign.pages().len(),
            assets.len()
        );
        Ok((campaign, assets))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    #[test]
    fn test_base_url_brackets_ipv6() {
        assert_eq!(
            base_url(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 10)), 2215),
            "http://192.168.1.10:2215/"
        );
        assert_eq!(base_url(IpAddr::V6(Ipv6Addr::LOCALHOST), 2215), "http://[::1]:2215/");
    }

    #[test]
    fn test_asset_urls_are_relative_to_root() {
        let client = ResourceClient::new(IpAddr::V6(Ipv6Addr::LOCALHOST), 2215).unwrap();
        assert_eq!(client.url("data.json").unwrap().as_str(), "http://[::1]:2215/data.json");
        assert_eq!(
            client.url("/maps/old cave.png").unwrap().as_str(),
            "http://[::1]:2215/maps/old%20cave.png"
        );
    }

    #[tokio::test]
    async fn test_unreachable_master_is_an_http_error() {
        // Port 9 on localhost has nothing listening.
        let client = ResourceClient::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9).unwrap();
        assert!(matches!(client.data().await, Err(FetchError::Http(_))));
    }
}
