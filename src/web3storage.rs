//! Content-addressed blob store client.
//!
//! The node-rewards file for every cycle is published through a web3 storage
//! service: identical bytes always produce the identical CID, which is what
//! makes the setMerkleRoot proposal reproducible after a crash.

use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};

pub fn node_rewards_file_name(epoch: u64) -> String {
    format!("node-rewards-{}.json", epoch)
}

#[derive(Debug, Clone)]
pub struct Web3StorageClient {
    http: reqwest::Client,
    endpoint: Url,
    gateway: Url,
    token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    cid: String,
}

impl Web3StorageClient {
    pub fn new(endpoint: Url, gateway: Url, token: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            gateway,
            token,
        }
    }

    /// Uploads `bytes` and returns the content identifier.
    pub async fn put(&self, file_name: &str, bytes: Vec<u8>) -> Result<String> {
        let url = self.endpoint.join("upload")?;
        let mut request = self
            .http
            .post(url)
            .header("X-NAME", file_name)
            .body(bytes);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(Error::Web3Storage(format!(
                "upload status {}",
                response.status()
            )));
        }
        let body: UploadResponse = response.json().await?;
        Ok(body.cid)
    }

    /// Downloads the named file of a previously published CID.
    pub async fn get(&self, cid: &str, file_name: &str) -> Result<Vec<u8>> {
        let url = self.gateway.join(&format!("ipfs/{}/{}", cid, file_name))?;
        let response = self.http.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Web3Storage(format!(
                "download {} status {}",
                cid,
                response.status()
            )));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_name_convention() {
        assert_eq!(node_rewards_file_name(75), "node-rewards-75.json");
        assert_eq!(node_rewards_file_name(0), "node-rewards-0.json");
    }
}
