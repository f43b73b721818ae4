use std::net::SocketAddr;

use anyhow::Context;

use tether_core::types::{PrivateNetworkReply, TetherMode};
use tether_core::wire::{
    DisableRequest, EnableRequest, ErrorResponse, HeartbeatRequest, PrivateNetworkRequest, ReleaseRequest,
    StatusResponse,
};

pub struct Client {
    base: String,
    http: reqwest::Client,
}

impl Client {
    pub fn new(server: SocketAddr) -> Self {
        Self {
            base: format!("http://{}", server),
            http: reqwest::Client::new(),
        }
    }

    async fn decode<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> anyhow::Result<T> {
        if response.status().is_success() {
            Ok(response.json::<T>().await.context("decoding response body")?)
        } else {
            let status = response.status();
            let body = response.json::<ErrorResponse>().await.ok();
            match body {
                Some(body) => anyhow::bail!("{}: {}", status, body.error),
                None => anyhow::bail!("{}", status),
            }
        }
    }

    pub async fn enable(&self, mode: TetherMode, upstream_ifname: String) -> anyhow::Result<StatusResponse> {
        let response = self
            .http
            .post(format!("{}/tether/enable", self.base))
            .json(&EnableRequest { mode, upstream_ifname })
            .send()
            .await
            .context("sending enable request")?;
        Self::decode(response).await
    }

    pub async fn disable(&self, mode: TetherMode) -> anyhow::Result<StatusResponse> {
        let response = self
            .http
            .post(format!("{}/tether/disable", self.base))
            .json(&DisableRequest { mode })
            .send()
            .await
            .context("sending disable request")?;
        Self::decode(response).await
    }

    pub async fn status(&self) -> anyhow::Result<StatusResponse> {
        let response = self
            .http
            .get(format!("{}/tether/status", self.base))
            .send()
            .await
            .context("sending status request")?;
        Self::decode(response).await
    }

    pub async fn request_private_network(&self, owner_id: String) -> anyhow::Result<PrivateNetworkReply> {
        let response = self
            .http
            .post(format!("{}/private-network/request", self.base))
            .json(&PrivateNetworkRequest { owner_id })
            .send()
            .await
            .context("sending private network request")?;
        Self::decode(response).await
    }

    pub async fn release_private_network(&self, path: String) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/private-network/release", self.base))
            .json(&ReleaseRequest { path })
            .send()
            .await
            .context("sending private network release")?;
        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("release failed: {}", response.status())
        }
    }

    pub async fn heartbeat(&self, owner_id: String) -> anyhow::Result<()> {
        let response = self
            .http
            .post(format!("{}/private-network/heartbeat", self.base))
            .json(&HeartbeatRequest { owner_id })
            .send()
            .await
            .context("sending heartbeat")?;
        if response.status().is_success() {
            Ok(())
        } else {
            anyhow::bail!("heartbeat failed: {}", response.status())
        }
    }
}
