//! Minimal REST client against the switch's call-control API (§4.3, §6).
//!
//! Modeled on Asterisk's ARI: channel answer/hangup, bridge lifecycle,
//! `externalMedia` channel creation (used to discover the RTP host/port the
//! switch expects outbound audio on), and dialplan continuation for
//! transfers. Treated as an opaque HTTP/JSON peer; responses are never
//! cached across calls.

use crate::error::{BridgeError, BridgeResult};
use reqwest::Client;
use serde::Deserialize;
use tracing::instrument;

pub struct AriClient {
    base_url: String,
    app: String,
    user: String,
    password: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
pub struct ExternalMediaChannel {
    pub id: String,
}

/// Host/port the switch will send outbound RTP from, discovered via channel
/// variables after `externalMedia` creation.
#[derive(Debug, Clone)]
pub struct ExternalMediaAddress {
    pub host: String,
    pub port: u16,
}

impl AriClient {
    pub fn new(base_url: impl Into<String>, app: impl Into<String>, user: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            app: app.into(),
            user: user.into(),
            password: password.into(),
            http: Client::new(),
        }
    }

    #[instrument(skip(self))]
    pub async fn answer_channel(&self, channel_id: &str) -> BridgeResult<()> {
        self.post_empty(&format!("/channels/{channel_id}/answer")).await
    }

    #[instrument(skip(self))]
    pub async fn hangup_channel(&self, channel_id: &str) -> BridgeResult<()> {
        self.request(reqwest::Method::DELETE, &format!("/channels/{channel_id}"), &[])
            .await
            .map(|_| ())
    }

    #[instrument(skip(self))]
    pub async fn create_bridge(&self) -> BridgeResult<String> {
        #[derive(Deserialize)]
        struct Bridge {
            id: String,
        }
        let bridge: Bridge = self
            .request_json(reqwest::Method::POST, "/bridges", &[("type", "mixing")])
            .await?;
        Ok(bridge.id)
    }

    #[instrument(skip(self))]
    pub async fn add_channel_to_bridge(&self, bridge_id: &str, channel_id: &str) -> BridgeResult<()> {
        self.post_empty(&format!("/bridges/{bridge_id}/addChannel?channel={channel_id}"))
            .await
    }

    #[instrument(skip(self))]
    pub async fn destroy_bridge(&self, bridge_id: &str) -> BridgeResult<()> {
        self.request(reqwest::Method::DELETE, &format!("/bridges/{bridge_id}"), &[])
            .await
            .map(|_| ())
    }

    /// Creates the `externalMedia` channel and reads back the authoritative
    /// host/port to send outbound RTP to.
    #[instrument(skip(self))]
    pub async fn create_external_media(&self, external_host: &str, format: &str) -> BridgeResult<(ExternalMediaChannel, ExternalMediaAddress)> {
        let channel: ExternalMediaChannel = self
            .request_json(
                reqwest::Method::POST,
                "/channels/externalMedia",
                &[
                    ("app", self.app.as_str()),
                    ("external_host", external_host),
                    ("format", format),
                    ("direction", "both"),
                ],
            )
            .await?;

        let host = self.channel_variable(&channel.id, "UNICASTRTP_LOCAL_ADDRESS").await?;
        let port_raw = self.channel_variable(&channel.id, "UNICASTRTP_LOCAL_PORT").await?;
        let port: u16 = port_raw
            .parse()
            .map_err(|_| BridgeError::ProtocolError(format!("invalid RTP port from switch: {port_raw}")))?;

        Ok((channel, ExternalMediaAddress { host, port }))
    }

    #[instrument(skip(self))]
    pub async fn continue_channel(&self, channel_id: &str, context: &str, extension: &str, priority: u32) -> BridgeResult<()> {
        let priority = priority.to_string();
        self.post_empty_with(
            &format!("/channels/{channel_id}/continue"),
            &[("context", context), ("extension", extension), ("priority", priority.as_str())],
        )
        .await
    }

    async fn channel_variable(&self, channel_id: &str, name: &str) -> BridgeResult<String> {
        #[derive(Deserialize)]
        struct Variable {
            value: String,
        }
        let variable: Variable = self
            .request_json(
                reqwest::Method::GET,
                &format!("/channels/{channel_id}/variable"),
                &[("variable", name)],
            )
            .await?;
        Ok(variable.value)
    }

    async fn post_empty(&self, path: &str) -> BridgeResult<()> {
        self.request(reqwest::Method::POST, path, &[]).await.map(|_| ())
    }

    async fn post_empty_with(&self, path: &str, query: &[(&str, &str)]) -> BridgeResult<()> {
        self.request(reqwest::Method::POST, path, query).await.map(|_| ())
    }

    async fn request_json<T: serde::de::DeserializeOwned>(&self, method: reqwest::Method, path: &str, query: &[(&str, &str)]) -> BridgeResult<T> {
        let response = self.request(method, path, query).await?;
        Ok(response.json().await?)
    }

    async fn request(&self, method: reqwest::Method, path: &str, query: &[(&str, &str)]) -> BridgeResult<reqwest::Response> {
        let url = format!("{}{path}", self.base_url);

        let response = self
            .http
            .request(method, url)
            .basic_auth(&self.user, Some(&self.password))
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if status.as_u16() >= 400 {
            let body = response.text().await.unwrap_or_default();
            return Err(BridgeError::ProtocolError(format!("ARI call to {path} failed: {status} {body}")));
        }
        Ok(response)
    }
}
