use std::path::Path;
use std::sync::Arc;

use futures_util::StreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::auth::{Authenticator, Token};
use super::error::SourceError;
use super::{Event, EventId, EventSource};

pub const API_BASE: &str = "https://api.ring.com";

/// A camera or doorbell as listed by `/clients_api/ring_devices`.
#[derive(Debug, Clone, Deserialize)]
pub struct Device {
    pub id: u64,
    pub description: String,
    #[serde(default)]
    pub kind: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DevicesResponse {
    #[serde(default)]
    doorbots: Vec<Device>,
    #[serde(default)]
    authorized_doorbots: Vec<Device>,
    #[serde(default)]
    stickup_cams: Vec<Device>,
}

#[derive(Debug, Deserialize)]
struct HistoryEntry {
    id: u64,
    created_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Deserialize)]
struct RecordingUrl {
    url: String,
}

/// Authenticated Ring API client. Cheap to clone; clones share the token so
/// a refresh performed by one request is seen by all others.
#[derive(Debug, Clone)]
pub struct RingClient {
    http: Client,
    api_base: String,
    auth: Arc<Authenticator>,
    token: Arc<RwLock<Token>>,
}

impl RingClient {
    /// Reuses the authenticator's HTTP client, so API calls and recording
    /// transfers share its user agent and timeouts.
    pub fn new(auth: Authenticator, token: Token) -> Self {
        Self {
            http: auth.http().clone(),
            api_base: API_BASE.to_string(),
            auth: Arc::new(auth),
            token: Arc::new(RwLock::new(token)),
        }
    }

    #[cfg(test)]
    pub fn with_api_base(mut self, api_base: &str) -> Self {
        self.api_base = api_base.trim_end_matches('/').to_string();
        self
    }

    /// Authorized GET against the API. A 401 triggers one token refresh and
    /// a single replay of the request.
    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Response, SourceError> {
        let url = format!("{}{}", self.api_base, path);
        let access = self.token.read().await.access_token.clone();
        let response = self.send_get(&url, query, &access).await?;

        let response = if response.status() == StatusCode::UNAUTHORIZED {
            tracing::debug!("Access token rejected, refreshing");
            let mut token = self.token.write().await;
            // Another request may have refreshed while we waited for the lock.
            if token.access_token == access {
                let refreshed = self.auth.refresh(&token).await?;
                *token = refreshed;
            }
            let access = token.access_token.clone();
            drop(token);
            self.send_get(&url, query, &access).await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url,
            });
        }
        Ok(response)
    }

    async fn send_get(
        &self,
        url: &str,
        query: &[(&str, String)],
        access_token: &str,
    ) -> Result<Response, SourceError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(access_token)
            .header("hardware_id", self.auth.hardware_id())
            .query(query)
            .send()
            .await?;
        Ok(response)
    }

    /// Every camera-like device on the account.
    pub async fn devices(&self) -> Result<Vec<Device>, SourceError> {
        let response = self.get("/clients_api/ring_devices", &[]).await?;
        let devices: DevicesResponse = response.json().await?;
        Ok(devices
            .doorbots
            .into_iter()
            .chain(devices.authorized_doorbots)
            .chain(devices.stickup_cams)
            .collect())
    }

    /// Look up a device by its display name and bind a [`Camera`] to it.
    pub async fn find_device(&self, name: &str) -> Result<Camera, SourceError> {
        let devices = self.devices().await?;
        match devices.iter().find(|d| d.description == name) {
            Some(device) => Ok(Camera {
                client: self.clone(),
                device: device.clone(),
            }),
            None => Err(SourceError::DeviceNotFound {
                name: name.to_string(),
                available: devices.into_iter().map(|d| d.description).collect(),
            }),
        }
    }
}

/// Camera handle implementing [`EventSource`] over the Ring history API.
#[derive(Debug, Clone)]
pub struct Camera {
    client: RingClient,
    device: Device,
}

impl Camera {
    pub fn device(&self) -> &Device {
        &self.device
    }
}

#[async_trait::async_trait]
impl EventSource for Camera {
    fn device_name(&self) -> &str {
        &self.device.description
    }

    async fn history(&self, older_than: EventId, limit: usize) -> Result<Vec<Event>, SourceError> {
        let path = format!("/clients_api/doorbots/{}/history", self.device.id);
        let mut query = vec![("limit", limit.to_string())];
        if older_than != EventId::NEWEST {
            query.push(("older_than", older_than.to_string()));
        }
        let response = self.client.get(&path, &query).await?;
        let entries: Vec<HistoryEntry> = response.json().await?;
        Ok(entries
            .into_iter()
            .map(|entry| Event {
                id: EventId(entry.id),
                created_at: entry.created_at,
                device_name: self.device.description.clone(),
            })
            .collect())
    }

    async fn download(&self, id: EventId, dest: &Path) -> Result<(), SourceError> {
        // The recording endpoint hands back a short-lived signed URL; the
        // bytes themselves come from that URL without bearer auth.
        let path = format!("/clients_api/dings/{}/recording", id);
        let response = self
            .client
            .get(&path, &[("disable_redirect", "true".to_string())])
            .await?;
        let recording: RecordingUrl = response.json().await?;
        if recording.url.is_empty() {
            return Err(SourceError::UnexpectedResponse(format!(
                "recording {} has no download url",
                id
            )));
        }

        let response = self.client.http.get(&recording.url).send().await?;
        if !response.status().is_success() {
            return Err(SourceError::HttpStatus {
                status: response.status().as_u16(),
                url: recording.url,
            });
        }

        let content_length = response.content_length();
        let mut file = File::create(dest).await?;
        let mut bytes_written: u64 = 0;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| {
                SourceError::Disconnected(format!(
                    "recording {} body ended after {} bytes: {}",
                    id, bytes_written, e
                ))
            })?;
            file.write_all(&chunk).await?;
            bytes_written += chunk.len() as u64;
        }
        file.flush().await?;

        if let Some(expected) = content_length {
            if bytes_written < expected {
                return Err(SourceError::Disconnected(format!(
                    "recording {} truncated at {}/{} bytes",
                    id, bytes_written, expected
                )));
            }
        }
        Ok(())
    }
}
