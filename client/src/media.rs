//! Client for the Jellyfin/Emby compatible media server.
//!
//! Every call returns a [`Fetched`] so callers can tell live data from the
//! built-in sample data used when the server cannot be reached.

use reqwest::header::{HeaderMap, HeaderValue, InvalidHeaderValue};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{fmt, time::Duration};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("media server request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("media server answered {0}")]
    Status(u16),
    #[error("invalid header value: {0}")]
    Header(#[from] InvalidHeaderValue),
}

/// Result of a media call that may have been served from sample data.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched<T> {
    Live(T),
    Fallback { data: T, reason: String },
}

impl<T> Fetched<T> {
    pub fn is_live(&self) -> bool {
        matches!(self, Fetched::Live(_))
    }

    pub fn data(&self) -> &T {
        match self {
            Fetched::Live(data) | Fetched::Fallback { data, .. } => data,
        }
    }

    pub fn into_inner(self) -> T {
        match self {
            Fetched::Live(data) | Fetched::Fallback { data, .. } => data,
        }
    }
}

/// Connection settings, supplied by the caller. The API key normally comes
/// from the environment and is never printed.
#[derive(Clone)]
pub struct MediaConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub client_name: String,
    pub device: String,
    pub device_id: String,
    pub version: String,
    pub timeout: Duration,
    /// Serve sample data instead of an error when a request fails.
    pub fallback_to_mock: bool,
}

impl MediaConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_key: None,
            client_name: "Portal".into(),
            device: "portal-cli".into(),
            device_id: "portal-cli".into(),
            version: env!("CARGO_PKG_VERSION").into(),
            timeout: Duration::from_secs(10),
            fallback_to_mock: true,
        }
    }
}

impl fmt::Debug for MediaConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MediaConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("client_name", &self.client_name)
            .field("device", &self.device)
            .field("device_id", &self.device_id)
            .field("version", &self.version)
            .field("timeout", &self.timeout)
            .field("fallback_to_mock", &self.fallback_to_mock)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerInfo {
    pub id: String,
    pub server_name: String,
    pub version: String,
    #[serde(default)]
    pub operating_system: Option<String>,
    #[serde(default)]
    pub local_address: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Library {
    pub name: String,
    #[serde(default)]
    pub item_id: Option<String>,
    #[serde(default)]
    pub collection_type: Option<String>,
    #[serde(default)]
    pub locations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MediaItem {
    pub id: String,
    pub name: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub production_year: Option<i32>,
    #[serde(default)]
    pub community_rating: Option<f32>,
    #[serde(default)]
    pub overview: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct ItemsPage {
    #[serde(default)]
    items: Vec<MediaItem>,
}

#[derive(Debug, Clone)]
pub struct MediaClient {
    http: reqwest::Client,
    config: MediaConfig,
}

impl MediaClient {
    pub fn new(config: MediaConfig) -> Result<Self, MediaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            "X-Emby-Authorization",
            HeaderValue::from_str(&authorization(&config))?,
        );
        if let Some(key) = &config.api_key {
            let mut token = HeaderValue::from_str(key)?;
            token.set_sensitive(true);
            headers.insert("X-MediaBrowser-Token", token);
        }
        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(config.timeout)
            .build()?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &MediaConfig {
        &self.config
    }

    pub async fn server_info(&self) -> Result<Fetched<ServerInfo>, MediaError> {
        let res = self.get("/System/Info/Public", &[]).await;
        self.settle("server_info", res, mock::server_info)
    }

    pub async fn libraries(&self) -> Result<Fetched<Vec<Library>>, MediaError> {
        let res = self.get("/Library/VirtualFolders", &[]).await;
        self.settle("libraries", res, mock::libraries)
    }

    /// Most recently added movies and series, newest first.
    pub async fn latest_items(&self, limit: usize) -> Result<Fetched<Vec<MediaItem>>, MediaError> {
        let query = [
            ("SortBy", "DateCreated".to_string()),
            ("SortOrder", "Descending".to_string()),
            ("Recursive", "true".to_string()),
            ("IncludeItemTypes", "Movie,Series".to_string()),
            ("Limit", limit.to_string()),
        ];
        let res = self
            .get::<ItemsPage>("/Items", &query)
            .await
            .map(|page| page.items);
        self.settle("latest_items", res, || {
            let mut items = mock::latest_items();
            items.truncate(limit);
            items
        })
    }

    /// Primary artwork of an item. The URL carries no credentials.
    pub fn image_url(&self, item_id: &str) -> String {
        format!(
            "{}/Items/{}/Images/Primary?quality=90",
            self.base(),
            item_id
        )
    }

    fn base(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, MediaError> {
        let url = format!("{}{}", self.base(), path);
        debug!(%url, "media request");
        let resp = self.http.get(&url).query(query).send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MediaError::Status(status.as_u16()));
        }
        Ok(resp.json().await?)
    }

    fn settle<T>(
        &self,
        op: &str,
        res: Result<T, MediaError>,
        mock: impl FnOnce() -> T,
    ) -> Result<Fetched<T>, MediaError> {
        match res {
            Ok(data) => Ok(Fetched::Live(data)),
            Err(error) if self.config.fallback_to_mock => {
                warn!(op, %error, "media server unavailable, serving sample data");
                Ok(Fetched::Fallback {
                    data: mock(),
                    reason: error.to_string(),
                })
            }
            Err(error) => Err(error),
        }
    }
}

fn authorization(config: &MediaConfig) -> String {
    let mut value = format!(
        "MediaBrowser Client=\"{}\", Device=\"{}\", DeviceId=\"{}\", Version=\"{}\"",
        config.client_name, config.device, config.device_id, config.version
    );
    if let Some(key) = &config.api_key {
        value.push_str(&format!(", Token=\"{key}\""));
    }
    value
}

mod mock {
    use super::{Library, MediaItem, ServerInfo};

    pub(super) fn server_info() -> ServerInfo {
        ServerInfo {
            id: "sample-server".into(),
            server_name: "Sample Media Server".into(),
            version: "10.8.13".into(),
            operating_system: Some("Linux".into()),
            local_address: None,
        }
    }

    pub(super) fn libraries() -> Vec<Library> {
        [("Movies", "movies"), ("TV Shows", "tvshows"), ("Music", "music")]
            .into_iter()
            .enumerate()
            .map(|(i, (name, kind))| Library {
                name: name.into(),
                item_id: Some(format!("sample-lib-{i}")),
                collection_type: Some(kind.into()),
                locations: vec![format!("/media/{kind}")],
            })
            .collect()
    }

    pub(super) fn latest_items() -> Vec<MediaItem> {
        [
            ("Midnight Harbor", "Movie", 2023, 7.4),
            ("The Long Signal", "Series", 2022, 8.1),
            ("Paper Satellites", "Movie", 2021, 6.9),
            ("Northbound", "Series", 2020, 7.8),
            ("Glass Orchard", "Movie", 2019, 7.1),
        ]
        .into_iter()
        .enumerate()
        .map(|(i, (name, kind, year, rating))| MediaItem {
            id: format!("sample-item-{i}"),
            name: name.into(),
            kind: kind.into(),
            production_year: Some(year),
            community_rating: Some(rating),
            overview: None,
        })
        .collect()
    }
}
