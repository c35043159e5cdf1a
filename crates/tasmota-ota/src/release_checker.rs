// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of Tasmota OTA.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! GitHub API release checking module

use crate::config::ReleaseSettings;
use crate::error::{Result, UpdateError};
use crate::release::ReleaseInfo;
use chrono::Utc;
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};

pub const DEFAULT_RELEASE_PAGE: &str = "https://github.com/arendst/Tasmota/releases/latest";

const USER_AGENT: &str = concat!("tasmota-ota/", env!("CARGO_PKG_VERSION"));
const GITHUB_ACCEPT: &str = "application/vnd.github.v3+json";

#[derive(Debug, Deserialize, Serialize)]
struct GithubRelease {
    tag_name: String,
    #[serde(default)]
    html_url: Option<String>,
    #[serde(default)]
    body: Option<String>,
}

/// Where the latest Tasmota release is fetched from
#[derive(Debug, Clone)]
pub struct ReleaseSource {
    client: reqwest::Client,
    url: String,
}

impl ReleaseSource {
    pub fn new(settings: &ReleaseSettings) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(settings.fetch_timeout())
            .build()
            .map_err(|e| UpdateError::Config(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: settings.latest_release_url(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Fetch and parse the latest release
    pub async fn fetch_latest(&self) -> Result<ReleaseInfo> {
        let response = self
            .client
            .get(&self.url)
            .header(ACCEPT, GITHUB_ACCEPT)
            .send()
            .await
            .map_err(request_error)?;

        if let Some(remaining) = response.headers().get("x-ratelimit-remaining")
            && let Ok(remaining_str) = remaining.to_str()
            && let Ok(remaining_int) = remaining_str.parse::<u32>()
            && remaining_int < 10
        {
            tracing::warn!("GitHub rate limit low: {remaining_int} remaining");
        }

        let status = response.status();
        if !status.is_success() {
            return Err(UpdateError::FetchHttp {
                status: status.as_u16(),
            });
        }

        let body = response.text().await.map_err(request_error)?;
        let release: GithubRelease = serde_json::from_str(&body)
            .map_err(|e| UpdateError::FetchParse(format!("Failed to parse response: {e}")))?;

        let info = ReleaseInfo::from_tag(
            &release.tag_name,
            release
                .html_url
                .unwrap_or_else(|| DEFAULT_RELEASE_PAGE.to_owned()),
            release.body.unwrap_or_default(),
            Utc::now(),
        )
        .map_err(|e| UpdateError::FetchParse(format!("Bad tag '{}': {e}", release.tag_name)))?;

        tracing::debug!(
            "Fetched latest Tasmota release: {} ({})",
            info.version,
            info.release_url
        );

        Ok(info)
    }
}

fn request_error(e: reqwest::Error) -> UpdateError {
    if e.is_timeout() {
        UpdateError::FetchTimeout
    } else {
        UpdateError::FetchRequest(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::SemanticVersion;
    use mockito::Server;
    use serde_json::json;

    const LATEST_PATH: &str = "/repos/arendst/Tasmota/releases/latest";

    fn settings(base_url: String) -> ReleaseSettings {
        ReleaseSettings {
            api_base_url: base_url,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_fetch_latest_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LATEST_PATH)
            .match_header("accept", GITHUB_ACCEPT)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                json!({
                    "tag_name": "v14.3.0",
                    "html_url": "https://github.com/arendst/Tasmota/releases/tag/v14.3.0",
                    "body": "## Tasmota v14.3.0 *Rudolph*\n\n- Added things",
                })
                .to_string(),
            )
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        let info = source.fetch_latest().await.unwrap();

        assert_eq!(info.version, SemanticVersion::new(14, 3, 0));
        assert_eq!(
            info.release_url,
            "https://github.com/arendst/Tasmota/releases/tag/v14.3.0"
        );
        assert_eq!(info.release_summary, "Tasmota v14.3.0 Rudolph");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_latest_defaults_missing_fields() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LATEST_PATH)
            .with_status(200)
            .with_body(json!({ "tag_name": "v14.3.0" }).to_string())
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        let info = source.fetch_latest().await.unwrap();

        assert_eq!(info.release_url, DEFAULT_RELEASE_PAGE);
        assert_eq!(info.release_notes, "");
        assert_eq!(info.release_summary, "");

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_latest_http_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LATEST_PATH)
            .with_status(403)
            .with_header("x-ratelimit-remaining", "0")
            .with_body(json!({"message": "API rate limit exceeded"}).to_string())
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        let result = source.fetch_latest().await;

        assert!(matches!(result, Err(UpdateError::FetchHttp { status: 403 })));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_latest_malformed_body() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", LATEST_PATH)
            .with_status(200)
            .with_body("<html>not json</html>")
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        let result = source.fetch_latest().await;

        assert!(matches!(result, Err(UpdateError::FetchParse(_))));

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_latest_missing_tag() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", LATEST_PATH)
            .with_status(200)
            .with_body(json!({ "html_url": "x" }).to_string())
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        assert!(matches!(
            source.fetch_latest().await,
            Err(UpdateError::FetchParse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_latest_unparseable_tag() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", LATEST_PATH)
            .with_status(200)
            .with_body(json!({ "tag_name": "nightly" }).to_string())
            .create_async()
            .await;

        let source = ReleaseSource::new(&settings(server.url())).unwrap();
        assert!(matches!(
            source.fetch_latest().await,
            Err(UpdateError::FetchParse(_))
        ));
    }

    #[tokio::test]
    async fn test_fetch_latest_connection_refused() {
        let source = ReleaseSource::new(&settings("http://127.0.0.1:1".to_owned())).unwrap();
        assert!(matches!(
            source.fetch_latest().await,
            Err(UpdateError::FetchRequest(_) | UpdateError::FetchTimeout)
        ));
    }
}
