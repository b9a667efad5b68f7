use super::{Credentials, Directory, MemberPage};
use crate::config::ApiConfig;
use crate::urls::{ApiUrls, ListQuery};
use anyhow::{Context, Result};
use reqwest::blocking::Client;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

fn default_headers() -> HeaderMap {
    let mut h = HeaderMap::new();
    h.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
    h
}

#[derive(Deserialize)]
struct LoginResponse {
    #[serde(alias = "key", alias = "access")]
    token: String,
}

pub struct DirectoryClient {
    client: Client,
    urls: ApiUrls,
}

impl DirectoryClient {
    pub fn new(config: &ApiConfig, urls: ApiUrls) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(concat!("memberdir/", env!("CARGO_PKG_VERSION")))
            .default_headers(default_headers())
            .build()
            .context("Failed to build directory HTTP client")?;

        Ok(Self { client, urls })
    }
}

impl Directory for DirectoryClient {
    fn login(&self, credentials: &Credentials) -> Result<String> {
        let url = self.urls.login_url();
        debug!(url = %url, username = %credentials.username, "Submitting login");

        let start = Instant::now();
        let response = self
            .client
            .post(&url)
            .json(credentials)
            .send()
            .context("Login request failed")?;

        let status = response.status();
        debug!(
            status = %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Login response received"
        );

        if !status.is_success() {
            warn!(username = %credentials.username, status = %status, "Login rejected");
            anyhow::bail!("Login rejected by directory ({status})");
        }

        let body: LoginResponse = response.json().context("Failed to parse login response")?;
        if body.token.trim().is_empty() {
            anyhow::bail!("Directory returned an empty token");
        }

        Ok(body.token)
    }

    fn list_members(&self, query: &ListQuery, token: &str) -> Result<MemberPage> {
        let url = self.urls.members_list_url(query);
        debug!(url = %url, "Fetching members");

        let start = Instant::now();
        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, format!("Token {token}"))
            .send()
            .context("Members request failed")?;

        let status = response.status();
        debug!(
            status = %status,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Members response received"
        );

        if !status.is_success() {
            anyhow::bail!("Members request failed ({status})");
        }

        let body: serde_json::Value = response
            .json()
            .context("Failed to parse members response")?;

        MemberPage::from_json(body).context("Unexpected members response shape")
    }
}
