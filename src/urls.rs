use crate::config::ApiConfig;
use anyhow::{Context, Result};
use reqwest::Url;

const API_PREFIX: &str = "api/";
const MEMBERS_PATH: &str = "members/";
const LOGIN_PATH: &str = "login/";

/// Pagination and search parameters for the members listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListQuery {
    /// 1-based page number. Zero is sent as page 1.
    pub page: u32,
    pub page_size: Option<u32>,
    pub search: Option<String>,
}

impl Default for ListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            page_size: None,
            search: None,
        }
    }
}

impl ListQuery {
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = page;
        self
    }

    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = Some(page_size);
        self
    }

    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    pub fn effective_page(&self) -> u32 {
        self.page.max(1)
    }

    /// Page size to send, if any. Zero counts as unset.
    pub fn effective_page_size(&self) -> Option<u32> {
        self.page_size.filter(|size| *size > 0)
    }

    /// Trimmed search term, or `None` when it is blank.
    pub fn search_term(&self) -> Option<&str> {
        self.search
            .as_deref()
            .map(str::trim)
            .filter(|term| !term.is_empty())
    }
}

/// Endpoint addresses of the directory backend, resolved once from the
/// configured API host.
#[derive(Debug, Clone)]
pub struct ApiUrls {
    members: Url,
    login: Url,
}

impl ApiUrls {
    pub fn new(host: &str) -> Result<Self> {
        let host = host.trim().trim_end_matches('/');
        let base = Url::parse(&format!("{host}/"))
            .with_context(|| format!("Invalid API host: {host}"))?;

        if !matches!(base.scheme(), "http" | "https") {
            anyhow::bail!("API host must use http or https: {host}");
        }

        let api = base
            .join(API_PREFIX)
            .with_context(|| format!("Failed to build API base from {host}"))?;

        Ok(Self {
            members: api.join(MEMBERS_PATH).context("Failed to build members URL")?,
            login: api.join(LOGIN_PATH).context("Failed to build login URL")?,
        })
    }

    pub fn from_config(config: &ApiConfig) -> Result<Self> {
        Self::new(config.host())
    }

    /// `{host}/api/members/?page=N[&page_size=S][&search=T]`, in that order.
    pub fn members_list_url(&self, query: &ListQuery) -> String {
        let mut url = self.members.clone();
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("page", &query.effective_page().to_string());
            if let Some(size) = query.effective_page_size() {
                pairs.append_pair("page_size", &size.to_string());
            }
            if let Some(term) = query.search_term() {
                pairs.append_pair("search", term);
            }
        }
        url.into()
    }

    pub fn login_url(&self) -> String {
        self.login.to_string()
    }
}
