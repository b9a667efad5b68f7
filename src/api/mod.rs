mod client;

pub use client::DirectoryClient;

use crate::dates::{CanonicalDate, RawDate, format_date, normalize_date};
use crate::urls::ListQuery;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The membership-directory backend as seen by the view layer.
pub trait Directory: Send + Sync {
    /// Exchange credentials for an auth token.
    fn login(&self, credentials: &Credentials) -> Result<String>;

    /// Fetch one page of the members listing.
    fn list_members(&self, query: &ListQuery, token: &str) -> Result<MemberPage>;
}

#[derive(Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"******")
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Member {
    #[serde(default)]
    pub id: Value,

    #[serde(default, alias = "full_name")]
    pub name: Option<String>,

    #[serde(default)]
    pub email: Option<String>,

    #[serde(default)]
    pub phone: Option<String>,

    #[serde(default, alias = "birth_date", alias = "birthdate")]
    pub birthday: Value,
}

impl Member {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or("")
    }

    /// Identifier as plain text; string ids lose their JSON quotes.
    pub fn display_id(&self) -> String {
        match &self.id {
            Value::String(s) => s.clone(),
            Value::Null => String::new(),
            other => other.to_string(),
        }
    }

    pub fn birthday_date(&self) -> CanonicalDate {
        normalize_date(RawDate::from_json(&self.birthday))
    }

    /// Birthday as `dd/mm/yyyy`, or `dd/mm` with `omit_year`.
    pub fn birthday_display(&self, omit_year: bool) -> String {
        format_date(self.birthday_date(), omit_year)
    }
}

/// One page of the members listing.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MemberPage {
    #[serde(default)]
    pub count: u64,

    #[serde(default)]
    pub next: Option<String>,

    #[serde(default)]
    pub previous: Option<String>,

    pub results: Vec<Member>,
}

/// The listing endpoint answers either with a paginated envelope or, when
/// pagination is disabled server-side, with a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum MembersResponse {
    Paged(MemberPage),
    Bare(Vec<Member>),
}

impl From<MembersResponse> for MemberPage {
    fn from(response: MembersResponse) -> Self {
        match response {
            MembersResponse::Paged(page) => page,
            MembersResponse::Bare(results) => MemberPage {
                count: results.len() as u64,
                next: None,
                previous: None,
                results,
            },
        }
    }
}

impl MemberPage {
    pub fn from_json(body: Value) -> Result<Self> {
        let response: MembersResponse = serde_json::from_value(body)?;
        Ok(response.into())
    }
}
