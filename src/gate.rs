//! Navigation authentication gate.
//!
//! Every navigation attempt is checked against the target route's
//! `requires_auth` flag and the persisted session state, read fresh each time.
//! [`decide`] holds the whole policy and does no I/O; [`AuthGate`] supplies the
//! session state and records the outcome.

use crate::routes::{LOGIN_ROUTE, RouteTable, RouteTarget, local_href};
use crate::session::SessionState;
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Query parameter carrying the originally requested path through login.
pub const REDIRECT_PARAM: &str = "redirect";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NavigationRequest {
    pub to: RouteTarget,
    pub from: Option<RouteTarget>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NavigationDecision {
    Proceed,
    RedirectTo {
        name: String,
        query: BTreeMap<String, String>,
    },
}

impl NavigationDecision {
    /// Site-local href for a redirect, or `None` for `Proceed` and for
    /// route names the table does not know.
    pub fn location(&self, routes: &RouteTable) -> Option<String> {
        match self {
            NavigationDecision::Proceed => None,
            NavigationDecision::RedirectTo { name, query } => {
                let path = routes.path_for(name)?;
                let pairs: Vec<(&str, &str)> = query
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                Some(local_href(path, &pairs))
            }
        }
    }
}

/// The gate policy: a pure function of the target and the session state.
pub fn decide(to: &RouteTarget, is_authenticated: bool) -> NavigationDecision {
    if !to.meta.requires_auth || is_authenticated {
        return NavigationDecision::Proceed;
    }

    // Login itself may be marked as protected; sending it to itself would loop.
    if to.is_named(LOGIN_ROUTE) {
        return NavigationDecision::Proceed;
    }

    NavigationDecision::RedirectTo {
        name: LOGIN_ROUTE.to_string(),
        query: BTreeMap::from([(REDIRECT_PARAM.to_string(), to.full_path.clone())]),
    }
}

pub struct AuthGate<S> {
    session: S,
}

impl<S: SessionState> AuthGate<S> {
    pub fn new(session: S) -> Self {
        Self { session }
    }

    pub fn check(&self, request: &NavigationRequest) -> NavigationDecision {
        let is_authenticated = self.session.is_authenticated();
        let decision = decide(&request.to, is_authenticated);

        let from = request.from.as_ref().map(|f| f.full_path.as_str()).unwrap_or("-");
        match &decision {
            NavigationDecision::Proceed => debug!(
                to = %request.to.full_path,
                from,
                is_authenticated,
                "Navigation allowed"
            ),
            NavigationDecision::RedirectTo { name, .. } => info!(
                to = %request.to.full_path,
                from,
                redirect_to = %name,
                "Navigation requires login, redirecting"
            ),
        }

        decision
    }
}
