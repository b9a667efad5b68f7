use reqwest::Url;

pub const HOME_ROUTE: &str = "home";
pub const ABOUT_ROUTE: &str = "about";
pub const LOGIN_ROUTE: &str = "login";

const LOCAL_ORIGIN: &str = "http://localhost/";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteMeta {
    pub requires_auth: bool,
}

/// A resolved navigation target: the matched route name (if any), the path
/// as requested including its query string, and the route's metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub name: Option<String>,
    pub full_path: String,
    pub meta: RouteMeta,
}

impl RouteTarget {
    pub fn is_named(&self, name: &str) -> bool {
        self.name.as_deref() == Some(name)
    }
}

#[derive(Debug, Clone)]
pub struct RouteDef {
    pub path: &'static str,
    pub name: &'static str,
    pub meta: RouteMeta,
}

pub struct RouteTable {
    routes: Vec<RouteDef>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self::new(vec![
            RouteDef {
                path: "/",
                name: HOME_ROUTE,
                meta: RouteMeta {
                    requires_auth: true,
                },
            },
            RouteDef {
                path: "/about",
                name: ABOUT_ROUTE,
                meta: RouteMeta::default(),
            },
            RouteDef {
                path: "/login",
                name: LOGIN_ROUTE,
                meta: RouteMeta::default(),
            },
        ])
    }
}

impl RouteTable {
    pub fn new(routes: Vec<RouteDef>) -> Self {
        Self { routes }
    }

    /// Match a request path (with optional query/fragment) against the table.
    /// Unknown paths resolve to an unnamed target that does not require auth.
    pub fn resolve(&self, full_path: &str) -> RouteTarget {
        let path = full_path
            .split(['?', '#'])
            .next()
            .filter(|p| !p.is_empty())
            .unwrap_or("/");

        match self.routes.iter().find(|route| route.path == path) {
            Some(route) => RouteTarget {
                name: Some(route.name.to_string()),
                full_path: full_path.to_string(),
                meta: route.meta,
            },
            None => RouteTarget {
                name: None,
                full_path: full_path.to_string(),
                meta: RouteMeta::default(),
            },
        }
    }

    pub fn path_for(&self, name: &str) -> Option<&'static str> {
        self.routes
            .iter()
            .find(|route| route.name == name)
            .map(|route| route.path)
    }
}

/// Build a site-local href from a path and query pairs, query-escaped.
pub fn local_href<K, V>(path: &str, pairs: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let Ok(mut url) = Url::parse(LOCAL_ORIGIN) else {
        return path.to_string();
    };
    url.set_path(path);
    if !pairs.is_empty() {
        let mut query = url.query_pairs_mut();
        for (key, value) in pairs {
            query.append_pair(key.as_ref(), value.as_ref());
        }
    }

    match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    }
}

/// Path and query of a `Referer` value, if it is a parseable URL.
pub fn referer_path(referer: &str) -> Option<String> {
    let url = Url::parse(referer).ok()?;
    Some(match url.query() {
        Some(query) => format!("{}?{}", url.path(), query),
        None => url.path().to_string(),
    })
}

/// Whether `target` is safe to redirect to after login: a path on this
/// site, not a scheme-relative or absolute URL.
pub fn is_local_path(target: &str) -> bool {
    target.starts_with('/') && !target.starts_with("//") && !target.contains('\\')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_configured_routes() {
        let table = RouteTable::default();

        let home = table.resolve("/?page=2");
        assert!(home.is_named(HOME_ROUTE));
        assert!(home.meta.requires_auth);
        assert_eq!(home.full_path, "/?page=2");

        let login = table.resolve("/login?redirect=%2F");
        assert!(login.is_named(LOGIN_ROUTE));
        assert!(!login.meta.requires_auth);

        assert!(!table.resolve("/about").meta.requires_auth);
    }

    #[test]
    fn unknown_path_needs_no_auth() {
        let target = RouteTable::default().resolve("/nowhere");
        assert_eq!(target.name, None);
        assert!(!target.meta.requires_auth);
    }

    #[test]
    fn path_for_known_name() {
        let table = RouteTable::default();
        assert_eq!(table.path_for(LOGIN_ROUTE), Some("/login"));
        assert_eq!(table.path_for("missing"), None);
    }

    #[test]
    fn local_href_escapes_query() {
        assert_eq!(
            local_href("/login", &[("redirect", "/?page=2&search=ana")]),
            "/login?redirect=%2F%3Fpage%3D2%26search%3Dana"
        );
        assert_eq!(local_href::<&str, &str>("/about", &[]), "/about");
    }

    #[test]
    fn referer_path_keeps_query() {
        assert_eq!(
            referer_path("http://localhost:8080/?page=3"),
            Some("/?page=3".to_string())
        );
        assert_eq!(referer_path("garbage"), None);
    }

    #[test]
    fn only_local_redirects_are_allowed() {
        assert!(is_local_path("/"));
        assert!(is_local_path("/?page=2"));
        assert!(!is_local_path("//evil.example"));
        assert!(!is_local_path("https://evil.example"));
        assert!(!is_local_path("/\\evil.example"));
    }
}
