use crate::api::{Credentials, Directory, Member, MemberPage};
use crate::gate::{AuthGate, NavigationDecision, NavigationRequest};
use crate::routes::{RouteTable, is_local_path, local_href, referer_path};
use crate::session::{SessionStore, SharedSession, token_is_set};
use crate::urls::ListQuery;
use anyhow::{Context, Result};
use axum::{
    Form, Router,
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::{self, Next},
    response::{Html, IntoResponse, Redirect, Response},
    routing::get,
};
use serde::Deserialize;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    session: SharedSession,
    gate: Arc<AuthGate<SharedSession>>,
    directory: Arc<dyn Directory>,
    routes: Arc<RouteTable>,
}

impl AppState {
    pub fn new(session: SharedSession, directory: Arc<dyn Directory>) -> Self {
        Self {
            gate: Arc::new(AuthGate::new(Arc::clone(&session))),
            session,
            directory,
            routes: Arc::new(RouteTable::default()),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/about", get(about))
        .route("/login", get(login_form).post(login_submit))
        .route("/logout", get(logout).post(logout))
        .layer(middleware::from_fn_with_state(state.clone(), gate_middleware))
        .with_state(state)
}

async fn gate_middleware(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let full_path = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());

    let from = req
        .headers()
        .get(header::REFERER)
        .and_then(|value| value.to_str().ok())
        .and_then(referer_path)
        .map(|path| state.routes.resolve(&path));

    let navigation = NavigationRequest {
        to: state.routes.resolve(&full_path),
        from,
    };

    match state.gate.check(&navigation) {
        NavigationDecision::Proceed => next.run(req).await,
        redirect => {
            let location = redirect
                .location(&state.routes)
                .unwrap_or_else(|| "/login".to_string());
            Redirect::to(&location).into_response()
        }
    }
}

#[derive(Debug, Default)]
struct MembersParams {
    page: Option<String>,
    page_size: Option<String>,
    search: Option<String>,
}

impl MembersParams {
    /// First value wins for repeated keys; unknown keys are ignored.
    fn from_pairs(pairs: Vec<(String, String)>) -> Self {
        let mut params = Self::default();
        for (key, value) in pairs {
            let slot = match key.as_str() {
                "page" => &mut params.page,
                "page_size" => &mut params.page_size,
                "search" => &mut params.search,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value);
            }
        }
        params
    }

    /// Malformed numbers are dropped rather than rejected.
    fn into_query(self) -> ListQuery {
        let page = self
            .page
            .as_deref()
            .and_then(|p| p.trim().parse().ok())
            .unwrap_or(1);
        let mut query = ListQuery::default().with_page(page);

        if let Some(size) = self.page_size.as_deref().and_then(|s| s.trim().parse().ok()) {
            query = query.with_page_size(size);
        }
        if let Some(search) = self.search {
            query = query.with_search(search);
        }
        query
    }
}

#[derive(Debug, Default, Deserialize)]
struct LoginParams {
    redirect: Option<String>,
}

fn read_token(session: &SharedSession) -> Result<Option<String>> {
    let store = session
        .lock()
        .map_err(|_| anyhow::anyhow!("Session store lock poisoned"))?;
    Ok(store.auth_token()?.filter(|t| token_is_set(Some(t.as_str()))))
}

async fn home(
    State(state): State<AppState>,
    Query(pairs): Query<Vec<(String, String)>>,
) -> Response {
    let query = MembersParams::from_pairs(pairs).into_query();

    let token = match read_token(&state.session) {
        Ok(Some(token)) => token,
        Ok(None) => return Redirect::to("/login").into_response(),
        Err(err) => {
            error!(error = %err, "Failed to read auth token");
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Session storage is unavailable.");
        }
    };

    let directory = Arc::clone(&state.directory);
    let fetch_query = query.clone();
    let result =
        tokio::task::spawn_blocking(move || directory.list_members(&fetch_query, &token)).await;

    match result {
        Ok(Ok(page)) => {
            info!(
                page = query.effective_page(),
                count = page.results.len(),
                total = page.count,
                "Members page rendered"
            );
            Html(render_members(&query, &page)).into_response()
        }
        Ok(Err(err)) => {
            error!(error = %err, "Failed to fetch members");
            error_page(StatusCode::BAD_GATEWAY, "Could not load members from the directory.")
        }
        Err(err) => {
            error!(error = %err, "Members fetch task failed");
            error_page(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error.")
        }
    }
}

async fn about() -> Html<String> {
    Html(layout(
        "About",
        "<h1>About</h1>\n<p>Member directory client: browse members and their birthdays.</p>",
    ))
}

async fn login_form(Query(params): Query<LoginParams>) -> Html<String> {
    Html(render_login(params.redirect.as_deref(), None))
}

async fn login_submit(
    State(state): State<AppState>,
    Query(params): Query<LoginParams>,
    Form(credentials): Form<Credentials>,
) -> Response {
    let username = credentials.username.clone();
    let directory = Arc::clone(&state.directory);
    let result = tokio::task::spawn_blocking(move || directory.login(&credentials)).await;

    let token = match result {
        Ok(Ok(token)) => token,
        Ok(Err(err)) => {
            warn!(error = %err, username = %username, "Login failed");
            let page = render_login(params.redirect.as_deref(), Some("Invalid username or password."));
            return (StatusCode::UNAUTHORIZED, Html(page)).into_response();
        }
        Err(err) => {
            error!(error = %err, "Login task failed");
            return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Unexpected error.");
        }
    };

    let stored = state
        .session
        .lock()
        .map_err(|_| anyhow::anyhow!("Session store lock poisoned"))
        .and_then(|mut store| store.set_auth_token(&token));
    if let Err(err) = stored {
        error!(error = %err, "Failed to persist auth token");
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Session storage is unavailable.");
    }

    info!(username = %username, "Logged in");
    Redirect::to(&post_login_target(params.redirect.as_deref())).into_response()
}

async fn logout(State(state): State<AppState>) -> Response {
    let cleared = state
        .session
        .lock()
        .map_err(|_| anyhow::anyhow!("Session store lock poisoned"))
        .and_then(|mut store| store.clear_auth_token());
    if let Err(err) = cleared {
        error!(error = %err, "Failed to clear auth token");
        return error_page(StatusCode::INTERNAL_SERVER_ERROR, "Session storage is unavailable.");
    }

    info!("Logged out");
    Redirect::to("/login").into_response()
}

fn post_login_target(redirect: Option<&str>) -> String {
    match redirect {
        Some(target) if is_local_path(target) => target.to_string(),
        _ => "/".to_string(),
    }
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn layout(title: &str, body: &str) -> String {
    format!(
        "<!doctype html>\n<html>\n<head><meta charset=\"utf-8\"><title>{} · Members</title></head>\n\
         <body>\n<nav><a href=\"/\">Members</a> · <a href=\"/about\">About</a> · \
         <form method=\"post\" action=\"/logout\" style=\"display:inline\"><button>Log out</button></form></nav>\n\
         {}\n</body>\n</html>\n",
        escape_html(title),
        body
    )
}

fn error_page(status: StatusCode, message: &str) -> Response {
    let body = format!("<h1>Error</h1>\n<p>{}</p>", escape_html(message));
    (status, Html(layout("Error", &body))).into_response()
}

fn render_login(redirect: Option<&str>, message: Option<&str>) -> String {
    let action = match redirect {
        Some(target) => local_href("/login", &[("redirect", target)]),
        None => "/login".to_string(),
    };

    let mut body = String::from("<h1>Log in</h1>\n");
    if let Some(message) = message {
        body.push_str(&format!("<p class=\"error\">{}</p>\n", escape_html(message)));
    }
    body.push_str(&format!(
        "<form method=\"post\" action=\"{}\">\n\
         <label>Username <input name=\"username\" autocomplete=\"username\"></label>\n\
         <label>Password <input name=\"password\" type=\"password\" autocomplete=\"current-password\"></label>\n\
         <button>Log in</button>\n</form>",
        escape_html(&action)
    ));

    layout("Log in", &body)
}

/// Query pairs for a listing link, keeping the current page size and search.
fn listing_href(query: &ListQuery, page: u32) -> String {
    let mut pairs = vec![("page", page.to_string())];
    if let Some(size) = query.effective_page_size() {
        pairs.push(("page_size", size.to_string()));
    }
    if let Some(term) = query.search_term() {
        pairs.push(("search", term.to_string()));
    }
    local_href("/", &pairs)
}

fn render_member_row(member: &Member) -> String {
    let birthday = member.birthday_date();
    let class = if birthday.is_valid() { "" } else { " class=\"missing\"" };
    format!(
        "<tr data-id=\"{}\"><td>{}</td><td>{}</td><td>{}</td><td{class}>{}</td><td{class}>{}</td></tr>\n",
        escape_html(&member.display_id()),
        escape_html(member.display_name()),
        escape_html(member.email.as_deref().unwrap_or("")),
        escape_html(member.phone.as_deref().unwrap_or("")),
        escape_html(&member.birthday_display(true)),
        escape_html(&member.birthday_display(false)),
    )
}

fn render_members(query: &ListQuery, page: &MemberPage) -> String {
    let mut body = format!(
        "<h1>Members</h1>\n\
         <form method=\"get\" action=\"/\">\
         <input name=\"search\" value=\"{}\" placeholder=\"Search\">{}<button>Search</button></form>\n",
        escape_html(query.search_term().unwrap_or("")),
        query
            .effective_page_size()
            .map(|size| format!("<input type=\"hidden\" name=\"page_size\" value=\"{size}\">"))
            .unwrap_or_default(),
    );

    if page.results.is_empty() {
        body.push_str("<p>No members found.</p>\n");
    } else {
        body.push_str(
            "<table>\n<tr><th>Name</th><th>Email</th><th>Phone</th><th>Birthday</th><th>Born</th></tr>\n",
        );
        for member in &page.results {
            body.push_str(&render_member_row(member));
        }
        body.push_str("</table>\n");
    }

    let current = query.effective_page();
    body.push_str(&format!("<p>{} members · page {}</p>\n<nav>", page.count, current));
    if page.previous.is_some() && current > 1 {
        body.push_str(&format!(
            "<a rel=\"prev\" href=\"{}\">Previous</a> ",
            escape_html(&listing_href(query, current - 1))
        ));
    }
    if page.next.is_some() {
        body.push_str(&format!(
            "<a rel=\"next\" href=\"{}\">Next</a>",
            escape_html(&listing_href(query, current + 1))
        ));
    }
    body.push_str("</nav>");

    layout("Members", &body)
}

pub fn start(state: AppState, port: u16, running: Arc<AtomicBool>) -> Result<()> {
    let app = router(state);

    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create tokio runtime for web server")?;

    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
            .await
            .with_context(|| format!("Web server failed to bind port {port}"))?;

        info!(port, "Web server listening");

        let shutdown = async move {
            while running.load(Ordering::SeqCst) {
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
            info!("Web server shutting down");
        };

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
            .context("Web server error")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::MemorySessionStore;
    use axum::body::Body;
    use axum::http::Request as HttpRequest;
    use serde_json::json;
    use std::sync::Mutex;
    use tower::ServiceExt;

    #[derive(Default)]
    struct FakeDirectory {
        fetches: Mutex<Vec<(ListQuery, String)>>,
        fail_listing: bool,
    }

    impl Directory for FakeDirectory {
        fn login(&self, credentials: &Credentials) -> Result<String> {
            if credentials.username == "ana" && credentials.password == "secret" {
                Ok("tok-1".to_string())
            } else {
                anyhow::bail!("Login rejected by directory (401 Unauthorized)")
            }
        }

        fn list_members(&self, query: &ListQuery, token: &str) -> Result<MemberPage> {
            self.fetches
                .lock()
                .unwrap()
                .push((query.clone(), token.to_string()));
            if self.fail_listing {
                anyhow::bail!("Members request failed (500 Internal Server Error)");
            }
            MemberPage::from_json(json!({
                "count": 40,
                "next": "http://localhost:8000/api/members/?page=3",
                "previous": "http://localhost:8000/api/members/?page=1",
                "results": [
                    { "id": "m-1", "name": "Ana Souza", "birthday": "1990-03-05" },
                    { "id": 2, "name": "<b>Bruno</b>", "birthday": null }
                ]
            }))
        }
    }

    fn session(token: Option<&str>) -> SharedSession {
        let store = token.map(MemorySessionStore::with_token).unwrap_or_default();
        Arc::new(Mutex::new(store))
    }

    fn app(session: &SharedSession, directory: &Arc<FakeDirectory>) -> Router {
        let directory: Arc<dyn Directory> = directory.clone();
        router(AppState::new(Arc::clone(session), directory))
    }

    async fn get(app: Router, uri: &str) -> Response {
        let req = HttpRequest::builder().uri(uri).body(Body::empty()).unwrap();
        app.oneshot(req).await.unwrap()
    }

    async fn post_form(app: Router, uri: &str, form: &str) -> Response {
        let req = HttpRequest::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(form.to_string()))
            .unwrap();
        app.oneshot(req).await.unwrap()
    }

    fn location(resp: &Response) -> &str {
        resp.headers()
            .get(header::LOCATION)
            .unwrap()
            .to_str()
            .unwrap()
    }

    async fn body_text(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn stored_token(session: &SharedSession) -> Option<String> {
        session.lock().unwrap().auth_token().unwrap()
    }

    #[tokio::test]
    async fn anonymous_home_redirects_to_login_with_full_path() {
        let directory = Arc::new(FakeDirectory::default());
        let resp = get(app(&session(None), &directory), "/?page=2").await;

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login?redirect=%2F%3Fpage%3D2");
        assert!(directory.fetches.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn public_pages_need_no_session() {
        let directory = Arc::new(FakeDirectory::default());

        let resp = get(app(&session(None), &directory), "/about").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get(app(&session(None), &directory), "/login?redirect=%2F%3Fpage%3D2").await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(body_text(resp).await.contains("action=\"/login?redirect=%2F%3Fpage%3D2\""));
    }

    #[tokio::test]
    async fn authenticated_home_lists_members() {
        let directory = Arc::new(FakeDirectory::default());
        let resp = get(
            app(&session(Some("tok-1")), &directory),
            "/?page=2&page_size=10&search=%20ana%20",
        )
        .await;

        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_text(resp).await;
        assert!(body.contains("<tr data-id=\"m-1\"><td>Ana Souza</td>"));
        assert!(body.contains(">05/03<"));
        assert!(body.contains(">05/03/1990<"));
        assert!(body.contains("--/--/----"));
        assert!(body.contains("&lt;b&gt;Bruno&lt;/b&gt;"));
        assert!(body.contains("href=\"/?page=1&amp;page_size=10&amp;search=ana\""));
        assert!(body.contains("href=\"/?page=3&amp;page_size=10&amp;search=ana\""));

        let fetches = directory.fetches.lock().unwrap();
        let (query, token) = &fetches[0];
        assert_eq!(query.page, 2);
        assert_eq!(query.page_size, Some(10));
        assert_eq!(query.search_term(), Some("ana"));
        assert_eq!(token, "tok-1");
    }

    #[tokio::test]
    async fn malformed_listing_params_fall_back() {
        let directory = Arc::new(FakeDirectory::default());
        let resp = get(app(&session(Some("tok-1")), &directory), "/?page=abc&page_size=x").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let fetches = directory.fetches.lock().unwrap();
        assert_eq!(fetches[0].0, ListQuery::default());
    }

    #[tokio::test]
    async fn repeated_listing_params_keep_first_value() {
        let directory = Arc::new(FakeDirectory::default());

        let resp = get(app(&session(Some("tok-1")), &directory), "/?page=1&page=2").await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = get(
            app(&session(Some("tok-1")), &directory),
            "/?search=a&search=b&page_size=5&page_size=9",
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let fetches = directory.fetches.lock().unwrap();
        assert_eq!(fetches[0].0.page, 1);
        assert_eq!(fetches[1].0.search_term(), Some("a"));
        assert_eq!(fetches[1].0.page_size, Some(5));
    }

    #[tokio::test]
    async fn directory_failure_is_a_bad_gateway() {
        let directory = Arc::new(FakeDirectory {
            fail_listing: true,
            ..Default::default()
        });
        let resp = get(app(&session(Some("tok-1")), &directory), "/").await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn login_stores_token_and_returns_to_destination() {
        let session = session(None);
        let directory = Arc::new(FakeDirectory::default());
        let resp = post_form(
            app(&session, &directory),
            "/login?redirect=%2F%3Fpage%3D2",
            "username=ana&password=secret",
        )
        .await;

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/?page=2");
        assert_eq!(stored_token(&session), Some("tok-1".to_string()));

        let resp = get(app(&session, &directory), "/").await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn login_ignores_off_site_redirect() {
        let session = session(None);
        let directory = Arc::new(FakeDirectory::default());
        let resp = post_form(
            app(&session, &directory),
            "/login?redirect=https%3A%2F%2Fevil.example",
            "username=ana&password=secret",
        )
        .await;

        assert_eq!(location(&resp), "/");
    }

    #[tokio::test]
    async fn failed_login_rerenders_form() {
        let session = session(None);
        let directory = Arc::new(FakeDirectory::default());
        let resp = post_form(app(&session, &directory), "/login", "username=ana&password=nope").await;

        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        assert!(body_text(resp).await.contains("Invalid username or password."));
        assert_eq!(stored_token(&session), None);
    }

    #[tokio::test]
    async fn logout_clears_token() {
        let session = session(Some("tok-1"));
        let directory = Arc::new(FakeDirectory::default());
        let resp = post_form(app(&session, &directory), "/logout", "").await;

        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
        assert_eq!(stored_token(&session), None);

        let resp = get(app(&session, &directory), "/").await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
    }

    #[test]
    fn escape_html_covers_markup() {
        assert_eq!(
            escape_html(r#"<a href="x">'&'</a>"#),
            "&lt;a href=&quot;x&quot;&gt;&#39;&amp;&#39;&lt;/a&gt;"
        );
    }
}
