// Copyright (C) 2025 Kevin Exton
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.
use crate::accounts::{Accounts, AuthError, EmailForm, LoginForm, Outcome, RegisterForm, ResetForm};
use crate::gate::{AuthState, Gate};
use crate::session::cookie::{parse_cookie, SESSION_COOKIE};
use crate::session::{Flash, SessionContext, SessionManager};
use axum::{
    extract::{Form, Query, Request, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Redirect, Response},
    routing::{get, post},
    Extension, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::Mutex;

/// The request's session, shared between the middleware that loads and commits
/// it and the handler that mutates it.
pub type SharedSession = Arc<Mutex<SessionContext>>;

/// Rendering collaborator. Produces the response for a named page.
pub trait Renderer: Send + Sync {
    fn render(&self, status: StatusCode, page: &str, data: Value) -> Response;
}

/// Emits the page payload as JSON; HTML templates plug in behind the same trait.
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render(&self, status: StatusCode, page: &str, data: Value) -> Response {
        (status, Json(json!({ "page": page, "data": data }))).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pub accounts: Accounts,
    pub sessions: SessionManager,
    pub gate: Gate,
    pub renderer: Arc<dyn Renderer>,
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

pub fn router(state: AppState) -> Router {
    let protected = Router::new()
        .route("/profile", get(profile))
        .route("/profile/delete", post(delete_account))
        .route_layer(middleware::from_fn(require_authentication));

    Router::new()
        .route("/", get(home))
        .route("/auth/login", get(login_page).post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/signup", get(signup_page).post(signup))
        .route("/auth/register", get(register_page).post(register))
        .route("/auth/reset", get(forgot_page).post(forgot))
        .route("/auth/reset/update", get(reset_page).post(reset))
        .merge(protected)
        .layer(middleware::from_fn_with_state(state.clone(), authenticate))
        .layer(middleware::from_fn_with_state(state.clone(), load_and_save))
        .with_state(state)
}

pub async fn run_server(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "HTTP server listening");
    axum::serve(listener, router(state).into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

// --- middleware ---

/// Loads the session named by the cookie, runs the request, then commits the
/// session and re-issues the cookie when it changed.
async fn load_and_save(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let token = parse_cookie(req.headers(), SESSION_COOKIE);
    let ctx = match state.sessions.load(token.as_deref()).await {
        Ok(ctx) => ctx,
        Err(e) => return server_error(&e),
    };
    let session: SharedSession = Arc::new(Mutex::new(ctx));
    req.extensions_mut().insert(session.clone());

    let mut response = next.run(req).await;

    let mut ctx = session.lock().await;
    match state.sessions.commit(&mut ctx).await {
        Ok(Some(cookie)) => match HeaderValue::from_str(&cookie) {
            Ok(value) => {
                let headers = response.headers_mut();
                headers.append(header::SET_COOKIE, value);
                headers.append(header::VARY, HeaderValue::from_static("Cookie"));
                headers
                    .entry(header::CACHE_CONTROL)
                    .or_insert(HeaderValue::from_static(r#"no-cache="Set-Cookie""#));
            }
            Err(e) => return server_error(&e),
        },
        Ok(None) => {}
        Err(e) => return server_error(&e),
    }
    response
}

/// Runs the gate and stores its verdict for the handlers.
async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    let Some(session) = req.extensions().get::<SharedSession>().cloned() else {
        tracing::error!("authenticate ran without a loaded session");
        return StatusCode::INTERNAL_SERVER_ERROR.into_response();
    };
    let verdict = {
        let ctx = session.lock().await;
        state.gate.resolve(&ctx).await
    };
    match verdict {
        Ok(auth) => {
            req.extensions_mut().insert(auth);
            next.run(req).await
        }
        Err(e) => server_error(&e),
    }
}

async fn require_authentication(req: Request, next: Next) -> Response {
    let authenticated = req.extensions().get::<AuthState>().is_some_and(AuthState::is_authenticated);
    if !authenticated {
        return Redirect::to("/auth/login").into_response();
    }
    let mut response = next.run(req).await;
    response.headers_mut().insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

// --- handlers ---

async fn home(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let page = Outcome::page("home", json!({}));
    respond(&state, &session, &auth, &headers, Ok(page)).await
}

async fn login_page(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let page = Outcome::page("auth-login", json!({}));
    respond(&state, &session, &auth, &headers, Ok(page)).await
}

async fn login(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.login(&mut ctx, &auth, form).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn logout(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.logout(&mut ctx).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn signup_page(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let page = Outcome::page("auth-signup", json!({}));
    respond(&state, &session, &auth, &headers, Ok(page)).await
}

async fn signup(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Form(form): Form<EmailForm>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.signup(&mut ctx, &auth, form).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn register_page(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.register_page(&mut ctx, &auth, query.token).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn register(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Form(fields): Form<HashMap<String, String>>,
) -> Response {
    let form = RegisterForm::from_fields(&fields);
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.register_submit(&mut ctx, &auth, form).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn forgot_page(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let page = Outcome::page("auth-reset", json!({}));
    respond(&state, &session, &auth, &headers, Ok(page)).await
}

async fn forgot(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Form(form): Form<EmailForm>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.forgot(&mut ctx, form).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn reset_page(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.reset_page(&mut ctx, query.token).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn reset(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
    Form(form): Form<ResetForm>,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.reset_submit(&mut ctx, form).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

async fn profile(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let result = state.accounts.profile_page(&auth).await;
    respond(&state, &session, &auth, &headers, result).await
}

async fn delete_account(
    State(state): State<AppState>,
    Extension(session): Extension<SharedSession>,
    Extension(auth): Extension<AuthState>,
    headers: HeaderMap,
) -> Response {
    let result = {
        let mut ctx = session.lock().await;
        state.accounts.delete_account(&mut ctx, &auth).await
    };
    respond(&state, &session, &auth, &headers, result).await
}

// --- responses ---

async fn respond(
    state: &AppState,
    session: &SharedSession,
    auth: &AuthState,
    headers: &HeaderMap,
    result: Result<Outcome, AuthError>,
) -> Response {
    match result {
        Ok(Outcome::Redirect(to)) => Redirect::to(&to).into_response(),
        Ok(Outcome::Refresh) => Redirect::to(&refresh_target(headers)).into_response(),
        Ok(Outcome::Render { status, page, data }) => {
            let flash: Option<Flash> = session.lock().await.pop_flash();
            let payload = json!({
                "authenticated": auth.is_authenticated(),
                "flash": flash,
                "page": data,
            });
            state.renderer.render(status, page, payload)
        }
        Err(e) => error_response(e),
    }
}

fn error_response(e: AuthError) -> Response {
    match e {
        AuthError::ValidationFailed(messages) => {
            (StatusCode::UNPROCESSABLE_ENTITY, messages.join("\n")).into_response()
        }
        AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "permission denied").into_response(),
        AuthError::BadRequest => (StatusCode::BAD_REQUEST, "Bad Request").into_response(),
        AuthError::Store(e) => server_error(&e),
        AuthError::Credentials(e) => server_error(&e),
    }
}

fn server_error(e: &dyn std::fmt::Display) -> Response {
    tracing::error!(error = %e, "request failed");
    (StatusCode::INTERNAL_SERVER_ERROR, "Internal Server Error").into_response()
}

/// Path of the `Referer`, so a refresh never leaves the site.
fn refresh_target(headers: &HeaderMap) -> String {
    let Some(referer) = headers.get(header::REFERER).and_then(|v| v.to_str().ok()) else {
        return "/".to_string();
    };
    let path = match referer.split_once("://") {
        Some((_, rest)) => rest.find('/').map(|i| &rest[i..]).unwrap_or("/"),
        None => referer,
    };
    if is_local_path(path) { path.to_string() } else { "/".to_string() }
}

/// A single leading `/`. Browsers read `//host` and `/\host` as another origin.
fn is_local_path(path: &str) -> bool {
    let mut chars = path.chars();
    chars.next() == Some('/') && !matches!(chars.next(), Some('/' | '\\'))
}
