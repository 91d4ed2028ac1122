//! Portal routes
//!
//! All pages share `/index.php` and are told apart by the `page` query
//! parameter. Layers, outermost first: request logging, session, debug mode,
//! panic catching, gates.

use anyhow::Context;
use axum::{
    Extension, Json, Router,
    extract::State,
    http::{Method, StatusCode},
    middleware,
    response::{Html, IntoResponse, Response},
    routing::get,
};
use serde_json::json;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{info, warn};

use crate::csrf::{CSRF_FORM_FIELD, TokenManager};
use crate::debug::{self, debug_layer};
use crate::error::{PortalError, PortalResult};
use crate::flash::FlashMessages;
use crate::gates::csrf::CSRF_FAILURE_MESSAGE;
use crate::gates::{
    CsrfGate, DASHBOARD_ROUTE, GateContext, HOME_ROUTE, LOGIN_ROUTE, MaintenanceGate, Outcome,
    found, guard,
};
use crate::logging::logging_middleware;
use crate::models::Role;
use crate::pages::Page;
use crate::repositories::verify_password;
use crate::session::session_layer;
use crate::settings::{DEBUG_MODE, MAINTENANCE_MODE, parse_flag};
use crate::state::AppState;
use crate::validation::{
    is_local_redirect, validate_email, validate_login_identifier, validate_login_password,
};
use crate::views::{self, escape, token_field};

pub const INVALID_CREDENTIALS_MESSAGE: &str = "Invalid username or password.";
pub const SETTINGS_ROUTE: &str = "/index.php?page=settings";
const MAINTENANCE_LOGIN_ROUTE: &str = "/index.php?page=login&maintenance=1";
/// Form field carrying the per-profile edit token
pub const EDIT_TOKEN_FIELD: &str = "edit_token";

/// Create the router for the portal service
pub fn create_router(state: AppState) -> Router {
    let pages = Router::new()
        .route("/", get(|| async { found(HOME_ROUTE) }))
        .route("/index.php", get(index).post(index))
        .layer(middleware::from_fn_with_state(state.clone(), guard))
        .layer(CatchPanicLayer::custom(debug::panic_response))
        .layer(middleware::from_fn_with_state(
            state.settings.clone(),
            debug_layer,
        ))
        .layer(middleware::from_fn_with_state(
            state.sessions.clone(),
            session_layer,
        ));

    Router::new()
        .route("/health", get(health_check))
        .merge(pages)
        .layer(middleware::from_fn(logging_middleware))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (database, cache) = match &state.infrastructure {
        Some(infra) => (
            label(common::database::health_check(&infra.db_pool).await.unwrap_or(false)),
            label(infra.redis_pool.health_check().await.unwrap_or(false)),
        ),
        None => ("in_memory", "in_memory"),
    };

    let healthy = database != "down" && cache != "down";
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ok" } else { "degraded" },
            "service": "portal",
            "database": database,
            "cache": cache,
        })),
    )
}

fn label(up: bool) -> &'static str {
    if up { "up" } else { "down" }
}

/// Dispatch a request that passed the gates to its page handler
async fn index(
    State(state): State<AppState>,
    Extension(page): Extension<Page>,
    Extension(ctx): Extension<GateContext>,
) -> PortalResult<Response> {
    let submit = ctx.request.method == Method::POST;

    match (page, submit) {
        (Page::Home, false) => home(&ctx).await,
        (Page::Login, false) => login_form(&ctx).await,
        (Page::Login, true) => login(&state, &ctx).await,
        (Page::Logout, false) => Ok(found(HOME_ROUTE)),
        (Page::Logout, true) => logout(&ctx).await,
        (Page::Dashboard, false) => dashboard(&state, &ctx).await,
        (Page::Profile, false) => profile(&state, &ctx).await,
        (Page::Profile, true) => update_profile(&state, &ctx).await,
        (Page::Portfolio, false) => portfolio(&ctx).await,
        (Page::Invoices, false) => invoices(&state, &ctx).await,
        (Page::Tickets, false) => tickets(&state, &ctx).await,
        (Page::Admin, false) => admin(&state, &ctx).await,
        (Page::Settings, false) => settings_page(&state, &ctx).await,
        (Page::Settings, true) => update_settings(&state, &ctx).await,
        (Page::DebugError, false) => debug_error(&state, &ctx).await,
        (Page::NotFound, _) => not_found(&ctx).await,
        _ => Err(PortalError::MethodNotAllowed),
    }
}

async fn render(ctx: &GateContext, page: Page, body: &str) -> Response {
    let flash = FlashMessages::take_all(&ctx.session).await;
    let token = TokenManager::token(&ctx.session, None).await;
    Html(views::layout(page.title(), &ctx.principal, &flash, &token, body)).into_response()
}

fn form_field<'a>(ctx: &'a GateContext, name: &str) -> &'a str {
    ctx.request.form.get(name).map(String::as_str).unwrap_or("")
}

async fn home(ctx: &GateContext) -> PortalResult<Response> {
    let body = if ctx.principal.is_authenticated() {
        r#"<p><a href="/index.php?page=dashboard">Go to your dashboard</a></p>"#
    } else {
        r#"<p>Welcome to the client portal. <a href="/index.php?page=login">Sign in</a> to continue.</p>"#
    };
    Ok(render(ctx, Page::Home, body).await)
}

async fn login_form(ctx: &GateContext) -> PortalResult<Response> {
    if ctx.principal.is_authenticated() {
        return Ok(found(DASHBOARD_ROUTE));
    }

    let token = TokenManager::token(&ctx.session, None).await;
    let maintenance = MaintenanceGate::is_maintenance_login(&ctx.request);
    Ok(render(ctx, Page::Login, &views::login_form(&token, maintenance)).await)
}

async fn login(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let retry = if MaintenanceGate::is_maintenance_login(&ctx.request) {
        MAINTENANCE_LOGIN_ROUTE
    } else {
        LOGIN_ROUTE
    };

    let identifier = form_field(ctx, "username").trim();
    let password = form_field(ctx, "password");
    if let Err(message) =
        validate_login_identifier(identifier).and_then(|_| validate_login_password(password))
    {
        FlashMessages::add_error(&ctx.session, message).await;
        return Ok(found(retry));
    }

    let user = state
        .users
        .find_by_username_or_email(identifier)
        .await
        .context("looking up login user")?;

    let verified = match &user {
        Some(user) if user.is_active => verify_password(user, password).unwrap_or_else(|e| {
            warn!(user_id = user.id, "Stored password hash is unusable: {}", e);
            false
        }),
        _ => false,
    };

    let Some(user) = user.filter(|_| verified) else {
        warn!(
            target: "security",
            ip = %ctx.request.client_ip,
            "Failed login attempt"
        );
        FlashMessages::add_error(&ctx.session, INVALID_CREDENTIALS_MESSAGE).await;
        return Ok(found(retry));
    };

    ctx.session.regenerate_id().await;
    let intended = ctx
        .session
        .update(|data| {
            data.clear_identity();
            data.csrf_tokens.clear();
            data.user_id = Some(user.id);
            data.user_role = Some(user.role().as_str().to_string());
            data.intended_url.take()
        })
        .await;
    TokenManager::regenerate(&ctx.session, None).await;
    FlashMessages::add_success(&ctx.session, format!("Welcome back, {}.", user.username)).await;

    info!(user_id = user.id, role = %user.role(), "User logged in");

    let target = intended
        .filter(|target| is_local_redirect(target))
        .unwrap_or_else(|| DASHBOARD_ROUTE.to_string());
    Ok(found(&target))
}

async fn logout(ctx: &GateContext) -> PortalResult<Response> {
    if let Some(user_id) = ctx.principal.current_user_id() {
        info!(user_id, "User logged out");
    }
    ctx.session.destroy().await;
    Ok(found(HOME_ROUTE))
}

async fn dashboard(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let Some(user) = state
        .auth
        .current_user(&ctx.session)
        .await
        .context("loading dashboard user")?
    else {
        // Account removed or disabled since login
        ctx.session.update(|data| data.clear_identity()).await;
        FlashMessages::add_error(&ctx.session, crate::gates::auth::LOGIN_REQUIRED_MESSAGE).await;
        return Ok(found(LOGIN_ROUTE));
    };

    let role = user.role();
    let mut links = vec![format!(
        r#"<li><a href="/index.php?page=profile&amp;user_id={}">Your profile</a></li>"#,
        user.id
    )];
    if role.at_least(Role::Client) {
        links.push(r#"<li><a href="/index.php?page=portfolio">Portfolio</a></li>"#.into());
        links.push(r#"<li><a href="/index.php?page=invoices">Invoices</a></li>"#.into());
        links.push(r#"<li><a href="/index.php?page=tickets">Support tickets</a></li>"#.into());
    }
    if role == Role::Admin {
        links.push(r#"<li><a href="/index.php?page=admin">Administration</a></li>"#.into());
    }

    let body = format!(
        "<p>Hello {}, you are signed in as {}.</p>\n<ul>{}</ul>",
        escape(&user.username),
        role,
        links.concat()
    );
    Ok(render(ctx, Page::Dashboard, &body).await)
}

fn edit_namespace(user_id: i64) -> String {
    format!("edit_user_{}", user_id)
}

/// The `user_id` parameter, defaulting to the signed-in user
fn profile_owner(ctx: &GateContext) -> PortalResult<i64> {
    match ctx.request.query_param("user_id") {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| PortalError::BadRequest("user_id must be a number".to_string())),
        None => ctx.principal.current_user_id().ok_or(PortalError::NotFound),
    }
}

async fn profile(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let owner_id = profile_owner(ctx)?;
    if let Outcome::Halt(response) = state
        .authorizer
        .require_own_resource_or_admin(&ctx.session, &ctx.principal, owner_id)
        .await
    {
        return Ok(response);
    }

    let user = state
        .users
        .find_by_id(owner_id)
        .await
        .context("loading profile")?
        .ok_or(PortalError::NotFound)?;

    let csrf_token = TokenManager::token(&ctx.session, None).await;
    let edit_token = TokenManager::token(&ctx.session, Some(&edit_namespace(owner_id))).await;

    let body = format!(
        r#"<dl>
<dt>Username</dt><dd>{username}</dd>
<dt>Role</dt><dd>{role}</dd>
<dt>Member since</dt><dd>{since}</dd>
</dl>
<form method="post" action="/index.php?page=profile&amp;user_id={id}">
{csrf}
{edit}
<label>Email <input type="email" name="email" value="{email}"></label>
<button type="submit">Save</button>
</form>"#,
        username = escape(&user.username),
        role = user.role(),
        since = user.created_at.format("%Y-%m-%d"),
        id = user.id,
        csrf = token_field(CSRF_FORM_FIELD, &csrf_token),
        edit = token_field(EDIT_TOKEN_FIELD, &edit_token),
        email = escape(&user.email),
    );
    Ok(render(ctx, Page::Profile, &body).await)
}

async fn update_profile(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let owner_id = profile_owner(ctx)?;
    if let Outcome::Halt(response) = state
        .authorizer
        .require_own_resource_or_admin(&ctx.session, &ctx.principal, owner_id)
        .await
    {
        return Ok(response);
    }

    let namespace = edit_namespace(owner_id);
    if !TokenManager::verify_or_rotate(&ctx.session, &namespace, form_field(ctx, EDIT_TOKEN_FIELD))
        .await
    {
        warn!(
            target: "security",
            ip = %ctx.request.client_ip,
            user_id = ctx.principal.id,
            owner_id,
            "Profile edit token validation failed"
        );
        FlashMessages::add_error(&ctx.session, CSRF_FAILURE_MESSAGE).await;
        return Ok(CsrfGate::rejection());
    }

    let back = format!("/index.php?page=profile&user_id={}", owner_id);
    let email = form_field(ctx, "email").trim();
    if let Err(message) = validate_email(email) {
        FlashMessages::add_error(&ctx.session, message).await;
        return Ok(found(&back));
    }

    let updated = state
        .users
        .update_email(owner_id, email)
        .await
        .context("updating profile email")?;
    if !updated {
        return Err(PortalError::NotFound);
    }

    info!(user_id = ctx.principal.id, owner_id, "Profile updated");
    FlashMessages::add_success(&ctx.session, "Profile updated.").await;
    Ok(found(&back))
}

async fn portfolio(ctx: &GateContext) -> PortalResult<Response> {
    Ok(render(ctx, Page::Portfolio, "<p>Your projects and deliverables.</p>").await)
}

async fn invoices(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    if let Outcome::Halt(response) = state
        .authorizer
        .require_permission(&ctx.session, &ctx.principal, "invoices", "view")
        .await
    {
        return Ok(response);
    }

    let mut body = String::from("<p>Your invoices.</p>");
    if state
        .authorizer
        .is_permitted(&ctx.principal, "invoices", "create")
        .await
    {
        body.push_str(r#"<p><a href="/index.php?page=invoices&amp;action=create">New invoice</a></p>"#);
    }
    Ok(render(ctx, Page::Invoices, &body).await)
}

async fn tickets(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    if let Outcome::Halt(response) = state
        .authorizer
        .require_permission(&ctx.session, &ctx.principal, "tickets", "view")
        .await
    {
        return Ok(response);
    }

    let mut actions = Vec::new();
    for (action, label) in [("create", "Open a ticket"), ("assign", "Assign tickets")] {
        if state
            .authorizer
            .is_permitted(&ctx.principal, "tickets", action)
            .await
        {
            actions.push(format!("<li>{}</li>", label));
        }
    }

    let body = format!("<p>Your support tickets.</p>\n<ul>{}</ul>", actions.concat());
    Ok(render(ctx, Page::Tickets, &body).await)
}

async fn admin(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let maintenance = state.settings.flag(MAINTENANCE_MODE).await;
    let debug = state.settings.flag(DEBUG_MODE).await;
    let body = format!(
        r#"<p>Maintenance mode: {}. Debug mode: {}.</p>
<p><a href="/index.php?page=settings">Change settings</a></p>"#,
        on_off(maintenance),
        on_off(debug)
    );
    Ok(render(ctx, Page::Admin, &body).await)
}

fn on_off(enabled: bool) -> &'static str {
    if enabled { "on" } else { "off" }
}

fn checked(enabled: bool) -> &'static str {
    if enabled { " checked" } else { "" }
}

async fn settings_page(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let maintenance = state.settings.flag(MAINTENANCE_MODE).await;
    let debug = state.settings.flag(DEBUG_MODE).await;
    let token = TokenManager::token(&ctx.session, None).await;

    let body = format!(
        r#"<form method="post" action="/index.php?page=settings">
{token}
<label><input type="checkbox" name="{MAINTENANCE_MODE}" value="1"{maintenance}> Maintenance mode</label>
<label><input type="checkbox" name="{DEBUG_MODE}" value="1"{debug}> Debug mode</label>
<button type="submit">Save</button>
</form>"#,
        token = token_field(CSRF_FORM_FIELD, &token),
        maintenance = checked(maintenance),
        debug = checked(debug),
    );
    Ok(render(ctx, Page::Settings, &body).await)
}

async fn update_settings(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    let maintenance = parse_flag(form_field(ctx, MAINTENANCE_MODE));
    let debug_enabled = parse_flag(form_field(ctx, DEBUG_MODE));

    if maintenance == state.settings.flag(MAINTENANCE_MODE).await
        && debug_enabled == state.settings.flag(DEBUG_MODE).await
    {
        FlashMessages::add_info(&ctx.session, "No changes to save.").await;
        return Ok(found(SETTINGS_ROUTE));
    }

    state
        .settings
        .set_flag(MAINTENANCE_MODE, maintenance)
        .await
        .context("saving maintenance setting")?;
    state
        .settings
        .set_flag(DEBUG_MODE, debug_enabled)
        .await
        .context("saving debug setting")?;
    state.log_control.set_debug(debug_enabled);

    info!(
        user_id = ctx.principal.id,
        maintenance_mode = maintenance,
        debug_mode = debug_enabled,
        "Portal settings updated"
    );
    FlashMessages::add_success(&ctx.session, "Settings saved.").await;
    Ok(found(SETTINGS_ROUTE))
}

async fn debug_error(state: &AppState, ctx: &GateContext) -> PortalResult<Response> {
    if !state.settings.flag(DEBUG_MODE).await {
        return not_found(ctx).await;
    }

    let report = ctx.session.update(|data| data.error_report.take()).await;
    let body = match report {
        Some(report) => views::error_report(&report),
        None => "<p>No error has been recorded for this session.</p>".to_string(),
    };
    Ok(render(ctx, Page::DebugError, &body).await)
}

async fn not_found(ctx: &GateContext) -> PortalResult<Response> {
    let page = render(ctx, Page::NotFound, "<p>The page you requested does not exist.</p>").await;
    Ok((StatusCode::NOT_FOUND, page).into_response())
}
