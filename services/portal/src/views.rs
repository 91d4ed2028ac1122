//! HTML rendering
//!
//! Markup is deliberately minimal. Anything that came from a user or the
//! database goes through [`escape`].

use crate::csrf::CSRF_FORM_FIELD;
use crate::models::{ErrorReport, FlashLevel, FlashMessage};
use crate::principal::Principal;

pub fn escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
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

fn flash_class(level: FlashLevel) -> &'static str {
    match level {
        FlashLevel::Error => "flash flash-error",
        FlashLevel::Success => "flash flash-success",
        FlashLevel::Info => "flash flash-info",
    }
}

/// Hidden input carrying a CSRF token
pub fn token_field(name: &str, token: &str) -> String {
    format!(
        r#"<input type="hidden" name="{}" value="{}">"#,
        escape(name),
        escape(token)
    )
}

pub fn layout(
    title: &str,
    principal: &Principal,
    flash: &[FlashMessage],
    csrf_token: &str,
    body: &str,
) -> String {
    let messages: String = flash
        .iter()
        .map(|m| format!(r#"<p class="{}">{}</p>"#, flash_class(m.level), escape(&m.text)))
        .collect();

    let account = if principal.is_authenticated() {
        format!(
            r#"<span>Signed in as {}</span>
<form method="post" action="/index.php?page=logout">{}<button type="submit">Sign out</button></form>"#,
            principal.current_user_role(),
            token_field(CSRF_FORM_FIELD, csrf_token)
        )
    } else {
        r#"<a href="/index.php?page=login">Sign in</a>"#.to_string()
    };

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="csrf-token" content="{token}">
<title>{title} | Portal</title>
</head>
<body>
<header><a href="/index.php">Portal</a> {account}</header>
{messages}
<main>
<h1>{title}</h1>
{body}
</main>
</body>
</html>"#,
        token = escape(csrf_token),
        title = escape(title),
    )
}

pub fn login_form(csrf_token: &str, maintenance: bool) -> String {
    let action = if maintenance {
        "/index.php?page=login&amp;maintenance=1"
    } else {
        "/index.php?page=login"
    };
    format!(
        r#"<form method="post" action="{action}">
{token}
<label>Username or email <input name="username" autocomplete="username"></label>
<label>Password <input type="password" name="password" autocomplete="current-password"></label>
<button type="submit">Sign in</button>
</form>"#,
        token = token_field(CSRF_FORM_FIELD, csrf_token)
    )
}

pub fn maintenance_page(retry_after_seconds: u64) -> String {
    let minutes = retry_after_seconds.div_ceil(60);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Maintenance | Portal</title></head>
<body>
<h1>We'll be back soon</h1>
<p>The portal is undergoing scheduled maintenance. Please try again in about {minutes} minutes.</p>
</body>
</html>"#
    )
}

pub fn error_report(report: &ErrorReport) -> String {
    format!(
        r#"<section class="error-report">
<dl>
<dt>Reference</dt><dd>{}</dd>
<dt>Kind</dt><dd>{}</dd>
<dt>Request</dt><dd>{}</dd>
<dt>Time</dt><dd>{}</dd>
</dl>
<pre>{}</pre>
</section>"#,
        escape(&report.reference),
        escape(&report.kind),
        escape(report.uri.as_deref().unwrap_or("-")),
        report.occurred_at.to_rfc3339(),
        escape(&report.message),
    )
}

/// Standalone error page, for when there is no session to carry the report
pub fn error_report_page(report: &ErrorReport) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="utf-8"><title>Error | Portal</title></head>
<body>
<h1>Unhandled error</h1>
{}
</body>
</html>"#,
        error_report(report)
    )
}

pub fn debug_panel(elapsed_ms: f64, response_bytes: usize) -> String {
    format!(
        r#"
<div id="debug-panel" style="position:fixed;bottom:0;right:0;background:#222;color:#eee;font:12px monospace;padding:4px 8px">
time: {elapsed_ms:.2} ms | size: {response_bytes} bytes
</div>"#
    )
}
