//! HTTP request handlers.

use super::AppState;
use crate::history::{format_duration, Interval, State as Reachability};

use axum::{
    extract::State,
    response::{Html, IntoResponse, Json},
};
use chrono::{DateTime, Utc};

// Templates are filled by plain string replacement.
const REPORT_TEMPLATE: &str = include_str!("templates/report.html");
const LAYOUT_TEMPLATE: &str = include_str!("templates/layout.html");

// ============================================================================
// Report page
// ============================================================================

pub async fn handle_report(State(state): State<AppState>) -> impl IntoResponse {
    let history = state.store.snapshot();
    Html(render_report(&state.host, &history, Utc::now()))
}

/// Render the history as an HTML page.
pub fn render_report(host: &str, history: &[Interval], now: DateTime<Utc>) -> String {
    let current = history
        .first()
        .map(|i| i.state)
        .unwrap_or(Reachability::Start);

    let summary = match history.first() {
        Some(head) => html_escape(&head.describe(now)),
        None => "No data yet".to_string(),
    };

    let rows: String = history
        .iter()
        .map(|i| {
            format!(
                "<tr class=\"{}\"><td class=\"state-{}\">{}</td><td>{}</td><td>{}</td><td>{}</td></tr>",
                if i.is_active() { "active" } else { "" },
                i.state,
                i.state,
                format_duration(i.duration(now)),
                html_escape(&i.time_range()),
                html_escape(&i.relative_end(now)),
            )
        })
        .collect::<Vec<_>>()
        .join("\n");

    let content = REPORT_TEMPLATE
        .replace("{{host}}", &html_escape(host))
        .replace("{{current}}", current.as_str())
        .replace("{{summary}}", &summary)
        .replace("{{rows}}", &rows);

    LAYOUT_TEMPLATE
        .replace("{{title}}", &format!("pingtrail - {}", html_escape(host)))
        .replace("{{content}}", &content)
}

fn html_escape(s: &str) -> String {
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

// ============================================================================
// API: History
// ============================================================================

pub async fn handle_history(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.store.snapshot())
}

// ============================================================================
// Static Assets
// ============================================================================

pub async fn handle_favicon() -> impl IntoResponse {
    let svg = r##"<svg xmlns="http://www.w3.org/2000/svg" viewBox="0 0 100 100">
        <circle cx="50" cy="50" r="45" fill="#2e7d32"/>
        <path d="M15 55 L35 55 L45 30 L55 75 L65 50 L85 50" stroke="white" stroke-width="6" fill="none"/>
    </svg>"##;

    (
        [(axum::http::header::CONTENT_TYPE, "image/svg+xml")],
        svg
    )
}
