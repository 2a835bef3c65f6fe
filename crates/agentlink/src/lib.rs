//! Rendering helpers shared by the `agentlink` binary.

use al_config::ServerProfile;
use al_session::{ChatMessage, MessageRole, SessionSummary};
use std::fmt::Write;
use uuid::Uuid;

pub const REDACTED: &str = "<redacted>";

/// Header values that carry credentials are hidden; names stay visible.
pub fn redact_header(name: &str, value: &str) -> String {
    if name.eq_ignore_ascii_case(al_config::profile::AUTHORIZATION_HEADER)
        || name.eq_ignore_ascii_case(al_config::profile::CF_ACCESS_CLIENT_SECRET_HEADER)
    {
        REDACTED.to_string()
    } else {
        value.to_string()
    }
}

pub fn render_profiles(profiles: &[ServerProfile], default: Option<&Uuid>) -> String {
    if profiles.is_empty() {
        return "No profiles configured.\n".to_string();
    }
    let mut out = String::new();
    for profile in profiles {
        let marker = if Some(&profile.id) == default { "*" } else { " " };
        let _ = writeln!(
            out,
            "{marker} {}  {:<20} {} ({})",
            profile.id,
            profile.name,
            profile.endpoint_url_string(),
            profile.protocol
        );
    }
    out
}

pub fn render_profile_detail(profile: &ServerProfile) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "id:        {}", profile.id);
    let _ = writeln!(out, "name:      {}", profile.name);
    let _ = writeln!(out, "endpoint:  {}", profile.endpoint_url_string());
    let _ = writeln!(out, "protocol:  {}", profile.protocol);
    let _ = writeln!(out, "cwd:       {}", profile.working_directory.display());
    let headers = profile.auth_headers();
    if headers.is_empty() {
        let _ = writeln!(out, "headers:   (none)");
    } else {
        let _ = writeln!(out, "headers:");
        for (name, value) in &headers {
            let _ = writeln!(out, "  {name}: {}", redact_header(name, value));
        }
    }
    out
}

pub fn render_summaries(summaries: &[SessionSummary]) -> String {
    if summaries.is_empty() {
        return "No cached sessions.\n".to_string();
    }
    let mut out = String::new();
    for summary in summaries {
        let title = summary.title.as_deref().unwrap_or("(untitled)");
        let pending = if summary.is_pending { " [pending]" } else { "" };
        let _ = writeln!(
            out,
            "{}  {}  {title}{pending}",
            summary.updated_at.format("%Y-%m-%d %H:%M"),
            summary.session_id
        );
    }
    out
}

pub fn render_buffer_ids(ids: &[String]) -> String {
    if ids.is_empty() {
        return "No cached message buffers.\n".to_string();
    }
    let mut out = String::new();
    for id in ids {
        let _ = writeln!(out, "{id}");
    }
    out
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "you",
        MessageRole::Assistant => "agent",
        MessageRole::Thought => "thinking",
        MessageRole::Tool => "tool",
        MessageRole::System => "system",
    }
}

pub fn render_messages(messages: &[ChatMessage]) -> String {
    let mut out = String::new();
    for message in messages {
        let _ = write!(out, "[{}] {}", role_label(message.role), message.content);
        if !message.images.is_empty() {
            let _ = write!(out, " ({} image(s))", message.images.len());
        }
        out.push('\n');
    }
    out
}
