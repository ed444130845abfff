//! Turns a [`CmdResult`] into terminal output.
//!
//! Documents go to stdout, one line each in text mode. Messages go to
//! stdout too, except warnings and errors which go to stderr so piping a
//! listing stays clean. With `--json` the whole result is printed as one
//! pretty JSON object instead.

use super::styles;
use anyhow::Result;
use chrono::{DateTime, Utc};
use gigstore::commands::{CmdMessage, CmdResult, MessageLevel};
use gigstore::model::Task;
use serde_json::Value;

const TIME_WIDTH: usize = 14;

pub fn print_result(result: &CmdResult, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }

    if let Some(resolved) = &result.resolved {
        println!(
            "{}  {}",
            styles::PATH.apply_to(&resolved.path),
            styles::INFO.apply_to(format!("({})", resolved.source))
        );
    }
    for path in &result.paths {
        println!("{}", styles::PATH.apply_to(path.display()));
    }

    // A single document is shown whole; several get one line each.
    match result.listed.as_slice() {
        [] => {}
        [doc] if result.resolved.is_some() || !result.tasks.is_empty() => {
            println!("{}", serde_json::to_string_pretty(doc)?);
        }
        docs => {
            for doc in docs {
                println!("{}", document_line(doc));
            }
        }
    }
    for task in &result.tasks {
        println!("{}", task_line(task));
    }

    print_messages(&result.messages);
    Ok(())
}

pub fn print_messages(messages: &[CmdMessage]) {
    for message in messages {
        match message.level {
            MessageLevel::Info => println!("{}", styles::INFO.apply_to(&message.content)),
            MessageLevel::Success => println!("{}", styles::SUCCESS.apply_to(&message.content)),
            MessageLevel::Warning => eprintln!("{}", styles::WARNING.apply_to(&message.content)),
            MessageLevel::Error => eprintln!("{}", styles::ERROR.apply_to(&message.content)),
        }
    }
}

/// `<id>  <status>  <title>  <age>` for any stored document.
fn document_line(doc: &Value) -> String {
    let id = field(doc, "id");
    let status = field(doc, "status");
    let label = ["title", "message", "kind"]
        .iter()
        .map(|key| field(doc, key))
        .find(|value| !value.is_empty())
        .unwrap_or_default();
    let age = doc
        .get("createdAt")
        .or_else(|| doc.get("timestamp"))
        .and_then(Value::as_str)
        .and_then(|raw| raw.parse::<DateTime<Utc>>().ok())
        .map(format_time_ago)
        .unwrap_or_else(|| " ".repeat(TIME_WIDTH));

    format!(
        "{:<24} {:<12} {}  {}",
        styles::ID.apply_to(id),
        styles::STATUS.apply_to(status),
        styles::TITLE.apply_to(label),
        styles::TIME.apply_to(age)
    )
}

fn task_line(task: &Task) -> String {
    let status = serde_json::to_value(&task.status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
        .unwrap_or_default();
    format!(
        "  {:>3}. {:<12} {}",
        task.order,
        styles::STATUS.apply_to(status),
        task.title
    )
}

/// Ids may be stored as numbers.
fn field(doc: &Value, key: &str) -> String {
    match doc.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}

fn format_time_ago(timestamp: DateTime<Utc>) -> String {
    let duration = Utc::now().signed_duration_since(timestamp);
    let formatter = timeago::Formatter::new();
    let time_str = formatter.convert(duration.to_std().unwrap_or_default());
    format!("{:>width$}", time_str, width = TIME_WIDTH)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn numeric_and_string_ids_render_alike() {
        assert_eq!(field(&json!({"id": 42}), "id"), "42");
        assert_eq!(field(&json!({"id": "42"}), "id"), "42");
        assert_eq!(field(&json!({}), "id"), "");
    }

    #[test]
    fn document_line_falls_back_to_message() {
        console::set_colors_enabled(false);
        let line = document_line(&json!({
            "id": "n1",
            "status": "unread",
            "message": "Project created",
        }));
        assert!(line.starts_with("n1"));
        assert!(line.contains("Project created"));
    }

    #[test]
    fn time_ago_is_right_aligned() {
        let rendered = format_time_ago(Utc::now() - Duration::days(3));
        assert!(rendered.ends_with("3 days ago"));
        assert_eq!(rendered.len(), TIME_WIDTH);
    }
}
