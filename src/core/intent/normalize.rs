//! Canonical parameter shapes for each `(service, action)`.
//!
//! Extractors spell parameters loosely (`repo_name`, `"#12"`, ...). Steps
//! leaving the compiler carry exactly the keys the adapter reads.

use serde_json::{Map, Value};
use tracing::debug;

use crate::core::services::{ServiceType, descriptor};

/// Spellings accepted for any service. Applied before the per-service table.
const COMMON_RENAMES: &[(&str, &str)] = &[
    ("repo_name", "repo"),
    ("repository", "repo"),
    ("issue_title", "title"),
    ("issue_body", "body"),
    ("comment", "body"),
    ("comment_body", "body"),
    ("number", "issue_number"),
    ("issue", "issue_number"),
    ("branch_name", "branch"),
    ("source", "source_branch"),
    ("from_branch", "source_branch"),
    ("base_branch", "source_branch"),
    ("project", "project_key"),
    ("job", "job_name"),
    ("message", "text"),
    ("params", "parameters"),
    ("build_parameters", "parameters"),
];

const JIRA_RENAMES: &[(&str, &str)] = &[
    ("title", "summary"),
    ("body", "description"),
    ("type", "issue_type"),
];

fn defaults(service: ServiceType, action: &str) -> &'static [(&'static str, &'static str)] {
    match (service, action) {
        (ServiceType::Github, "create_branch") => &[("source_branch", "main")],
        (ServiceType::Jira, "create_issue") => &[("issue_type", "Task")],
        (ServiceType::Slack, "send_message") => &[("channel", "#general")],
        _ => &[],
    }
}

fn rename(params: &mut Map<String, Value>, table: &[(&str, &str)]) {
    for (from, to) in table {
        if params.contains_key(*to) {
            continue;
        }
        if let Some(v) = params.remove(*from) {
            params.insert((*to).to_string(), v);
        }
    }
}

/// `12`, `"12"` and `"#12"` are all issue 12.
fn coerce_issue_number(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().trim_start_matches('#').parse().ok(),
        _ => None,
    }
}

fn coerce_scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Rename, coerce, default and check `params` for `service.action`. The
/// error string says what was wrong; the compiler reports it as an
/// unresolvable intent.
pub fn normalize(
    service: ServiceType,
    action: &str,
    mut params: Map<String, Value>,
) -> Result<Map<String, Value>, String> {
    let spec = descriptor(service)
        .action(action)
        .ok_or_else(|| format!("{} has no action '{}'", service, action))?;

    rename(&mut params, COMMON_RENAMES);
    if service == ServiceType::Jira {
        rename(&mut params, JIRA_RENAMES);
    }

    let mut out = Map::new();
    for (key, value) in params {
        if !spec.required.contains(&key.as_str()) && !spec.optional.contains(&key.as_str()) {
            debug!(service = %service, action, key = %key, "Dropping unknown parameter");
            continue;
        }
        if value.is_null() {
            continue;
        }
        let canonical = match key.as_str() {
            "issue_number" => coerce_issue_number(&value)
                .map(Value::from)
                .ok_or_else(|| format!("issue_number '{}' is not a number", value))?,
            "parameters" => {
                let obj = value
                    .as_object()
                    .ok_or_else(|| "build parameters must be an object".to_string())?;
                let mut coerced = Map::new();
                for (k, v) in obj {
                    let s = coerce_scalar(v)
                        .ok_or_else(|| format!("build parameter '{}' must be a scalar", k))?;
                    coerced.insert(k.clone(), Value::String(s));
                }
                Value::Object(coerced)
            }
            _ => coerce_scalar(&value)
                .map(Value::String)
                .ok_or_else(|| format!("parameter '{}' must be a string", key))?,
        };
        out.insert(key, canonical);
    }

    for (key, default) in defaults(service, action) {
        let missing = match out.get(*key) {
            None => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        };
        if missing {
            out.insert((*key).to_string(), Value::String((*default).to_string()));
        }
    }

    let missing: Vec<&str> = spec
        .required
        .iter()
        .copied()
        .filter(|k| match out.get(*k) {
            None => true,
            Some(Value::String(s)) => s.is_empty(),
            Some(_) => false,
        })
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "{}.{} is missing {}",
            service,
            action,
            missing.join(", ")
        ));
    }
    Ok(out)
}
