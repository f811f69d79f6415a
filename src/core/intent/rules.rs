//! Offline intent extraction by pattern matching.
//!
//! Used when no model is configured. Understands a fixed set of phrasings
//! and splits "X and then Y" into several steps.

use std::sync::LazyLock;

use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Value, json};

use super::{Inference, IntentContext, IntentExtractor};

const HELP_REPLY: &str = "I can work with GitHub, Jira, Jenkins and Slack. Try \"create an issue \
titled Login broken in repo web\", \"list branches in repo api\", \"create branch feature-x \
from develop in repo api\", \"trigger build deploy-prod\" or \"send a slack message: release is out\".";

fn re(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap()
}

static CLAUSE_SPLIT: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(?:,\s*|\s+)(?:and\s+then|then|and)\s+(notify|send|tell|post|message|trigger|run|start|create|open|raise|list|show|comment)\b")
});
static GREETING: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)^\s*(hello|hi|hey|howdy|greetings|good\s+(morning|afternoon|evening))\b")
});
static QUESTION: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(how are you|what can you do|help|what is|tell me about|explain)\b"));

static CREATE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(create|raise|open|make|new|add|file)\b"));
static LIST: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(list|show|see|view|display|get all|what are)\b"));
static ISSUE: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(issues?|bugs?|tickets?|problems?|features?)\b"));
static BRANCH: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bbranch(es)?\b"));
static SLACK: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(send|message|notify|tell|slack|inform|post)\b"));
static JIRA: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bjira\b"));
static BUILD: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(trigger|run|start|kick\s+off)\b.*\b(build|job|pipeline|deploy)"));
static JOBS: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\b(jobs|jenkins)\b"));

static ISSUE_CONTENT: LazyLock<Regex> = LazyLock::new(|| {
    re(r#"(?i)(?:\b(?:titled|called|named|about|that|with)\b|:)\s*["']?(.+?)["']?(?:\s+in\s+(?:the\s+)?(?:repo(?:sitory)?\s+)?[\w./-]+(?:\s+repo(?:sitory)?)?)?\s*$"#)
});
static REPO: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:repo|repository)\s+([\w.-]+(?:/[\w.-]+)?)")
});
static IN_REPO: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\bin\s+(?:the\s+)?([\w.-]+/[\w.-]+|[\w.-]+)(?:\s+repo(?:sitory)?)?\s*$"));
static ISSUE_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)(?:\b(?:issue|bug|ticket)\s+#?(\d+)|#(\d+)\b|\b(?:number|num)\s+(\d+))")
});
static BRANCH_NAME: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\bbranch\s+(?:named\s+|called\s+)?([\w./-]+)")
});
static SOURCE_BRANCH: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)\b(?:from|based\s+on|off)\s+([\w./-]+)"));
static QUOTED: LazyLock<Regex> = LazyLock::new(|| re(r#"["']([^"']{2,})["']"#));
static AFTER_COLON: LazyLock<Regex> = LazyLock::new(|| re(r"^[^:]*:\s*(.+)$"));
static SAYING: LazyLock<Regex> = LazyLock::new(|| re(r"(?i)\bsaying\s+(.+)$"));
static CHANNEL: LazyLock<Regex> =
    LazyLock::new(|| re(r"(?i)(?:#([\w-]+)|\bchannel\s+#?([\w-]+))"));
static JOB_NAME: LazyLock<Regex> = LazyLock::new(|| {
    re(r"(?i)\b(?:build|job|pipeline)\s+(?:for\s+|of\s+)?([\w./-]+)")
});
static PROJECT_KEY: LazyLock<Regex> =
    LazyLock::new(|| re(r"\b(?:[Pp]roject)\s+([A-Z][A-Z0-9]+)\b"));

enum Clause {
    Step(Value),
    /// Recognised but missing something the user has to supply.
    Clarify(String),
    Unknown,
}

fn step(service: &str, action: &str, parameters: Value) -> Clause {
    Clause::Step(json!({
        "service_type": service,
        "action": action,
        "parameters": parameters,
    }))
}

fn first_capture(regex: &Regex, text: &str) -> Option<String> {
    regex.captures(text).and_then(|c| {
        c.iter()
            .skip(1)
            .flatten()
            .next()
            .map(|m| m.as_str().trim().to_string())
    })
}

fn repo_of(text: &str) -> Option<String> {
    first_capture(&REPO, text).or_else(|| first_capture(&IN_REPO, text))
}

fn message_text(text: &str) -> Option<String> {
    first_capture(&QUOTED, text)
        .or_else(|| first_capture(&AFTER_COLON, text))
        .or_else(|| first_capture(&SAYING, text))
        .map(|m| m.trim_matches(|c: char| c == '.' || c == '!' || c.is_whitespace()).to_string())
        .filter(|m| m.len() > 1)
}

/// Split on "and then"/"then"/"and" when a new action verb follows.
fn split_clauses(utterance: &str) -> Vec<&str> {
    let mut clauses = Vec::new();
    let mut start = 0;
    for caps in CLAUSE_SPLIT.captures_iter(utterance) {
        let (Some(whole), Some(verb)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        clauses.push(utterance[start..whole.start()].trim());
        start = verb.start();
    }
    clauses.push(utterance[start..].trim());
    clauses.into_iter().filter(|c| !c.is_empty()).collect()
}

fn classify(clause: &str) -> Clause {
    let issue_number = ISSUE_NUMBER.captures(clause).and_then(|c| {
        c.iter()
            .skip(1)
            .flatten()
            .next()
            .and_then(|m| m.as_str().parse::<u64>().ok())
    });

    if JIRA.is_match(clause) && CREATE.is_match(clause) {
        let Some(project_key) = first_capture(&PROJECT_KEY, clause) else {
            return Clause::Clarify("Which Jira project should the ticket go to? Say \"in project KEY\".".into());
        };
        let Some(summary) = first_capture(&ISSUE_CONTENT, clause) else {
            return Clause::Clarify("What should the Jira ticket say?".into());
        };
        return step(
            "jira",
            "create_issue",
            json!({ "project_key": project_key, "summary": summary }),
        );
    }

    if CREATE.is_match(clause) && ISSUE.is_match(clause) && !BRANCH.is_match(clause) {
        let Some(title) = first_capture(&ISSUE_CONTENT, clause) else {
            return Clause::Clarify(
                "What should the issue be about? For example: create an issue titled Login button does nothing.".into(),
            );
        };
        let title: String = if title.chars().count() > 80 {
            format!("{}...", title.chars().take(77).collect::<String>())
        } else {
            title.clone()
        };
        return step(
            "github",
            "create_issue",
            json!({
                "repo": repo_of(clause),
                "title": title,
                "body": format!("Issue details: {}\n\nReported via DevCascade automation.", clause),
            }),
        );
    }

    if let Some(number) = issue_number {
        let lower = clause.to_lowercase();
        if lower.contains("comment") || lower.contains("reply") {
            // The body may itself say "in X", so only "repo X" names a repo here.
            let body = message_text(clause).unwrap_or_else(|| clause.to_string());
            return step(
                "github",
                "comment_issue",
                json!({
                    "repo": first_capture(&REPO, clause),
                    "issue_number": number,
                    "body": body,
                }),
            );
        }
        if lower.contains("show") || lower.contains("get") || lower.contains("details") {
            return step(
                "github",
                "get_issue",
                json!({ "repo": repo_of(clause), "issue_number": number }),
            );
        }
    }

    if LIST.is_match(clause) && ISSUE.is_match(clause) {
        return step("github", "list_issues", json!({ "repo": repo_of(clause) }));
    }

    if BRANCH.is_match(clause) {
        let branch = first_capture(&BRANCH_NAME, clause);
        if CREATE.is_match(clause) {
            let Some(branch) = branch else {
                return Clause::Clarify("What should the new branch be called?".into());
            };
            let source = first_capture(&SOURCE_BRANCH, clause).unwrap_or_else(|| "main".into());
            return step(
                "github",
                "create_branch",
                json!({ "repo": repo_of(clause), "branch": branch, "source_branch": source }),
            );
        }
        if LIST.is_match(clause) || clause.to_lowercase().contains("what") {
            return step("github", "list_branches", json!({ "repo": repo_of(clause) }));
        }
        if let Some(branch) = branch {
            return step(
                "github",
                "get_branch",
                json!({ "repo": repo_of(clause), "branch": branch }),
            );
        }
    }

    if BUILD.is_match(clause) {
        let Some(job) = first_capture(&JOB_NAME, clause) else {
            return Clause::Clarify("Which Jenkins job should I build?".into());
        };
        return step("jenkins", "trigger_build", json!({ "job_name": job }));
    }
    if LIST.is_match(clause) && JOBS.is_match(clause) {
        return step("jenkins", "list_jobs", json!({}));
    }

    if SLACK.is_match(clause) {
        let text = message_text(clause).unwrap_or_else(|| "Hello from DevCascade!".to_string());
        let channel = first_capture(&CHANNEL, clause).map(|c| format!("#{}", c));
        return step(
            "slack",
            "send_message",
            json!({ "channel": channel, "text": text }),
        );
    }

    Clause::Unknown
}

/// Pattern-matching stand-in for a language model.
#[derive(Debug, Default)]
pub struct RuleBasedExtractor;

impl RuleBasedExtractor {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl IntentExtractor for RuleBasedExtractor {
    fn name(&self) -> &'static str {
        "rules"
    }

    async fn infer(&self, utterance: &str, _ctx: &IntentContext) -> Result<Inference> {
        let mut steps = Vec::new();
        for clause in split_clauses(utterance) {
            match classify(clause) {
                Clause::Step(s) => steps.push(s),
                Clause::Clarify(question) => {
                    return Ok(Inference {
                        reply: Some(question),
                        ..Default::default()
                    });
                }
                Clause::Unknown => {}
            }
        }

        if !steps.is_empty() {
            return Ok(Inference {
                steps: Value::Array(steps),
                ..Default::default()
            });
        }

        let reply = if GREETING.is_match(utterance) {
            format!("Hello! {}", HELP_REPLY)
        } else if QUESTION.is_match(utterance) {
            HELP_REPLY.to_string()
        } else {
            format!("I couldn't match that to an action. {}", HELP_REPLY)
        };
        Ok(Inference {
            reply: Some(reply),
            ..Default::default()
        })
    }
}
