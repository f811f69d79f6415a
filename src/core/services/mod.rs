//! Declarative per-service descriptors.
//!
//! Connection validation, parameter normalization and the `/api/services`
//! listing all read from [`descriptor`] instead of branching per service.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceType {
    Github,
    Jira,
    Jenkins,
    Slack,
}

impl ServiceType {
    pub const ALL: [ServiceType; 4] = [
        ServiceType::Github,
        ServiceType::Jira,
        ServiceType::Jenkins,
        ServiceType::Slack,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ServiceType::Github => "github",
            ServiceType::Jira => "jira",
            ServiceType::Jenkins => "jenkins",
            ServiceType::Slack => "slack",
        }
    }

    pub fn from_name(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "github" | "code_host" | "code-host" => Some(ServiceType::Github),
            "jira" | "issue_tracker" | "issue-tracker" => Some(ServiceType::Jira),
            "jenkins" | "build_server" | "build-server" => Some(ServiceType::Jenkins),
            "slack" | "chat_notifier" | "chat-notifier" => Some(ServiceType::Slack),
            _ => None,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ServiceType::from_name(s).ok_or_else(|| format!("unknown service type '{}'", s))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    CodeHost,
    IssueTracker,
    BuildServer,
    ChatNotifier,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectField {
    BaseUrl,
    Username,
    Token,
}

impl ConnectField {
    pub fn as_str(self) -> &'static str {
        match self {
            ConnectField::BaseUrl => "base_url",
            ConnectField::Username => "username",
            ConnectField::Token => "token",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "policy", content = "url", rename_all = "snake_case")]
pub enum BaseUrlPolicy {
    /// The service lives at a well-known address; user input is ignored.
    Fixed(&'static str),
    /// Self-hosted; the user must supply an `https://` URL.
    UserHttps,
    /// Self-hosted; `http://` is accepted too.
    UserHttp,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActionSpec {
    pub name: &'static str,
    pub required: &'static [&'static str],
    pub optional: &'static [&'static str],
}

#[derive(Debug, Clone, Serialize)]
pub struct ServiceDescriptor {
    pub service_type: ServiceType,
    pub display_name: &'static str,
    pub role: ServiceRole,
    pub required_fields: &'static [ConnectField],
    pub base_url: BaseUrlPolicy,
    pub supports_health_check: bool,
    pub actions: &'static [ActionSpec],
}

impl ServiceDescriptor {
    pub fn action(&self, name: &str) -> Option<&'static ActionSpec> {
        self.actions.iter().find(|a| a.name == name)
    }
}

const GITHUB_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "create_issue",
        required: &["title"],
        optional: &["repo", "body"],
    },
    ActionSpec {
        name: "list_issues",
        required: &[],
        optional: &["repo"],
    },
    ActionSpec {
        name: "get_issue",
        required: &["issue_number"],
        optional: &["repo"],
    },
    ActionSpec {
        name: "comment_issue",
        required: &["issue_number", "body"],
        optional: &["repo"],
    },
    ActionSpec {
        name: "list_branches",
        required: &[],
        optional: &["repo"],
    },
    ActionSpec {
        name: "get_branch",
        required: &["branch"],
        optional: &["repo"],
    },
    ActionSpec {
        name: "create_branch",
        required: &["branch"],
        optional: &["repo", "source_branch"],
    },
    ActionSpec {
        name: "list_repos",
        required: &[],
        optional: &[],
    },
];

const JIRA_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "create_issue",
        required: &["project_key", "summary"],
        optional: &["description", "issue_type"],
    },
    ActionSpec {
        name: "list_projects",
        required: &[],
        optional: &[],
    },
];

const JENKINS_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "trigger_build",
        required: &["job_name"],
        optional: &["parameters"],
    },
    ActionSpec {
        name: "list_jobs",
        required: &[],
        optional: &[],
    },
    ActionSpec {
        name: "build_history",
        required: &["job_name"],
        optional: &[],
    },
];

const SLACK_ACTIONS: &[ActionSpec] = &[
    ActionSpec {
        name: "send_message",
        required: &["text"],
        optional: &["channel"],
    },
    ActionSpec {
        name: "list_channels",
        required: &[],
        optional: &[],
    },
];

static GITHUB: ServiceDescriptor = ServiceDescriptor {
    service_type: ServiceType::Github,
    display_name: "GitHub",
    role: ServiceRole::CodeHost,
    required_fields: &[ConnectField::Token],
    base_url: BaseUrlPolicy::Fixed("https://api.github.com"),
    supports_health_check: true,
    actions: GITHUB_ACTIONS,
};

static JIRA: ServiceDescriptor = ServiceDescriptor {
    service_type: ServiceType::Jira,
    display_name: "Jira",
    role: ServiceRole::IssueTracker,
    required_fields: &[
        ConnectField::BaseUrl,
        ConnectField::Username,
        ConnectField::Token,
    ],
    base_url: BaseUrlPolicy::UserHttps,
    supports_health_check: true,
    actions: JIRA_ACTIONS,
};

static JENKINS: ServiceDescriptor = ServiceDescriptor {
    service_type: ServiceType::Jenkins,
    display_name: "Jenkins",
    role: ServiceRole::BuildServer,
    required_fields: &[
        ConnectField::BaseUrl,
        ConnectField::Username,
        ConnectField::Token,
    ],
    base_url: BaseUrlPolicy::UserHttp,
    supports_health_check: true,
    actions: JENKINS_ACTIONS,
};

static SLACK: ServiceDescriptor = ServiceDescriptor {
    service_type: ServiceType::Slack,
    display_name: "Slack",
    role: ServiceRole::ChatNotifier,
    required_fields: &[ConnectField::Token],
    base_url: BaseUrlPolicy::Fixed("https://slack.com/api"),
    supports_health_check: true,
    actions: SLACK_ACTIONS,
};

pub fn descriptor(service_type: ServiceType) -> &'static ServiceDescriptor {
    match service_type {
        ServiceType::Github => &GITHUB,
        ServiceType::Jira => &JIRA,
        ServiceType::Jenkins => &JENKINS,
        ServiceType::Slack => &SLACK,
    }
}

pub fn all_descriptors() -> Vec<&'static ServiceDescriptor> {
    ServiceType::ALL.iter().map(|s| descriptor(*s)).collect()
}

/// Raw payload of a connect request, before validation.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConnectFields {
    #[serde(default, alias = "service_url")]
    pub base_url: Option<String>,
    #[serde(default, alias = "api_token")]
    pub token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default, alias = "config_data")]
    pub config: serde_json::Map<String, serde_json::Value>,
}

impl ConnectFields {
    fn field(&self, field: ConnectField) -> Option<&str> {
        let value = match field {
            ConnectField::BaseUrl => self.base_url.as_deref(),
            ConnectField::Username => self.username.as_deref(),
            ConnectField::Token => self.token.as_deref(),
        };
        value.map(str::trim).filter(|v| !v.is_empty())
    }
}

/// Connect payload after descriptor validation.
#[derive(Debug, Clone)]
pub struct ValidatedFields {
    pub base_url: String,
    pub token: String,
    pub username: Option<String>,
    pub config: serde_json::Map<String, serde_json::Value>,
}

/// Check `fields` against the descriptor's required set and URL policy.
/// The error string names every missing field at once.
pub fn validate_fields(
    service_type: ServiceType,
    fields: &ConnectFields,
) -> Result<ValidatedFields, String> {
    let desc = descriptor(service_type);

    let missing: Vec<&str> = desc
        .required_fields
        .iter()
        .filter(|f| fields.field(**f).is_none())
        .map(|f| f.as_str())
        .collect();
    if !missing.is_empty() {
        return Err(format!(
            "{} connection is missing required field(s): {}",
            desc.display_name,
            missing.join(", ")
        ));
    }

    let base_url = match desc.base_url {
        BaseUrlPolicy::Fixed(url) => url.to_string(),
        BaseUrlPolicy::UserHttps | BaseUrlPolicy::UserHttp => {
            let raw = fields.field(ConnectField::BaseUrl).unwrap_or_default();
            let parsed = url::Url::parse(raw)
                .map_err(|e| format!("{} base_url is not a valid URL: {}", desc.display_name, e))?;
            let scheme_ok = match desc.base_url {
                BaseUrlPolicy::UserHttps => parsed.scheme() == "https",
                _ => matches!(parsed.scheme(), "http" | "https"),
            };
            if !scheme_ok {
                let expected = if desc.base_url == BaseUrlPolicy::UserHttps {
                    "an HTTPS"
                } else {
                    "an HTTP/HTTPS"
                };
                return Err(format!(
                    "{} base_url must be {} URL",
                    desc.display_name, expected
                ));
            }
            raw.trim_end_matches('/').to_string()
        }
    };

    Ok(ValidatedFields {
        base_url,
        token: fields
            .field(ConnectField::Token)
            .unwrap_or_default()
            .to_string(),
        username: fields.field(ConnectField::Username).map(str::to_string),
        config: fields.config.clone(),
    })
}
