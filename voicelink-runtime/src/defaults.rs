use crate::app_config::{AgentSettings, SessionSettings, ToolSettings};

pub const DEFAULT_VOICE: &str = "marin";
pub const GITHUB_PAT_ENV: &str = "GITHUB_PAT";

/// Read-only GitHub operations; safe to run without asking.
pub const GITHUB_READ_ONLY_TOOLS: &[&str] = &[
    "get_commit",
    "get_issue",
    "get_issue_comments",
    "get_latest_release",
    "get_pull_request",
    "get_release_by_tag",
    "get_tag",
    "list_branches",
    "list_commits",
    "list_discussion_categories",
    "list_discussions",
    "list_issue_types",
    "list_issues",
    "list_pull_requests",
    "list_releases",
    "list_tags",
    "search_code",
    "search_issues",
    "search_orgs",
    "search_pull_requests",
    "search_repositories",
    "search_users",
];

pub const GITHUB_GATED_TOOLS: &[&str] = &["create_repository"];

pub fn default_agent_settings() -> AgentSettings {
    AgentSettings {
        ws_url: "wss://api.openai.com/v1/realtime".into(),
        model: "gpt-realtime".into(),
        connect_timeout_secs: 10,
        handshake_timeout_secs: 10,
        approval_timeout_secs: 30,
    }
}

pub fn github_tool() -> ToolSettings {
    ToolSettings {
        server_label: "github_mcp".into(),
        server_url: "https://api.githubcopilot.com/mcp/".into(),
        authorization_env: Some(GITHUB_PAT_ENV.into()),
        auto_approved: GITHUB_READ_ONLY_TOOLS.iter().map(|s| s.to_string()).collect(),
        requires_approval: GITHUB_GATED_TOOLS.iter().map(|s| s.to_string()).collect(),
    }
}

pub fn default_session_settings() -> SessionSettings {
    SessionSettings {
        voice: DEFAULT_VOICE.into(),
        instructions: "Help the user with Github. Speak in ENGLISH only. Be extra nice!".into(),
        tools: vec![github_tool()],
    }
}
