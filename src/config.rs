use core::fmt;
use std::fs::File;
use std::path::PathBuf;

use error_stack::{Context, Result, ResultExt};
use serde::Deserialize;

#[derive(Debug)]
pub enum Error {
    Io(String),
    Parse(String),
}

impl Context for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(msg) | Error::Parse(msg) => f.write_str(msg),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub gitlab: GitlabConfig,

    #[serde(default)]
    pub redis: RedisConfig,

    #[serde(default)]
    pub rules: RulesConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "server_host")]
    pub host: String,

    #[serde(default = "server_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GitlabConfig {
    #[serde(default)]
    pub token: String,

    #[serde(default = "gitlab_base_url")]
    pub base_url: String,

    /// Shared secret expected in `X-Gitlab-Token`; empty disables the check.
    #[serde(default)]
    pub secret_token: String,

    #[serde(default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "redis_url")]
    pub url: String,

    #[serde(default = "queue_prefix")]
    pub queue_prefix: String,

    #[serde(default = "lock_prefix")]
    pub lock_prefix: String,

    #[serde(default = "processing_prefix")]
    pub processing_prefix: String,

    #[serde(default = "lock_ttl_secs")]
    pub lock_ttl_secs: u64,

    #[serde(default = "max_retries")]
    pub max_retries: u32,

    #[serde(default = "process_interval_ms")]
    pub process_interval_ms: u64,
}

/// The per-rule configuration schema shared by the process config and the
/// repository-local `.mr-conform.yaml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RulesConfig {
    #[serde(default)]
    pub title: TitleConfig,

    #[serde(default)]
    pub description: DescriptionConfig,

    #[serde(default)]
    pub branch: BranchConfig,

    #[serde(default)]
    pub commits: CommitsConfig,

    #[serde(default)]
    pub approvals: ApprovalsConfig,

    #[serde(default)]
    pub squash: SquashConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TitleConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "title_min_length")]
    pub min_length: usize,

    #[serde(default = "title_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub conventional: ConventionalConfig,

    #[serde(default)]
    pub forbidden_words: Vec<String>,

    #[serde(default)]
    pub jira: JiraConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DescriptionConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "description_required")]
    pub required: bool,

    #[serde(default = "description_min_length")]
    pub min_length: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BranchConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "branch_allowed_prefixes")]
    pub allowed_prefixes: Vec<String>,

    #[serde(default)]
    pub forbidden_names: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CommitsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "commits_max_length")]
    pub max_length: usize,

    #[serde(default)]
    pub conventional: ConventionalConfig,

    #[serde(default)]
    pub jira: JiraConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalsConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "approvals_min_count")]
    pub min_count: u32,

    #[serde(default)]
    pub use_codeowners: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SquashConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "squash_enforce_branches")]
    pub enforce_branches: Vec<String>,

    #[serde(default = "squash_disallow_branches")]
    pub disallow_branches: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConventionalConfig {
    #[serde(default = "conventional_types")]
    pub types: Vec<String>,

    #[serde(default = "conventional_scopes")]
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct JiraConfig {
    /// Allowed Jira project keys; empty disables the Jira checks.
    #[serde(default)]
    pub keys: Vec<String>,
}

fn server_host() -> String {
    "0.0.0.0".to_string()
}

fn server_port() -> u16 {
    8080
}

fn gitlab_base_url() -> String {
    "https://gitlab.com".to_string()
}

fn redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn queue_prefix() -> String {
    "gitlab:mr:queue".to_string()
}

fn lock_prefix() -> String {
    "gitlab:mr:lock".to_string()
}

fn processing_prefix() -> String {
    "gitlab:mr:processing".to_string()
}

fn lock_ttl_secs() -> u64 {
    300
}

fn max_retries() -> u32 {
    3
}

fn process_interval_ms() -> u64 {
    1000
}

fn title_min_length() -> usize {
    10
}

fn title_max_length() -> usize {
    100
}

fn description_required() -> bool {
    true
}

fn description_min_length() -> usize {
    20
}

fn branch_allowed_prefixes() -> Vec<String> {
    vec!["feature/".to_string(), "bugfix/".to_string(), "hotfix/".to_string()]
}

fn commits_max_length() -> usize {
    72
}

fn approvals_min_count() -> u32 {
    1
}

fn squash_enforce_branches() -> Vec<String> {
    vec!["feature/*".to_string(), "fix/*".to_string()]
}

fn squash_disallow_branches() -> Vec<String> {
    vec!["release/*".to_string()]
}

fn conventional_types() -> Vec<String> {
    vec!["feat".to_string()]
}

fn conventional_scopes() -> Vec<String> {
    vec![".*".to_string()]
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: server_host(),
            port: server_port(),
        }
    }
}

impl Default for GitlabConfig {
    fn default() -> Self {
        Self {
            token: String::new(),
            base_url: gitlab_base_url(),
            secret_token: String::new(),
            insecure: false,
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: redis_url(),
            queue_prefix: queue_prefix(),
            lock_prefix: lock_prefix(),
            processing_prefix: processing_prefix(),
            lock_ttl_secs: lock_ttl_secs(),
            max_retries: max_retries(),
            process_interval_ms: process_interval_ms(),
        }
    }
}

impl Default for TitleConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_length: title_min_length(),
            max_length: title_max_length(),
            conventional: ConventionalConfig::default(),
            forbidden_words: Vec::new(),
            jira: JiraConfig::default(),
        }
    }
}

impl Default for DescriptionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            required: description_required(),
            min_length: description_min_length(),
        }
    }
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            allowed_prefixes: branch_allowed_prefixes(),
            forbidden_names: Vec::new(),
        }
    }
}

impl Default for CommitsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_length: commits_max_length(),
            conventional: ConventionalConfig::default(),
            jira: JiraConfig::default(),
        }
    }
}

impl Default for ApprovalsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            min_count: approvals_min_count(),
            use_codeowners: false,
        }
    }
}

impl Default for SquashConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            enforce_branches: squash_enforce_branches(),
            disallow_branches: squash_disallow_branches(),
        }
    }
}

impl Default for ConventionalConfig {
    fn default() -> Self {
        Self {
            types: conventional_types(),
            scopes: conventional_scopes(),
        }
    }
}

/// Load the process configuration from `path`, then apply environment
/// overrides for the secrets. Each call is a fresh parse; nothing global.
pub fn load(path: &PathBuf) -> Result<Config, Error> {
    let file = File::open(path)
        .change_context_lazy(|| Error::Io(format!("can't open config file: {}", path.to_string_lossy())))
        .attach_printable_lazy(|| format!("config path: {}", path.to_string_lossy()))?;

    let mut config: Config = serde_yaml::from_reader(file)
        .change_context_lazy(|| Error::Parse(format!("can't parse config file: {}", path.to_string_lossy())))?;

    if let Ok(token) = std::env::var("MR_CONFORM_GITLAB_TOKEN") {
        config.gitlab.token = token;
    }
    if let Ok(secret) = std::env::var("MR_CONFORM_GITLAB_SECRET_TOKEN") {
        config.gitlab.secret_token = secret;
    }
    if let Ok(base_url) = std::env::var("MR_CONFORM_GITLAB_BASE_URL") {
        config.gitlab.base_url = base_url;
    }
    if let Ok(url) = std::env::var("MR_CONFORM_REDIS_URL") {
        config.redis.url = url;
    }

    Ok(config)
}

/// Parse a repository-local rules file (already decoded from base64).
pub fn parse_rules(text: &str) -> Result<RulesConfig, Error> {
    #[derive(Deserialize)]
    struct RulesDocument {
        rules: RulesConfig,
    }

    let document: RulesDocument = serde_yaml::from_str(text)
        .change_context_lazy(|| Error::Parse("can't parse rules config".to_string()))?;
    Ok(document.rules)
}
