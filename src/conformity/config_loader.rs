use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use error_stack::{Result, ResultExt};
use tracing::{debug, info};

use crate::config::{self, Error, RulesConfig};
use crate::gitlab::Client;

/// Where a repository keeps its own rule overrides.
pub const RULES_FILE_PATH: &str = ".mr-conform.yaml";

/// Resolves the effective rule configuration for a project: the
/// repository's own rules file when present and valid, the process
/// defaults otherwise. Never blocks a check.
pub struct ConfigLoader {
    defaults: RulesConfig,
}

impl ConfigLoader {
    pub fn new(defaults: RulesConfig) -> Self {
        Self { defaults }
    }

    pub async fn load(&self, client: &Client, project: &str) -> RulesConfig {
        match self.repository_rules(client, project).await {
            Ok(rules) => {
                info!(project, "using repository rules from {RULES_FILE_PATH}");
                rules
            }
            Err(reason) => {
                debug!(project, ?reason, "falling back to default rules");
                self.defaults.clone()
            }
        }
    }

    async fn repository_rules(&self, client: &Client, project: &str) -> Result<RulesConfig, Error> {
        let content = client
            .get_file(project, RULES_FILE_PATH, "HEAD")
            .await
            .change_context_lazy(|| Error::Io(format!("can't fetch {RULES_FILE_PATH}")))?;
        let text = decode_file_content(&content)?;
        config::parse_rules(&text)
    }
}

/// Decode the base64 file content returned by the repository files API.
pub fn decode_file_content(content: &str) -> Result<String, Error> {
    let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .change_context_lazy(|| Error::Parse("invalid base64 file content".to_string()))?;
    String::from_utf8(bytes)
        .change_context_lazy(|| Error::Parse("file content is not UTF-8".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    #[test]
    fn decodes_base64_content_with_line_breaks() {
        let text = indoc! {"
            rules:
              title:
                enabled: true
        "};
        let encoded = STANDARD.encode(text);
        let wrapped = format!("{}\n{}\n", &encoded[..20], &encoded[20..]);
        assert_eq!(decode_file_content(&wrapped).unwrap(), text);
    }

    #[test]
    fn rejects_invalid_base64() {
        assert!(decode_file_content("!!not base64!!").is_err());
    }

    #[test]
    fn decoded_rules_parse_into_the_schema() {
        let encoded = STANDARD.encode("rules:\n  branch:\n    enabled: true\n");
        let text = decode_file_content(&encoded).unwrap();
        let rules = config::parse_rules(&text).unwrap();
        assert!(rules.branch.enabled);
    }
}
