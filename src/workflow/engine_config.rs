//! Engine configuration
//!
//! Loaded from a YAML file (conventionally `agentflow.yaml`):
//!
//! ```yaml
//! environment: staging
//! default_wait_seconds: 5
//! strict_conditions: false
//! max_iterations: 10000
//! http_timeout_ms: 30000
//!
//! agents:
//!   - id: local
//!     shell: sh
//!     working_dir: /srv/scripts
//!     env:
//!       DEPLOY_ENV: staging
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::loader::LoadError;

/// A script agent that runs in-process
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalAgentConfig {
    pub id: String,

    /// Shell used as `<shell> -c <script>`
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment for every script this agent runs
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl LocalAgentConfig {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            shell: default_shell(),
            working_dir: None,
            env: HashMap::new(),
        }
    }
}

fn default_shell() -> String {
    "sh".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Value of `system.environment` in every execution
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Wait node duration when `waitTime` is absent
    #[serde(default = "default_wait_seconds")]
    pub default_wait_seconds: u64,

    /// Fail condition nodes whose expression cannot be evaluated,
    /// instead of treating the condition as false
    #[serde(default)]
    pub strict_conditions: bool,

    /// Upper bound on foreach iterations per node
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,

    /// Default HTTP node timeout
    #[serde(default = "default_http_timeout_ms")]
    pub http_timeout_ms: u64,

    /// In-process agents started by the CLI
    #[serde(default)]
    pub agents: Vec<LocalAgentConfig>,
}

fn default_environment() -> String {
    "production".to_string()
}

fn default_wait_seconds() -> u64 {
    5
}

fn default_max_iterations() -> usize {
    10_000
}

fn default_http_timeout_ms() -> u64 {
    30_000
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            environment: default_environment(),
            default_wait_seconds: default_wait_seconds(),
            strict_conditions: false,
            max_iterations: default_max_iterations(),
            http_timeout_ms: default_http_timeout_ms(),
            agents: Vec::new(),
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content, path)
    }

    pub fn from_yaml(content: &str, origin: &Path) -> Result<Self, LoadError> {
        serde_yaml::from_str(content).map_err(|e| LoadError::Yaml {
            file: origin.display().to_string(),
            error: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config: EngineConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.environment, "production");
        assert_eq!(config.default_wait_seconds, 5);
        assert!(!config.strict_conditions);
        assert_eq!(config.max_iterations, 10_000);
        assert!(config.agents.is_empty());
    }

    #[test]
    fn test_agents_section() {
        let yaml = r#"
environment: staging
strict_conditions: true
agents:
  - id: local
  - id: builder
    shell: bash
    working_dir: /tmp
    env:
      CI: "1"
"#;
        let config = EngineConfig::from_yaml(yaml, Path::new("agentflow.yaml")).unwrap();
        assert_eq!(config.environment, "staging");
        assert!(config.strict_conditions);
        assert_eq!(config.agents.len(), 2);
        assert_eq!(config.agents[0].shell, "sh");
        assert_eq!(config.agents[1].shell, "bash");
        assert_eq!(config.agents[1].env.get("CI"), Some(&"1".to_string()));
    }

    #[test]
    fn test_invalid_yaml_names_file() {
        let err = EngineConfig::from_yaml("agents: 5", Path::new("bad.yaml")).unwrap_err();
        assert!(err.to_string().contains("bad.yaml"));
    }
}
