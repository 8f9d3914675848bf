//! Workflow file loader
//!
//! Load workflow definitions from YAML or JSON files, or every workflow in a
//! directory.

use std::path::Path;

use super::Workflow;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error in {file}: {error}")]
    Yaml {
        file: String,
        error: serde_yaml::Error,
    },

    #[error("JSON parse error in {file}: {error}")]
    Json {
        file: String,
        error: serde_json::Error,
    },
}

pub struct WorkflowLoader;

impl WorkflowLoader {
    /// Load every `.yaml`, `.yml`, and `.json` workflow in `dir`, sorted by file name
    pub fn load_directory(dir: &Path) -> Result<Vec<Workflow>, LoadError> {
        let mut paths = Vec::new();

        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }

            let filename = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            // engine config lives next to workflows
            if filename.starts_with("agentflow.") {
                continue;
            }

            let ext = path.extension().and_then(|e| e.to_str());
            if matches!(ext, Some("yaml") | Some("yml") | Some("json")) {
                paths.push(path);
            }
        }

        paths.sort();
        paths.iter().map(|p| Self::load_file(p)).collect()
    }

    pub fn load_file(path: &Path) -> Result<Workflow, LoadError> {
        let content = std::fs::read_to_string(path)?;
        let file = path.display().to_string();

        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            serde_json::from_str(&content).map_err(|error| LoadError::Json { file, error })
        } else {
            serde_yaml::from_str(&content).map_err(|error| LoadError::Yaml { file, error })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_load_directory() {
        let dir = tempdir().unwrap();

        fs::write(
            dir.path().join("01-build.yaml"),
            r#"
id: build
nodes:
  - id: compile
    type: scriptNode
    data:
      script: make
"#,
        )
        .unwrap();

        fs::write(
            dir.path().join("02-notify.json"),
            r#"{"id": "notify", "nodes": [{"id": "n", "type": "waitNode", "data": {}}]}"#,
        )
        .unwrap();

        fs::write(dir.path().join("agentflow.yaml"), "environment: dev").unwrap();
        fs::write(dir.path().join("not-a-workflow.txt"), "ignored").unwrap();

        let workflows = WorkflowLoader::load_directory(dir.path()).unwrap();
        let ids: Vec<_> = workflows.iter().map(|w| w.id.as_str()).collect();
        assert_eq!(ids, vec!["build", "notify"]);
    }

    #[test]
    fn test_load_file_reports_path() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        fs::write(&path, "id: [unclosed").unwrap();

        let err = WorkflowLoader::load_file(&path).unwrap_err();
        assert!(matches!(err, LoadError::Yaml { .. }));
        assert!(err.to_string().contains("broken.yaml"));
    }
}
