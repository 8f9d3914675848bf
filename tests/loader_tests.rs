mod common;

use agentflow::prelude::*;
use agentflow::LoadError;
use agentflow::WorkflowGraph;
use common::*;
use std::fs;
use tokio_test::{assert_err, assert_ok};

#[test]
fn test_load_empty_directory() {
    let dir = create_test_dir();
    let workflows = WorkflowLoader::load_directory(dir.path()).unwrap();
    assert!(workflows.is_empty());
}

#[test]
fn test_load_multiple_workflows_sorted() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "b.yaml", &simple_workflow("workflow-b"));
    write_workflow(dir.path(), "a.yml", &simple_workflow("workflow-a"));
    write_workflow(
        dir.path(),
        "c.json",
        r#"{"id": "workflow-c", "nodes": [{"id": "n", "type": "waitNode", "data": {"waitTime": 1}}]}"#,
    );

    let workflows = assert_ok!(WorkflowLoader::load_directory(dir.path()));

    let ids: Vec<_> = workflows.iter().map(|w| w.id.as_str()).collect();
    assert_eq!(ids, vec!["workflow-a", "workflow-b", "workflow-c"]);
}

#[test]
fn test_skip_engine_config_and_other_files() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "deploy.yaml", &simple_workflow("deploy"));
    fs::write(dir.path().join("agentflow.yaml"), "environment: staging\n").unwrap();
    fs::write(dir.path().join("README.md"), "# notes").unwrap();
    fs::create_dir(dir.path().join("nested")).unwrap();
    write_workflow(&dir.path().join("nested"), "inner.yaml", &simple_workflow("inner"));

    let workflows = WorkflowLoader::load_directory(dir.path()).unwrap();
    assert_eq!(workflows.len(), 1);
    assert_eq!(workflows[0].id, "deploy");
}

#[test]
fn test_load_file_not_found() {
    let dir = create_test_dir();
    let result = WorkflowLoader::load_file(&dir.path().join("missing.yaml"));
    assert!(matches!(result, Err(LoadError::Io(_))));
}

#[test]
fn test_load_file_invalid_yaml() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "bad.yaml", "id: [unclosed");

    let result = WorkflowLoader::load_file(&dir.path().join("bad.yaml"));
    match result {
        Err(LoadError::Yaml { file, .. }) => assert!(file.ends_with("bad.yaml")),
        other => panic!("expected YAML error, got {:?}", other.map(|w| w.id)),
    }
}

#[test]
fn test_load_file_invalid_json() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "bad.json", "{\"id\": ");

    let result = WorkflowLoader::load_file(&dir.path().join("bad.json"));
    assert!(matches!(result, Err(LoadError::Json { .. })));
}

#[test]
fn test_load_file_missing_id() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "anon.yaml", "nodes: []\n");

    assert_err!(WorkflowLoader::load_file(&dir.path().join("anon.yaml")));
}

#[test]
fn test_load_directory_with_invalid_file() {
    let dir = create_test_dir();
    write_workflow(dir.path(), "good.yaml", &simple_workflow("good"));
    write_workflow(dir.path(), "bad.yaml", "nodes: {");

    assert_err!(WorkflowLoader::load_directory(dir.path()));
}

#[test]
fn test_load_workflow_with_all_fields() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "full.yaml",
        r#"
id: release
name: Release pipeline
variables:
  service: api
  replicas: 3
nodes:
  - id: build
    type: scriptNode
    data:
      script: "make build SERVICE={{workflow.service}}"
      assignedAgent: builder
      outputVariable: artifact
  - id: check
    type: conditionNode
    data:
      condition: "{{workflow.replicas}} > 1"
  - id: rollout
    type: foreachNode
    data:
      collectionVariable: workflow.regions
  - id: skip
    type: variableNode
    data:
      variableName: skipped
      value: "true"
edges:
  - id: e1
    source: build
    target: check
    sourceHandle: success
  - id: e2
    source: check
    target: rollout
    sourceHandle: true
  - id: e3
    source: check
    target: skip
    sourceHandle: "false"
"#,
    );

    let workflow = WorkflowLoader::load_file(&dir.path().join("full.yaml")).unwrap();

    assert_eq!(workflow.display_name(), "Release pipeline");
    assert_eq!(workflow.variables["replicas"], serde_json::json!(3));
    assert_eq!(workflow.nodes.len(), 4);
    assert_eq!(workflow.nodes[0].str_field("assignedAgent"), Some("builder"));
    assert_eq!(workflow.edges[1].source_handle.as_deref(), Some("true"));
    assert_eq!(workflow.edges[2].source_handle.as_deref(), Some("false"));

    let graph = WorkflowGraph::build(&workflow).unwrap();
    assert_eq!(graph.start_nodes(), ["build".to_string()]);
    assert_eq!(
        graph.execution_levels(),
        [
            vec!["build".to_string()],
            vec!["check".to_string()],
            vec!["rollout".to_string(), "skip".to_string()],
        ]
    );
}

#[test]
fn test_load_unicode_in_workflow() {
    let dir = create_test_dir();
    write_workflow(
        dir.path(),
        "unicode.yaml",
        r#"
id: greet
name: "Grüße 🚀"
nodes:
  - id: say
    type: variableNode
    data:
      variableName: msg
      value: "こんにちは"
"#,
    );

    let workflow = WorkflowLoader::load_file(&dir.path().join("unicode.yaml")).unwrap();
    assert_eq!(workflow.display_name(), "Grüße 🚀");
    assert_eq!(workflow.nodes[0].str_field("value"), Some("こんにちは"));
}

#[test]
fn test_engine_config_file() {
    let dir = create_test_dir();
    let path = dir.path().join("agentflow.yaml");
    fs::write(
        &path,
        r#"
environment: staging
strict_conditions: true
agents:
  - id: builder
    env:
      CI: "1"
"#,
    )
    .unwrap();

    let config = EngineConfig::load(&path).unwrap();
    assert_eq!(config.environment, "staging");
    assert!(config.strict_conditions);
    assert_eq!(config.default_wait_seconds, 5);
    assert_eq!(config.agents[0].id, "builder");
    assert_eq!(config.agents[0].shell, "sh");
    assert_eq!(config.agents[0].env["CI"], "1");
}
