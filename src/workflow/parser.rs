//! Workflow Parser
//!
//! Loads workflow definitions from YAML or JSON files. The format is
//! chosen from the file extension (`.json` is JSON, anything else YAML).
//! Loaded definitions are validated before they are returned.

use std::fs;
use std::path::Path;

use log::{debug, info};

use crate::error::Result;

use super::model::WorkflowDefinition;
use super::validator;

/// Serialization format of a definition file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefinitionFormat {
    Yaml,
    Json,
}

impl DefinitionFormat {
    /// Picks the format from a path's extension.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Yaml,
        }
    }
}

/// Parses and validates a definition from a string.
pub fn parse_definition(content: &str, format: DefinitionFormat) -> Result<WorkflowDefinition> {
    let mut definition: WorkflowDefinition = match format {
        DefinitionFormat::Yaml => serde_yaml::from_str(content)?,
        DefinitionFormat::Json => serde_json::from_str(content)?,
    };

    definition.name = definition.name.trim().to_string();
    for node in &mut definition.nodes {
        node.id = node.id.trim().to_string();
    }

    validator::validate(&definition)?;
    Ok(definition)
}

/// Loads a workflow definition from a file.
///
/// # Example
///
/// ```rust,no_run
/// use phasekeeper::workflow::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("nightly.yaml")?;
///     println!("Loaded {} nodes", definition.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<WorkflowDefinition> {
    let path = path.as_ref();
    info!("Loading workflow from: {}", path.display());

    let content = fs::read_to_string(path)?;
    debug!("Definition loaded ({} bytes)", content.len());

    let definition = parse_definition(&content, DefinitionFormat::from_path(path))?;
    info!(
        "Parsed workflow '{}': {} nodes, actions {:?}",
        definition.name,
        definition.len(),
        definition.actions()
    );

    Ok(definition)
}

/// Writes a definition to a file in the format its extension implies.
pub fn save_definition(definition: &WorkflowDefinition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let content = match DefinitionFormat::from_path(path) {
        DefinitionFormat::Yaml => serde_yaml::to_string(definition)?,
        DefinitionFormat::Json => serde_json::to_string_pretty(definition)?,
    };

    fs::write(path, content)?;
    info!("Workflow saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{OrchestratorError, ValidationError};
    use crate::workflow::{ErrorHandlingStrategy, OptimizationStrategy, WorkflowNode};
    use std::time::Duration;
    use tempfile::tempdir;

    const YAML: &str = r#"
name: nightly
optimization_strategy: resource_optimal
error_handling_strategy: fail_fast
max_parallel_tasks: 2
global_timeout: 60
nodes:
  - id: fetch
    action: system_command
    steps:
      - description: download
        action: run
        parameters: { command: "curl example.org" }
  - id: summarize
    action: llm_call
    dependencies: [fetch]
    priority: 5
    resources_required: { gpu: 1 }
    dependency_conditions:
      - depends_on_result: { node_id: fetch, operator: equals, value: "ok" }
      - time_window: { start: "08:00:00", end: "18:00:00" }
"#;

    #[test]
    fn test_parse_yaml_definition() {
        let def = parse_definition(YAML, DefinitionFormat::Yaml).unwrap();

        assert_eq!(def.name, "nightly");
        assert_eq!(def.len(), 2);
        assert_eq!(def.optimization_strategy, OptimizationStrategy::ResourceOptimal);
        assert_eq!(def.error_handling_strategy, ErrorHandlingStrategy::FailFast);
        assert_eq!(def.max_parallel_tasks, 2);
        assert_eq!(def.global_timeout, Duration::from_secs(60));

        let summarize = def.get_node("summarize").unwrap();
        assert!(summarize.dependencies.contains("fetch"));
        assert_eq!(summarize.resources_required["gpu"], 1);
        assert_eq!(summarize.dependency_conditions.len(), 2);
        assert_eq!(summarize.dependency_conditions[0].referenced_node(), Some("fetch"));
    }

    #[test]
    fn test_conditions_load_from_yaml_and_json_files() {
        let temp_dir = tempdir().unwrap();
        let def = parse_definition(YAML, DefinitionFormat::Yaml).unwrap();

        for file in ["conditions.yaml", "conditions.json"] {
            let path = temp_dir.path().join(file);
            save_definition(&def, &path).unwrap();
            assert_eq!(load_definition(&path).unwrap(), def);
        }
    }

    #[test]
    fn test_parse_rejects_overflowing_timeout() {
        let yaml = "name: huge\nnodes:\n  - { id: a, action: task, timeout: 1e30 }\n";
        assert!(matches!(
            parse_definition(yaml, DefinitionFormat::Yaml),
            Err(OrchestratorError::Yaml(_))
        ));
    }

    #[test]
    fn test_parse_json_definition() {
        let json = r#"{
            "name": "json-flow",
            "nodes": [
                { "id": "a", "action": "task" },
                { "id": "b", "action": "task", "dependencies": ["a"] }
            ]
        }"#;
        let def = parse_definition(json, DefinitionFormat::Json).unwrap();
        assert_eq!(def.len(), 2);
        assert_eq!(def.optimization_strategy, OptimizationStrategy::Balanced);
    }

    #[test]
    fn test_parse_rejects_invalid_graph() {
        let yaml = r#"
name: broken
nodes:
  - { id: a, action: task, dependencies: [b] }
  - { id: b, action: task, dependencies: [a] }
"#;
        match parse_definition(yaml, DefinitionFormat::Yaml) {
            Err(OrchestratorError::Validation(ValidationError::CyclicDependency { .. })) => {}
            other => panic!("Expected cycle error, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_rejects_malformed_yaml() {
        let result = parse_definition("name: [unclosed", DefinitionFormat::Yaml);
        assert!(matches!(result, Err(OrchestratorError::Yaml(_))));
    }

    #[test]
    fn test_format_from_path() {
        assert_eq!(DefinitionFormat::from_path(Path::new("a.json")), DefinitionFormat::Json);
        assert_eq!(DefinitionFormat::from_path(Path::new("a.JSON")), DefinitionFormat::Json);
        assert_eq!(DefinitionFormat::from_path(Path::new("a.yml")), DefinitionFormat::Yaml);
        assert_eq!(DefinitionFormat::from_path(Path::new("noext")), DefinitionFormat::Yaml);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let temp_dir = tempdir().unwrap();
        let def = WorkflowDefinition::from_nodes(
            "saved",
            vec![
                WorkflowNode::new("a", "task"),
                WorkflowNode::new("b", "task").depends_on("a"),
            ],
        );

        for file in ["flow.yaml", "flow.json"] {
            let path = temp_dir.path().join(file);
            save_definition(&def, &path).unwrap();
            let loaded = load_definition(&path).unwrap();
            assert_eq!(loaded, def);
        }
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_definition("/nonexistent/path/workflow.yaml");
        assert!(matches!(result, Err(OrchestratorError::Io(_))));
    }
}
