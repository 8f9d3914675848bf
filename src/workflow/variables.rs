//! Three-tier variable store scoped to one execution
//!
//! Namespaces:
//! - `system` - engine-populated (executionId, workflowId, startTime, environment)
//! - `workflow` - seeded from the workflow's default variables
//! - `user` - seeded from caller-supplied initial values, read-write
//!
//! Paths are `category.name` or a bare `name`, which means `user.name`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};

pub const SYSTEM: &str = "system";
pub const WORKFLOW: &str = "workflow";
pub const USER: &str = "user";

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum VariableError {
    #[error("Variable path is empty")]
    EmptyPath,

    #[error("System variables are read-only: {0}")]
    ReadOnly(String),

    #[error("Cannot set '{path}': '{segment}' is not an object")]
    NotAnObject { path: String, segment: String },
}

/// Variable namespaces for one execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableStore {
    categories: BTreeMap<String, Map<String, Value>>,
}

impl Default for VariableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl VariableStore {
    /// Create a store with empty system/workflow/user namespaces
    pub fn new() -> Self {
        let mut categories = BTreeMap::new();
        for name in [SYSTEM, WORKFLOW, USER] {
            categories.insert(name.to_string(), Map::new());
        }
        Self { categories }
    }

    /// Seed the workflow and user namespaces
    pub fn seeded(workflow: &HashMap<String, Value>, user: &HashMap<String, Value>) -> Self {
        let mut store = Self::new();
        store.merge_category(WORKFLOW, workflow);
        store.merge_category(USER, user);
        store
    }

    /// Read a variable; `None` when absent.
    ///
    /// Segments after the name navigate into objects and arrays
    /// (`user.result.items.0`). A dotted path whose head is not a namespace
    /// is read from the user namespace.
    pub fn get(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }

        let (category, rest) = match path.split_once('.') {
            Some((head, rest)) if self.categories.contains_key(head) => (head, rest),
            Some(_) => (USER, path),
            None => (USER, path),
        };

        let mut segments = rest.split('.');
        let name = segments.next()?;
        let mut current = self.categories.get(category)?.get(name)?;
        for segment in segments {
            current = match current {
                Value::Object(map) => map.get(segment)?,
                Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }

    /// Write a variable from a node executor. The system namespace is read-only.
    pub fn set(&mut self, path: &str, value: Value) -> Result<(), VariableError> {
        let (category, name) = split_path(path)?;
        if category == SYSTEM {
            return Err(VariableError::ReadOnly(path.to_string()));
        }
        self.insert(category, name, value, path)
    }

    /// Engine-only write into the system namespace
    pub(crate) fn set_system(&mut self, name: &str, value: Value) {
        self.categories
            .entry(SYSTEM.to_string())
            .or_default()
            .insert(name.to_string(), value);
    }

    /// Remove a variable, returning its previous value
    pub fn remove(&mut self, path: &str) -> Result<Option<Value>, VariableError> {
        let (category, name) = split_path(path)?;
        if category == SYSTEM {
            return Err(VariableError::ReadOnly(path.to_string()));
        }
        Ok(self
            .categories
            .get_mut(category)
            .and_then(|map| map.remove(name)))
    }

    /// All variables in one namespace
    pub fn category(&self, name: &str) -> Option<&Map<String, Value>> {
        self.categories.get(name)
    }

    /// Merge values into a namespace, creating it if absent
    pub fn merge_category(&mut self, category: &str, values: &HashMap<String, Value>) {
        let map = self.categories.entry(category.to_string()).or_default();
        for (key, value) in values {
            map.insert(key.clone(), value.clone());
        }
    }

    /// Apply the writes and deletions that turned `base` into `changed`.
    ///
    /// Variables `changed` never touched keep whatever this store holds, so
    /// concurrent writers to different variables never undo each other.
    /// The system namespace is never merged.
    pub fn apply_changes(&mut self, base: &VariableStore, changed: &VariableStore) {
        let empty = Map::new();
        for (category, values) in &changed.categories {
            if category == SYSTEM {
                continue;
            }
            let before = base.categories.get(category).unwrap_or(&empty);
            let map = self.categories.entry(category.clone()).or_default();
            for (key, value) in values {
                if before.get(key) != Some(value) {
                    map.insert(key.clone(), value.clone());
                }
            }
        }

        for (category, values) in &base.categories {
            if category == SYSTEM {
                continue;
            }
            let after = changed.categories.get(category);
            for key in values.keys() {
                if after.map_or(true, |map| !map.contains_key(key)) {
                    if let Some(map) = self.categories.get_mut(category) {
                        map.remove(key);
                    }
                }
            }
        }
    }

    fn insert(
        &mut self,
        category: &str,
        name: &str,
        value: Value,
        path: &str,
    ) -> Result<(), VariableError> {
        let map = self.categories.entry(category.to_string()).or_default();
        let mut segments: Vec<&str> = name.split('.').collect();
        let Some(last) = segments.pop() else {
            return Err(VariableError::EmptyPath);
        };

        let mut current = map;
        for segment in segments {
            let entry = current
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            current = match entry {
                Value::Object(inner) => inner,
                _ => {
                    return Err(VariableError::NotAnObject {
                        path: path.to_string(),
                        segment: segment.to_string(),
                    })
                }
            };
        }
        current.insert(last.to_string(), value);
        Ok(())
    }
}

/// Split `category.name` (or bare `name`) into its parts
fn split_path(path: &str) -> Result<(&str, &str), VariableError> {
    let path = path.trim();
    if path.is_empty() {
        return Err(VariableError::EmptyPath);
    }
    let (category, name) = path.split_once('.').unwrap_or((USER, path));
    if category.is_empty() || name.is_empty() {
        return Err(VariableError::EmptyPath);
    }
    Ok((category, name))
}

/// Render a value the way placeholders display it
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        other => other.to_string(),
    }
}

/// Opportunistic parse of a textual value.
///
/// Detection order: JSON object/array, number, `true`/`false`, raw string.
pub fn coerce_value(text: &str) -> Value {
    let trimmed = text.trim();

    if (trimmed.starts_with('{') && trimmed.ends_with('}'))
        || (trimmed.starts_with('[') && trimmed.ends_with(']'))
    {
        if let Ok(parsed) = serde_json::from_str::<Value>(trimmed) {
            return parsed;
        }
    }

    if !trimmed.is_empty() {
        if let Ok(int) = trimmed.parse::<i64>() {
            return Value::from(int);
        }
        if let Ok(float) = trimmed.parse::<f64>() {
            if float.is_finite() {
                return Value::from(float);
            }
        }
    }

    match trimmed {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_and_get_round_trip() {
        let mut store = VariableStore::new();
        store.set("user.x", json!(5)).unwrap();

        assert_eq!(store.get("user.x"), Some(&json!(5)));
        assert_eq!(store.get("x"), Some(&json!(5)));
        assert_eq!(store.get("user.missing"), None);
    }

    #[test]
    fn test_bare_name_targets_user() {
        let mut store = VariableStore::new();
        store.set("counter", json!(1)).unwrap();
        assert_eq!(store.category(USER).unwrap().get("counter"), Some(&json!(1)));
    }

    #[test]
    fn test_new_category_is_created() {
        let mut store = VariableStore::new();
        store.set("scratch.value", json!("hi")).unwrap();
        assert_eq!(store.get("scratch.value"), Some(&json!("hi")));
    }

    #[test]
    fn test_system_is_read_only() {
        let mut store = VariableStore::new();
        store.set_system("executionId", json!("e-1"));

        assert_eq!(
            store.set("system.executionId", json!("x")),
            Err(VariableError::ReadOnly("system.executionId".to_string()))
        );
        assert_eq!(store.get("system.executionId"), Some(&json!("e-1")));
    }

    #[test]
    fn test_nested_paths() {
        let mut store = VariableStore::new();
        store
            .set("user.item", json!({"name": "db", "ports": [5432, 5433]}))
            .unwrap();

        assert_eq!(store.get("user.item.name"), Some(&json!("db")));
        assert_eq!(store.get("user.item.ports.1"), Some(&json!(5433)));
        // head is not a namespace, so the user namespace is searched
        assert_eq!(store.get("item.name"), Some(&json!("db")));

        store.set("user.config.retries", json!(3)).unwrap();
        assert_eq!(store.get("user.config"), Some(&json!({"retries": 3})));
    }

    #[test]
    fn test_seeded_namespaces() {
        let workflow = HashMap::from([("region".to_string(), json!("eu"))]);
        let user = HashMap::from([("flag".to_string(), json!(true))]);
        let store = VariableStore::seeded(&workflow, &user);

        assert_eq!(store.get("workflow.region"), Some(&json!("eu")));
        assert_eq!(store.get("flag"), Some(&json!(true)));
    }

    #[test]
    fn test_apply_changes_merges_only_what_changed() {
        let mut base = VariableStore::new();
        base.set("out", json!("init")).unwrap();
        base.set("keep", json!(1)).unwrap();
        base.set("gone", json!(true)).unwrap();

        let mut target = base.clone();
        target.set("out", json!("A")).unwrap();
        target.set("other", json!("x")).unwrap();

        let mut lane = base.clone();
        lane.set("keep", json!(2)).unwrap();
        lane.set("fresh", json!([1])).unwrap();
        lane.remove("gone").unwrap();
        lane.set_system("executionId", json!("lane"));

        target.apply_changes(&base, &lane);
        assert_eq!(target.get("out"), Some(&json!("A")));
        assert_eq!(target.get("other"), Some(&json!("x")));
        assert_eq!(target.get("keep"), Some(&json!(2)));
        assert_eq!(target.get("fresh"), Some(&json!([1])));
        assert_eq!(target.get("gone"), None);
        assert_eq!(target.get("system.executionId"), None);
    }

    #[test]
    fn test_coerce_value_detection_order() {
        assert_eq!(coerce_value(r#"{"a": 1}"#), json!({"a": 1}));
        assert_eq!(coerce_value("[1, 2]"), json!([1, 2]));
        assert_eq!(coerce_value("42"), json!(42));
        assert_eq!(coerce_value("2.5"), json!(2.5));
        assert_eq!(coerce_value("true"), json!(true));
        assert_eq!(coerce_value("false"), json!(false));
        assert_eq!(coerce_value("{not json}"), json!("{not json}"));
        assert_eq!(coerce_value("hello"), json!("hello"));
    }

    #[test]
    fn test_stringify() {
        assert_eq!(stringify(&json!("a")), "a");
        assert_eq!(stringify(&json!(5)), "5");
        assert_eq!(stringify(&json!([1])), "[1]");
        assert_eq!(stringify(&Value::Null), "null");
    }
}
