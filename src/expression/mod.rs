//! Expression Resolution
//!
//! Step parameters and node conditions may reference the ambiance with
//! `${...}` expressions:
//!
//! | Expression | Value |
//! |---|---|
//! | `${setup.<key>}` | setup abstraction |
//! | `${plan.execution_id}`, `${plan.run_sequence}` | plan execution |
//! | `${node.identifier}`, `${node.execution_id}`, `${node.step_type}` | current node |
//! | `${outcome.<node>.<name>}` | outcome published by an earlier node |
//! | `${trigger.type}`, `${trigger.triggered_by}` | trigger info |
//!
//! A string that is exactly one expression resolves to the referenced
//! value with its JSON type; expressions embedded in longer text are
//! interpolated as text.

use std::sync::Arc;

use log::debug;
use serde_json::Value;

use crate::error::ExpressionError;
use crate::model::Ambiance;
use crate::store::ExecutionStore;

pub type ExpressionResult<T> = Result<T, ExpressionError>;

pub trait ExpressionResolver: Send + Sync {
    /// Resolves every expression inside `value`.
    ///
    /// With `skip_unresolved` an unknown reference is left as written
    /// instead of failing.
    fn resolve(&self, ambiance: &Ambiance, value: &Value, skip_unresolved: bool) -> ExpressionResult<Value>;

    /// Evaluates a `when`/`skip` condition to a boolean.
    fn evaluate_condition(&self, ambiance: &Ambiance, condition: &str) -> ExpressionResult<bool>;
}

/// Resolver reading outcomes from the execution store.
pub struct StoreResolver {
    store: Arc<dyn ExecutionStore>,
}

impl StoreResolver {
    pub fn new(store: Arc<dyn ExecutionStore>) -> Self {
        Self { store }
    }

    fn lookup(&self, ambiance: &Ambiance, path: &str) -> Option<Value> {
        let (scope, key) = path.split_once('.')?;
        match scope {
            "setup" => ambiance.setup(key).map(|v| Value::String(v.to_string())),
            "plan" => match key {
                "execution_id" => Some(Value::String(ambiance.plan_execution_id.clone())),
                "run_sequence" => Some(Value::from(ambiance.metadata.run_sequence)),
                _ => None,
            },
            "node" => {
                let level = ambiance.current_level()?;
                match key {
                    "identifier" => Some(Value::String(level.identifier.clone())),
                    "execution_id" => Some(Value::String(level.runtime_id.clone())),
                    "step_type" => Some(Value::String(level.step_type.clone())),
                    _ => None,
                }
            }
            "trigger" => {
                let trigger = &ambiance.metadata.trigger_info;
                match key {
                    "type" => serde_json::to_value(trigger.trigger_type).ok(),
                    "triggered_by" => Some(Value::String(trigger.triggered_by.clone())),
                    _ => None,
                }
            }
            "outcome" => match self.store.outcome(&ambiance.plan_execution_id, key) {
                Ok(value) => value,
                Err(e) => {
                    debug!("Outcome lookup of '{}' failed: {}", key, e);
                    None
                }
            },
            _ => None,
        }
    }

    fn resolve_str(&self, ambiance: &Ambiance, text: &str, skip_unresolved: bool) -> ExpressionResult<Value> {
        let segments = parse_segments(text)?;

        if let [Segment::Expression(path)] = segments.as_slice() {
            return match self.lookup(ambiance, path) {
                Some(value) => Ok(value),
                None if skip_unresolved => Ok(Value::String(text.to_string())),
                None => Err(ExpressionError::Unresolved(path.to_string())),
            };
        }

        let mut out = String::with_capacity(text.len());
        for segment in segments {
            match segment {
                Segment::Text(t) => out.push_str(t),
                Segment::Expression(path) => match self.lookup(ambiance, path) {
                    Some(Value::String(s)) => out.push_str(&s),
                    Some(other) => out.push_str(&other.to_string()),
                    None if skip_unresolved => {
                        out.push_str("${");
                        out.push_str(path);
                        out.push('}');
                    }
                    None => return Err(ExpressionError::Unresolved(path.to_string())),
                },
            }
        }
        Ok(Value::String(out))
    }
}

impl ExpressionResolver for StoreResolver {
    fn resolve(&self, ambiance: &Ambiance, value: &Value, skip_unresolved: bool) -> ExpressionResult<Value> {
        match value {
            Value::String(text) => self.resolve_str(ambiance, text, skip_unresolved),
            Value::Array(items) => items
                .iter()
                .map(|item| self.resolve(ambiance, item, skip_unresolved))
                .collect::<ExpressionResult<Vec<_>>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, item) in map {
                    resolved.insert(key.clone(), self.resolve(ambiance, item, skip_unresolved)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }

    fn evaluate_condition(&self, ambiance: &Ambiance, condition: &str) -> ExpressionResult<bool> {
        let resolved = match self.resolve_str(ambiance, condition, false)? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let resolved = resolved.trim();

        if let Some((left, right)) = resolved.split_once("!=") {
            return Ok(operand(left) != operand(right));
        }
        if let Some((left, right)) = resolved.split_once("==") {
            return Ok(operand(left) == operand(right));
        }
        match resolved {
            "true" => Ok(true),
            "false" => Ok(false),
            _ => Err(ExpressionError::InvalidCondition(condition.to_string())),
        }
    }
}

fn operand(raw: &str) -> &str {
    let trimmed = raw.trim();
    trimmed
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .or_else(|| trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')))
        .unwrap_or(trimmed)
}

#[derive(Debug, PartialEq)]
enum Segment<'a> {
    Text(&'a str),
    Expression(&'a str),
}

fn parse_segments(text: &str) -> ExpressionResult<Vec<Segment<'_>>> {
    let mut segments = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find("${") {
        if start > 0 {
            segments.push(Segment::Text(&rest[..start]));
        }
        let after = &rest[start + 2..];
        let end = after
            .find('}')
            .ok_or_else(|| ExpressionError::Unterminated(text.to_string()))?;
        segments.push(Segment::Expression(after[..end].trim()));
        rest = &after[end + 1..];
    }
    if !rest.is_empty() {
        segments.push(Segment::Text(rest));
    }
    Ok(segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ExecutionMetadata, Level, PlanNode};
    use crate::store::RecordStore;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn ambiance() -> Ambiance {
        let mut setup = BTreeMap::new();
        setup.insert("region".to_string(), "eu-west-1".to_string());
        Ambiance::new("pe-1", setup, ExecutionMetadata::default())
            .with_level(Level::for_node("ne-1", &PlanNode::new("deploy", "SHELL")))
    }

    fn resolver() -> (Arc<RecordStore>, StoreResolver) {
        let store = Arc::new(RecordStore::in_memory());
        let resolver = StoreResolver::new(store.clone());
        (store, resolver)
    }

    #[test]
    fn test_parse_segments() {
        let segments = parse_segments("a ${setup.x} b").unwrap();
        assert_eq!(
            segments,
            vec![Segment::Text("a "), Segment::Expression("setup.x"), Segment::Text(" b")]
        );
        assert!(matches!(
            parse_segments("${setup.x"),
            Err(ExpressionError::Unterminated(_))
        ));
    }

    #[test]
    fn test_resolve_nested_parameters() {
        let (_, resolver) = resolver();
        let raw = json!({
            "command": "deploy --region ${setup.region}",
            "tags": ["${node.identifier}", 3],
            "plan": "${plan.execution_id}"
        });
        let resolved = resolver.resolve(&ambiance(), &raw, false).unwrap();
        assert_eq!(resolved["command"], "deploy --region eu-west-1");
        assert_eq!(resolved["tags"][0], "deploy");
        assert_eq!(resolved["tags"][1], 3);
        assert_eq!(resolved["plan"], "pe-1");
    }

    #[test]
    fn test_whole_expression_keeps_type() {
        let (store, resolver) = resolver();
        store.put_outcome("pe-1", "build.count", json!(42)).unwrap();
        let resolved = resolver
            .resolve(&ambiance(), &json!("${outcome.build.count}"), false)
            .unwrap();
        assert_eq!(resolved, json!(42));
    }

    #[test]
    fn test_unresolved_fails_unless_skipped() {
        let (_, resolver) = resolver();
        let raw = json!("${setup.missing}");
        assert_eq!(
            resolver.resolve(&ambiance(), &raw, false),
            Err(ExpressionError::Unresolved("setup.missing".to_string()))
        );
        assert_eq!(resolver.resolve(&ambiance(), &raw, true).unwrap(), raw);
    }

    #[test]
    fn test_conditions() {
        let (store, resolver) = resolver();
        store.put_outcome("pe-1", "check.result", json!("ok")).unwrap();
        let ambiance = ambiance();

        assert!(resolver.evaluate_condition(&ambiance, "true").unwrap());
        assert!(!resolver.evaluate_condition(&ambiance, " false ").unwrap());
        assert!(resolver
            .evaluate_condition(&ambiance, "${setup.region} == 'eu-west-1'")
            .unwrap());
        assert!(resolver
            .evaluate_condition(&ambiance, "${outcome.check.result} != failed")
            .unwrap());
        assert!(matches!(
            resolver.evaluate_condition(&ambiance, "maybe"),
            Err(ExpressionError::InvalidCondition(_))
        ));
    }
}
