// SPDX-FileCopyrightText: 2026 Parley Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tool trait and registry with compiled argument schemas.
//!
//! Every [`Tool`] declares a JSON Schema for its arguments. The
//! [`ToolRegistry`] compiles that schema once at registration, closing the
//! top-level object against unknown fields, and validates every call against
//! it before the tool is ever invoked.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parley_core::{CustomerKey, ParleyError};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Output from a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutput {
    /// Result document, or `{"error": ...}` when `is_error` is set.
    pub content: Value,
    /// The tool answered and reported a confirmed failure.
    pub is_error: bool,
}

impl ToolOutput {
    pub fn ok(content: Value) -> Self {
        Self {
            content,
            is_error: false,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            content: serde_json::json!({ "error": message.into() }),
            is_error: true,
        }
    }

    /// The error text of a failed output.
    pub fn error_message(&self) -> Option<&str> {
        if !self.is_error {
            return None;
        }
        self.content
            .get("error")
            .and_then(Value::as_str)
            .or(Some("tool reported a failure"))
    }
}

/// Who a tool call is made on behalf of.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolContext {
    pub project_id: String,
    /// Customer identity; channels without one use the conversation id.
    pub customer_id: String,
    pub conversation_id: String,
    /// Stable key for the turn, used by creating tools to deduplicate.
    pub request_key: String,
}

impl ToolContext {
    pub fn customer_key(&self) -> CustomerKey {
        CustomerKey::new(&self.project_id, &self.customer_id)
    }
}

/// A callable domain operation.
///
/// Implementations either run in process or forward to an external hook. The
/// gateway only calls `invoke` with arguments that already passed the schema.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Unique name used for lookup and in planner output.
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON Schema of the arguments object.
    fn parameters_schema(&self) -> Value;

    /// Whether repeating the call cannot produce a second side effect.
    fn is_idempotent(&self) -> bool {
        true
    }

    /// Tool that can find the result of an earlier call by its request key.
    ///
    /// Creating tools name one so an uncertain outcome can be checked before
    /// the call is repeated.
    fn lookup_tool(&self) -> Option<&str> {
        None
    }

    async fn invoke(&self, ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError>;
}

struct RegisteredTool {
    tool: Arc<dyn Tool>,
    validator: jsonschema::Validator,
}

/// Registry of tools, indexed by name, each with its compiled schema.
pub struct ToolRegistry {
    tools: HashMap<String, RegisteredTool>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Registers a tool, compiling its schema.
    ///
    /// Fails with [`ParleyError::Config`] if the schema does not compile or the
    /// name is already taken.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), ParleyError> {
        let name = tool.name().to_string();
        if self.tools.contains_key(&name) {
            return Err(ParleyError::Config(format!(
                "tool `{name}` is registered twice"
            )));
        }
        let schema = close_schema(tool.parameters_schema());
        let validator = jsonschema::validator_for(&schema).map_err(|e| {
            ParleyError::Config(format!("tool `{name}` has an invalid schema: {e}"))
        })?;
        tracing::debug!(tool = %name, "tool registered");
        self.tools.insert(name, RegisteredTool { tool, validator });
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).map(|r| Arc::clone(&r.tool))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Checks `args` against the tool's schema.
    ///
    /// A `null` argument document is treated as `{}`. Returns the normalized
    /// arguments on success.
    pub fn validate(&self, name: &str, args: &Value) -> Result<Value, ParleyError> {
        let registered = self.tools.get(name).ok_or_else(|| ParleyError::ToolRejected {
            tool: name.to_string(),
            reason: "no such tool".to_string(),
        })?;
        let args = if args.is_null() {
            Value::Object(serde_json::Map::new())
        } else {
            args.clone()
        };
        let problems: Vec<String> = registered
            .validator
            .iter_errors(&args)
            .map(|e| e.to_string())
            .collect();
        if problems.is_empty() {
            Ok(args)
        } else {
            Err(ParleyError::ToolRejected {
                tool: name.to_string(),
                reason: problems.join("; "),
            })
        }
    }

    /// Returns (name, description) pairs for all registered tools, sorted.
    pub fn list(&self) -> Vec<(&str, &str)> {
        let mut entries: Vec<(&str, &str)> = self
            .tools
            .values()
            .map(|r| (r.tool.name(), r.tool.description()))
            .collect();
        entries.sort_by_key(|(name, _)| *name);
        entries
    }

    /// Planner-facing definitions for the named tools, sorted by name.
    ///
    /// Unknown names are skipped.
    pub fn definitions<'a>(&self, names: impl IntoIterator<Item = &'a str>) -> Vec<Value> {
        let mut defs: Vec<Value> = names
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|r| {
                serde_json::json!({
                    "name": r.tool.name(),
                    "description": r.tool.description(),
                    "input_schema": r.tool.parameters_schema(),
                })
            })
            .collect();
        defs.sort_by(|a, b| {
            a["name"]
                .as_str()
                .unwrap_or("")
                .cmp(b["name"].as_str().unwrap_or(""))
        });
        defs
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Forbids properties the schema does not declare, unless it says otherwise.
fn close_schema(mut schema: Value) -> Value {
    if let Value::Object(map) = &mut schema
        && !map.contains_key("additionalProperties")
    {
        map.insert("additionalProperties".to_string(), Value::Bool(false));
    }
    schema
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }

        fn description(&self) -> &str {
            "Echoes the input back"
        }

        fn parameters_schema(&self) -> Value {
            json!({
                "type": "object",
                "properties": {
                    "message": { "type": "string", "minLength": 1 }
                },
                "required": ["message"]
            })
        }

        async fn invoke(&self, _ctx: &ToolContext, args: Value) -> Result<ToolOutput, ParleyError> {
            Ok(ToolOutput::ok(args["message"].clone()))
        }
    }

    struct BrokenSchemaTool;

    #[async_trait]
    impl Tool for BrokenSchemaTool {
        fn name(&self) -> &str {
            "broken"
        }

        fn description(&self) -> &str {
            "Has an invalid schema"
        }

        fn parameters_schema(&self) -> Value {
            json!({ "type": "not-a-type" })
        }

        async fn invoke(&self, _ctx: &ToolContext, _args: Value) -> Result<ToolOutput, ParleyError> {
            Ok(ToolOutput::ok(Value::Null))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(EchoTool)).unwrap();
        registry
    }

    #[test]
    fn registers_and_retrieves_tools() {
        let registry = registry();
        assert_eq!(registry.get("echo").unwrap().name(), "echo");
        assert!(registry.get("nonexistent").is_none());
        assert_eq!(registry.list(), vec![("echo", "Echoes the input back")]);
        assert_eq!(registry.len(), 1);
        assert!(!registry.is_empty());
    }

    #[test]
    fn duplicate_registration_is_refused() {
        let mut registry = registry();
        let err = registry.register(Arc::new(EchoTool)).unwrap_err();
        assert!(matches!(err, ParleyError::Config(m) if m.contains("twice")));
    }

    #[test]
    fn invalid_schema_is_refused() {
        let mut registry = ToolRegistry::new();
        assert!(matches!(
            registry.register(Arc::new(BrokenSchemaTool)),
            Err(ParleyError::Config(_))
        ));
    }

    #[test]
    fn valid_arguments_pass() {
        let args = registry().validate("echo", &json!({"message": "hi"})).unwrap();
        assert_eq!(args["message"], "hi");
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let err = registry()
            .validate("echo", &json!({"message": "hi", "extra": 1}))
            .unwrap_err();
        assert!(matches!(err, ParleyError::ToolRejected { tool, .. } if tool == "echo"));
    }

    #[test]
    fn missing_and_mistyped_fields_are_rejected() {
        let registry = registry();
        assert!(registry.validate("echo", &json!({})).is_err());
        assert!(registry.validate("echo", &json!({"message": 5})).is_err());
        assert!(registry.validate("echo", &json!({"message": ""})).is_err());
    }

    #[test]
    fn null_arguments_validate_as_empty_object() {
        let err = registry().validate("echo", &Value::Null).unwrap_err();
        assert!(matches!(err, ParleyError::ToolRejected { reason, .. } if reason.contains("message")));
    }

    #[test]
    fn unknown_tool_is_rejected() {
        let err = registry().validate("drop_tables", &json!({})).unwrap_err();
        assert!(matches!(err, ParleyError::ToolRejected { reason, .. } if reason == "no such tool"));
    }

    #[test]
    fn definitions_cover_requested_names_only() {
        let defs = registry().definitions(["echo", "ghost"]);
        assert_eq!(defs.len(), 1);
        assert_eq!(defs[0]["name"], "echo");
        assert_eq!(defs[0]["input_schema"]["type"], "object");
    }

    #[test]
    fn error_output_carries_message() {
        let out = ToolOutput::error("slot taken");
        assert_eq!(out.error_message(), Some("slot taken"));
        assert_eq!(ToolOutput::ok(json!({})).error_message(), None);
    }
}
