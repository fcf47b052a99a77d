//! Registered tool descriptors and parameter validation.
//!
//! A [`ToolDescriptor`] is immutable after registration. Its parameter
//! schema is declarative — one [`ParameterSpec`] per parameter — and is
//! enforced before any handler runs. Handlers are boxed async functions
//! receiving the validated parameters plus the session's opaque per-tool
//! state blob.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Name of the session parameter appended to every stateful tool schema.
pub const SESSION_ID_PARAM: &str = "sessionId";

/// Declarative parameter type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamKind {
    /// JSON string.
    String,
    /// JSON integer (no fractional part).
    Integer,
    /// Any JSON number.
    Number,
    /// JSON boolean.
    Boolean,
    /// JSON object.
    Object,
    /// JSON array.
    Array,
}

impl ParamKind {
    /// Lowercase type name used in validation messages.
    #[must_use]
    pub fn type_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Object => "object",
            Self::Array => "array",
        }
    }

    /// Whether a JSON value satisfies this kind.
    #[must_use]
    pub fn matches(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Integer => value.is_i64() || value.is_u64(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::Object => value.is_object(),
            Self::Array => value.is_array(),
        }
    }
}

/// Declarative shape of one tool parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    /// Parameter name.
    pub name: String,
    /// Expected type.
    pub kind: ParamKind,
    /// Whether the parameter must be present (after defaults).
    pub required: bool,
    /// Default applied when the parameter is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    /// Human-readable description for the catalog.
    #[serde(default)]
    pub description: String,
}

impl ParameterSpec {
    /// Required parameter of the given kind.
    #[must_use]
    pub fn required<S: Into<String>>(name: S, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: true,
            default: None,
            description: String::new(),
        }
    }

    /// Optional parameter of the given kind.
    #[must_use]
    pub fn optional<S: Into<String>>(name: S, kind: ParamKind) -> Self {
        Self {
            name: name.into(),
            kind,
            required: false,
            default: None,
            description: String::new(),
        }
    }

    /// Attach a default value.
    #[must_use]
    pub fn with_default(mut self, default: Value) -> Self {
        self.default = Some(default);
        self
    }

    /// Attach a description.
    #[must_use]
    pub fn with_description<S: Into<String>>(mut self, description: S) -> Self {
        self.description = description.into();
        self
    }
}

/// Immutable descriptor of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDescriptor {
    /// Unique tool id.
    pub id: String,
    /// Display name (usually equal to the id).
    pub name: String,
    /// Tool version.
    pub version: String,
    /// Category used for catalog grouping and relationship inference.
    pub category: String,
    /// Free-form tags used for relationship inference.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    /// Human-readable description.
    pub description: String,
    /// Declarative parameter schema.
    pub parameters: Vec<ParameterSpec>,
    /// Cache TTL override for this tool's results, in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_ttl_secs: Option<u64>,
}

impl ToolDescriptor {
    /// Minimal descriptor; extend with the builder methods.
    #[must_use]
    pub fn new<S: Into<String>>(id: S, description: S) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            version: crate::envelope::DEFAULT_TOOL_VERSION.to_owned(),
            category: "general".to_owned(),
            tags: Vec::new(),
            description: description.into(),
            parameters: Vec::new(),
            cache_ttl_secs: None,
        }
    }

    /// Set the version.
    #[must_use]
    pub fn with_version<S: Into<String>>(mut self, version: S) -> Self {
        self.version = version.into();
        self
    }

    /// Set the category.
    #[must_use]
    pub fn with_category<S: Into<String>>(mut self, category: S) -> Self {
        self.category = category.into();
        self
    }

    /// Set the tags.
    #[must_use]
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Set the parameter schema.
    #[must_use]
    pub fn with_parameters(mut self, parameters: Vec<ParameterSpec>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set the cache TTL override.
    #[must_use]
    pub fn with_cache_ttl_secs(mut self, secs: u64) -> Self {
        self.cache_ttl_secs = Some(secs);
        self
    }

    /// Validate a parameter map against this schema.
    ///
    /// Applies defaults for absent optional parameters, then checks
    /// presence and types. Unknown parameters are rejected.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SchemaViolation`] with a readable message
    /// (`"name must be string"`, `"missing required parameter: name"`).
    pub fn validate_params(&self, params: &Map<String, Value>) -> Result<Map<String, Value>> {
        for key in params.keys() {
            if !self.parameters.iter().any(|p| p.name == *key) {
                return Err(Error::schema_violation(format!("unknown parameter: {key}")));
            }
        }

        let mut validated = Map::with_capacity(self.parameters.len());
        for spec in &self.parameters {
            let value = params.get(&spec.name).cloned().or_else(|| spec.default.clone());
            match value {
                Some(Value::Null) | None => {
                    if spec.required {
                        return Err(Error::schema_violation(format!(
                            "missing required parameter: {}",
                            spec.name
                        )));
                    }
                }
                Some(value) => {
                    if !spec.kind.matches(&value) {
                        return Err(Error::schema_violation(format!(
                            "{} must be {}",
                            spec.name,
                            spec.kind.type_name()
                        )));
                    }
                    validated.insert(spec.name.clone(), value);
                }
            }
        }
        Ok(validated)
    }
}

/// Outcome of one handler invocation: `{result, state?, error?}`.
///
/// A populated `error` is a soft failure — the handler completed normally
/// but reports a structured error payload. The run terminates as failed
/// and the payload rides in the error envelope's `data`, the one case
/// where a failure envelope carries non-null data. Soft failures do not
/// replace the per-tool state blob.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// Result payload wrapped into the success envelope.
    pub result: Value,
    /// Replacement for the session's per-tool state blob, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    /// Structured error detail reported by the handler, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<Value>,
}

impl HandlerOutcome {
    /// Successful outcome with the given payload.
    #[must_use]
    pub fn ok(result: Value) -> Self {
        Self {
            result,
            state: None,
            error: None,
        }
    }

    /// Attach a replacement per-tool state blob.
    #[must_use]
    pub fn with_state(mut self, state: Value) -> Self {
        self.state = Some(state);
        self
    }

    /// Soft failure carrying a structured error payload. An optional
    /// `message` string field inside `detail` becomes the envelope message.
    #[must_use]
    pub fn soft_error(detail: Value) -> Self {
        Self {
            result: Value::Null,
            state: None,
            error: Some(detail),
        }
    }
}

/// Future returned by a tool handler.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<HandlerOutcome>> + Send>>;

/// Boxed async tool handler: `(validated params, tool state) → outcome`.
pub type ToolHandler = Arc<dyn Fn(Map<String, Value>, Option<Value>) -> HandlerFuture + Send + Sync>;

/// A descriptor bound to its handler, as held by the registry.
#[derive(Clone)]
pub struct RegisteredTool {
    /// The immutable descriptor.
    pub descriptor: ToolDescriptor,
    /// The handler dispatched on `EXECUTE`.
    pub handler: ToolHandler,
}

impl fmt::Debug for RegisteredTool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredTool")
            .field("id", &self.descriptor.id)
            .field("category", &self.descriptor.category)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use serde_json::json;

    use super::*;

    fn greet() -> ToolDescriptor {
        ToolDescriptor::new("greet", "Greets by name").with_parameters(vec![
            ParameterSpec::required("name", ParamKind::String),
            ParameterSpec::optional("punctuation", ParamKind::String)
                .with_default(json!("!")),
        ])
    }

    #[test]
    fn defaults_are_applied() {
        let params = json!({"name": "ada"}).as_object().cloned().unwrap();
        let validated = greet().validate_params(&params).unwrap();
        assert_eq!(validated.get("punctuation"), Some(&json!("!")));
    }

    #[test]
    fn wrong_type_is_rejected_with_readable_message() {
        let params = json!({"name": 42}).as_object().cloned().unwrap();
        let err = greet().validate_params(&params).unwrap_err();
        assert_eq!(err.detail(), "name must be string");
        assert_eq!(err.status_code(), 422);
    }

    #[test]
    fn missing_required_is_rejected() {
        let params = Map::new();
        let err = greet().validate_params(&params).unwrap_err();
        assert_eq!(err.detail(), "missing required parameter: name");
    }

    #[test]
    fn unknown_parameter_is_rejected() {
        let params = json!({"name": "ada", "shout": true})
            .as_object()
            .cloned()
            .unwrap();
        let err = greet().validate_params(&params).unwrap_err();
        assert_eq!(err.detail(), "unknown parameter: shout");
    }
}
