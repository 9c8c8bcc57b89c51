// crates/ashfox-server/src/schema.rs
// Data-driven input validation for tool payloads. Schemas are plain rule
// lists, rendered to JSON Schema for tools/list and checked before any
// payload reaches a usecase.

use serde::Serialize;
use serde_json::{Map, Value, json};

/// Allowed shape of one field.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldKind {
    String,
    Number,
    Integer,
    Boolean,
    Object,
    Any,
    Enum(&'static [&'static str]),
    Array(Box<FieldKind>),
}

/// One declarative rule: a top-level field, its kind, and its constraints.
#[derive(Debug, Clone)]
pub struct FieldRule {
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub non_empty: bool,
    pub description: &'static str,
}

impl FieldRule {
    pub fn new(name: &'static str, kind: FieldKind) -> Self {
        Self {
            name,
            kind,
            required: false,
            min: None,
            max: None,
            non_empty: false,
            description: "",
        }
    }

    pub fn string(name: &'static str) -> Self {
        Self::new(name, FieldKind::String)
    }

    pub fn number(name: &'static str) -> Self {
        Self::new(name, FieldKind::Number)
    }

    pub fn integer(name: &'static str) -> Self {
        Self::new(name, FieldKind::Integer)
    }

    pub fn boolean(name: &'static str) -> Self {
        Self::new(name, FieldKind::Boolean)
    }

    pub fn object(name: &'static str) -> Self {
        Self::new(name, FieldKind::Object)
    }

    pub fn any(name: &'static str) -> Self {
        Self::new(name, FieldKind::Any)
    }

    pub fn enumeration(name: &'static str, values: &'static [&'static str]) -> Self {
        Self::new(name, FieldKind::Enum(values))
    }

    pub fn array_of(name: &'static str, element: FieldKind) -> Self {
        Self::new(name, FieldKind::Array(Box::new(element)))
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn non_empty(mut self) -> Self {
        self.non_empty = true;
        self
    }

    pub fn describe(mut self, description: &'static str) -> Self {
        self.description = description;
        self
    }
}

/// First violation found while checking a payload.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaViolation {
    pub path: String,
    pub reason: &'static str,
    pub message: String,
}

/// The input schema of one tool.
#[derive(Debug, Clone, Default)]
pub struct ToolSchema {
    pub fields: Vec<FieldRule>,
}

impl ToolSchema {
    pub fn new(fields: Vec<FieldRule>) -> Self {
        Self { fields }
    }

    /// Check a payload; stops at the first violation. Unknown fields are
    /// tolerated (clients may send hints this server ignores).
    pub fn check(&self, value: &Value) -> Result<(), SchemaViolation> {
        let Some(object) = value.as_object() else {
            return Err(SchemaViolation {
                path: String::new(),
                reason: "wrong_type",
                message: "arguments must be an object".to_string(),
            });
        };
        for rule in &self.fields {
            match object.get(rule.name) {
                None | Some(Value::Null) => {
                    if rule.required {
                        return Err(SchemaViolation {
                            path: rule.name.to_string(),
                            reason: "missing_required",
                            message: format!("'{}' is required", rule.name),
                        });
                    }
                }
                Some(field) => check_kind(rule, rule.name, &rule.kind, field)?,
            }
        }
        Ok(())
    }

    /// Validate and wrap. Only [`ValidatedArgs`] enters the dispatcher, so
    /// "already validated" is a type-level fact.
    pub fn validate(&self, value: Value) -> Result<ValidatedArgs, SchemaViolation> {
        self.check(&value)?;
        Ok(ValidatedArgs(value))
    }

    /// Render the rules as a JSON-Schema object for tools/list.
    pub fn to_json_schema(&self) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for rule in &self.fields {
            let mut prop = kind_schema(&rule.kind);
            if !rule.description.is_empty() {
                prop["description"] = json!(rule.description);
            }
            if let Some(min) = rule.min {
                prop["minimum"] = json!(min);
            }
            if let Some(max) = rule.max {
                prop["maximum"] = json!(max);
            }
            if rule.non_empty {
                match rule.kind {
                    FieldKind::Array(_) => prop["minItems"] = json!(1),
                    FieldKind::String => prop["minLength"] = json!(1),
                    _ => {}
                }
            }
            properties.insert(rule.name.to_string(), prop);
            if rule.required {
                required.push(Value::String(rule.name.to_string()));
            }
        }
        let mut schema = json!({
            "type": "object",
            "properties": Value::Object(properties),
        });
        if !required.is_empty() {
            schema["required"] = Value::Array(required);
        }
        schema
    }
}

fn check_kind(
    rule: &FieldRule,
    path: &str,
    kind: &FieldKind,
    value: &Value,
) -> Result<(), SchemaViolation> {
    let wrong_type = |expected: &str| SchemaViolation {
        path: path.to_string(),
        reason: "wrong_type",
        message: format!("'{path}' must be {expected}"),
    };
    match kind {
        FieldKind::Any => Ok(()),
        FieldKind::String => {
            let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
            if rule.non_empty && s.is_empty() {
                return Err(SchemaViolation {
                    path: path.to_string(),
                    reason: "empty",
                    message: format!("'{path}' must not be empty"),
                });
            }
            Ok(())
        }
        FieldKind::Boolean => value
            .as_bool()
            .map(|_| ())
            .ok_or_else(|| wrong_type("a boolean")),
        FieldKind::Object => value
            .as_object()
            .map(|_| ())
            .ok_or_else(|| wrong_type("an object")),
        FieldKind::Number => {
            let n = value.as_f64().ok_or_else(|| wrong_type("a number"))?;
            check_range(rule, path, n)
        }
        FieldKind::Integer => {
            let n = value.as_i64().ok_or_else(|| wrong_type("an integer"))?;
            check_range(rule, path, n as f64)
        }
        FieldKind::Enum(values) => {
            let s = value.as_str().ok_or_else(|| wrong_type("a string"))?;
            if values.contains(&s) {
                Ok(())
            } else {
                Err(SchemaViolation {
                    path: path.to_string(),
                    reason: "not_in_enum",
                    message: format!("'{path}' must be one of: {}", values.join(", ")),
                })
            }
        }
        FieldKind::Array(element) => {
            let items = value.as_array().ok_or_else(|| wrong_type("an array"))?;
            if rule.non_empty && items.is_empty() {
                return Err(SchemaViolation {
                    path: path.to_string(),
                    reason: "empty",
                    message: format!("'{path}' must not be empty"),
                });
            }
            for (i, item) in items.iter().enumerate() {
                check_kind(rule, &format!("{path}[{i}]"), element, item)?;
            }
            Ok(())
        }
    }
}

fn check_range(rule: &FieldRule, path: &str, n: f64) -> Result<(), SchemaViolation> {
    let out_of_range = |bound: String| SchemaViolation {
        path: path.to_string(),
        reason: "out_of_range",
        message: format!("'{path}' must be {bound}"),
    };
    if let Some(min) = rule.min {
        if n < min {
            return Err(out_of_range(format!(">= {min}")));
        }
    }
    if let Some(max) = rule.max {
        if n > max {
            return Err(out_of_range(format!("<= {max}")));
        }
    }
    Ok(())
}

fn kind_schema(kind: &FieldKind) -> Value {
    match kind {
        FieldKind::String => json!({"type": "string"}),
        FieldKind::Number => json!({"type": "number"}),
        FieldKind::Integer => json!({"type": "integer"}),
        FieldKind::Boolean => json!({"type": "boolean"}),
        FieldKind::Object => json!({"type": "object"}),
        FieldKind::Any => json!({}),
        FieldKind::Enum(values) => json!({"type": "string", "enum": values}),
        FieldKind::Array(element) => json!({"type": "array", "items": kind_schema(element)}),
    }
}

/// Arguments that passed schema validation. The only way to construct one
/// is [`ToolSchema::validate`]; downstream code takes this type and never
/// re-checks.
#[derive(Debug, Clone)]
pub struct ValidatedArgs(Value);

impl ValidatedArgs {
    pub fn value(&self) -> &Value {
        &self.0
    }

    pub fn into_inner(self) -> Value {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ToolSchema {
        ToolSchema::new(vec![
            FieldRule::string("name").required().non_empty(),
            FieldRule::number("length").min(0.0),
            FieldRule::enumeration("policy", &["session", "live", "hybrid"]),
            FieldRule::array_of("faces", FieldKind::String).non_empty(),
            FieldRule::integer("width").min(1.0).max(4096.0),
        ])
    }

    #[test]
    fn accepts_valid_payload() {
        let args = schema()
            .validate(json!({"name": "fox", "length": 2.5, "policy": "hybrid"}))
            .unwrap();
        assert_eq!(args.value()["name"], "fox");
    }

    #[test]
    fn missing_required_field() {
        let violation = schema().check(&json!({"length": 1.0})).unwrap_err();
        assert_eq!(violation.reason, "missing_required");
        assert_eq!(violation.path, "name");
    }

    #[test]
    fn wrong_type_reports_path() {
        let violation = schema()
            .check(&json!({"name": "fox", "length": "long"}))
            .unwrap_err();
        assert_eq!(violation.reason, "wrong_type");
        assert_eq!(violation.path, "length");
    }

    #[test]
    fn enum_membership() {
        let violation = schema()
            .check(&json!({"name": "fox", "policy": "psychic"}))
            .unwrap_err();
        assert_eq!(violation.reason, "not_in_enum");
    }

    #[test]
    fn range_bounds() {
        let violation = schema()
            .check(&json!({"name": "fox", "width": 0}))
            .unwrap_err();
        assert_eq!(violation.reason, "out_of_range");
        let violation = schema()
            .check(&json!({"name": "fox", "width": 5000}))
            .unwrap_err();
        assert_eq!(violation.reason, "out_of_range");
    }

    #[test]
    fn array_elements_and_emptiness() {
        let violation = schema()
            .check(&json!({"name": "fox", "faces": []}))
            .unwrap_err();
        assert_eq!(violation.reason, "empty");
        let violation = schema()
            .check(&json!({"name": "fox", "faces": ["north", 3]}))
            .unwrap_err();
        assert_eq!(violation.path, "faces[1]");
    }

    #[test]
    fn null_counts_as_absent() {
        assert!(schema().check(&json!({"name": "fox", "length": null})).is_ok());
    }

    #[test]
    fn revalidation_is_stable() {
        let payload = json!({"name": "fox"});
        let s = schema();
        let args = s.validate(payload).unwrap();
        // Checking the already-validated value again finds nothing new.
        assert!(s.check(args.value()).is_ok());
    }

    #[test]
    fn json_schema_render() {
        let rendered = schema().to_json_schema();
        assert_eq!(rendered["type"], "object");
        assert_eq!(rendered["required"][0], "name");
        assert_eq!(rendered["properties"]["policy"]["enum"][2], "hybrid");
        assert_eq!(rendered["properties"]["faces"]["minItems"], 1);
        assert_eq!(rendered["properties"]["width"]["maximum"], 4096.0);
    }
}
