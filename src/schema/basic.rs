//! Built-in schema validation engine.
//!
//! Covers the JSON-Schema keywords job descriptions use in practice:
//! - boolean schemas, `type`, `enum`, `const`
//! - `properties`, `required`, `additionalProperties`
//! - `items`, `minItems`, `maxItems`
//! - numeric and string bounds, `pattern`
//! - `allOf`, `anyOf`, `oneOf`, `not`
//!
//! Unknown keywords are ignored. When defaults are enabled, missing object
//! properties whose schema declares a `default` are filled in before the
//! rest of the object is checked.

use async_trait::async_trait;
use dashmap::DashMap;
use regex::Regex;
use serde_json::{Map, Value as JsonValue};

use crate::schema::validator::{JsonSchema, SchemaValidator, ValidationIssue, ValidationOutcome};

type Keywords = Map<String, JsonValue>;

/// Schema validator for the JSON-Schema subset used by job descriptions.
pub struct BasicSchemaValidator {
    use_defaults: bool,
    /// Compiled `pattern` regexes keyed by their source
    patterns: DashMap<String, Regex>,
}

impl BasicSchemaValidator {
    pub fn new() -> Self {
        Self {
            use_defaults: true,
            patterns: DashMap::new(),
        }
    }

    /// Enable or disable `default` injection for missing properties.
    pub fn with_defaults(mut self, enabled: bool) -> Self {
        self.use_defaults = enabled;
        self
    }

    /// Validate synchronously. [`SchemaValidator::validate`] delegates here.
    pub fn check(&self, schema: &JsonSchema, value: JsonValue) -> ValidationOutcome {
        let mut value = value;
        let mut errors = Vec::new();
        self.check_node(schema.as_value(), &mut value, "", &mut errors);

        if errors.is_empty() {
            ValidationOutcome::valid(value)
        } else {
            ValidationOutcome::invalid(value, errors)
        }
    }

    fn check_node(
        &self,
        schema: &JsonValue,
        value: &mut JsonValue,
        path: &str,
        errors: &mut Vec<ValidationIssue>,
    ) {
        let keywords = match schema {
            JsonValue::Bool(true) => return,
            JsonValue::Bool(false) => {
                errors.push(ValidationIssue::new(path, "no value is allowed here"));
                return;
            }
            JsonValue::Object(keywords) => keywords,
            _ => {
                errors.push(ValidationIssue::new(
                    path,
                    "schema must be a boolean or an object",
                ));
                return;
            }
        };

        if self.use_defaults {
            inject_defaults(keywords, value);
        }

        if let Some(expected) = keywords.get("type") {
            if !type_matches(expected, value) {
                errors.push(ValidationIssue::new(
                    path,
                    format!("must be {}", describe_type(expected)),
                ));
                return;
            }
        }

        if let Some(JsonValue::Array(allowed)) = keywords.get("enum") {
            if !allowed.contains(value) {
                errors.push(ValidationIssue::new(
                    path,
                    "must be equal to one of the allowed values",
                ));
            }
        }

        if let Some(constant) = keywords.get("const") {
            if constant != value {
                errors.push(ValidationIssue::new(path, "must be equal to constant"));
            }
        }

        match value {
            JsonValue::Number(number) => {
                if let Some(number) = number.as_f64() {
                    check_number(keywords, number, path, errors);
                }
            }
            JsonValue::String(text) => self.check_string(keywords, text, path, errors),
            JsonValue::Array(items) => self.check_array(keywords, items, path, errors),
            JsonValue::Object(map) => self.check_object(keywords, map, path, errors),
            _ => {}
        }

        self.check_combinators(keywords, value, path, errors);
    }

    fn check_string(
        &self,
        keywords: &Keywords,
        text: &str,
        path: &str,
        errors: &mut Vec<ValidationIssue>,
    ) {
        let length = text.chars().count() as u64;

        if let Some(min) = keywords.get("minLength").and_then(JsonValue::as_u64) {
            if length < min {
                errors.push(ValidationIssue::new(
                    path,
                    format!("must not have fewer than {} characters", min),
                ));
            }
        }

        if let Some(max) = keywords.get("maxLength").and_then(JsonValue::as_u64) {
            if length > max {
                errors.push(ValidationIssue::new(
                    path,
                    format!("must not have more than {} characters", max),
                ));
            }
        }

        if let Some(pattern) = keywords.get("pattern").and_then(JsonValue::as_str) {
            match self.pattern_matches(pattern, text) {
                Ok(true) => {}
                Ok(false) => errors.push(ValidationIssue::new(
                    path,
                    format!("must match pattern \"{}\"", pattern),
                )),
                Err(e) => errors.push(ValidationIssue::new(
                    path,
                    format!("invalid pattern \"{}\": {}", pattern, e),
                )),
            }
        }
    }

    fn check_array(
        &self,
        keywords: &Keywords,
        items: &mut [JsonValue],
        path: &str,
        errors: &mut Vec<ValidationIssue>,
    ) {
        let count = items.len() as u64;

        if let Some(min) = keywords.get("minItems").and_then(JsonValue::as_u64) {
            if count < min {
                errors.push(ValidationIssue::new(
                    path,
                    format!("must not have fewer than {} items", min),
                ));
            }
        }

        if let Some(max) = keywords.get("maxItems").and_then(JsonValue::as_u64) {
            if count > max {
                errors.push(ValidationIssue::new(
                    path,
                    format!("must not have more than {} items", max),
                ));
            }
        }

        match keywords.get("items") {
            // Tuple form: one schema per position
            Some(JsonValue::Array(schemas)) => {
                for (index, (item, schema)) in items.iter_mut().zip(schemas).enumerate() {
                    self.check_node(schema, item, &pointer(path, &index.to_string()), errors);
                }
            }
            Some(schema) => {
                for (index, item) in items.iter_mut().enumerate() {
                    self.check_node(schema, item, &pointer(path, &index.to_string()), errors);
                }
            }
            None => {}
        }
    }

    fn check_object(
        &self,
        keywords: &Keywords,
        map: &mut Map<String, JsonValue>,
        path: &str,
        errors: &mut Vec<ValidationIssue>,
    ) {
        if let Some(JsonValue::Array(required)) = keywords.get("required") {
            for name in required.iter().filter_map(JsonValue::as_str) {
                if !map.contains_key(name) {
                    errors.push(ValidationIssue::new(
                        path,
                        format!("must have required property '{}'", name),
                    ));
                }
            }
        }

        let properties = keywords.get("properties").and_then(JsonValue::as_object);

        if let Some(properties) = properties {
            for (name, schema) in properties {
                if let Some(property) = map.get_mut(name) {
                    self.check_node(schema, property, &pointer(path, name), errors);
                }
            }
        }

        let Some(additional) = keywords.get("additionalProperties") else {
            return;
        };

        let extra: Vec<String> = map
            .keys()
            .filter(|name| properties.is_none_or(|p| !p.contains_key(*name)))
            .cloned()
            .collect();

        for name in extra {
            match additional {
                JsonValue::Bool(false) => errors.push(ValidationIssue::new(
                    pointer(path, &name),
                    "must not have additional properties",
                )),
                schema => {
                    if let Some(property) = map.get_mut(&name) {
                        self.check_node(schema, property, &pointer(path, &name), errors);
                    }
                }
            }
        }
    }

    fn check_combinators(
        &self,
        keywords: &Keywords,
        value: &mut JsonValue,
        path: &str,
        errors: &mut Vec<ValidationIssue>,
    ) {
        if let Some(JsonValue::Array(schemas)) = keywords.get("allOf") {
            for schema in schemas {
                self.check_node(schema, value, path, errors);
            }
        }

        if let Some(JsonValue::Array(schemas)) = keywords.get("anyOf") {
            match schemas.iter().find_map(|schema| self.try_node(schema, value, path)) {
                Some(applied) => *value = applied,
                None => errors.push(ValidationIssue::new(
                    path,
                    "must match a schema in anyOf",
                )),
            }
        }

        if let Some(JsonValue::Array(schemas)) = keywords.get("oneOf") {
            let mut passing: Vec<JsonValue> = schemas
                .iter()
                .filter_map(|schema| self.try_node(schema, value, path))
                .collect();
            if passing.len() == 1 {
                *value = passing.remove(0);
            } else {
                errors.push(ValidationIssue::new(
                    path,
                    "must match exactly one schema in oneOf",
                ));
            }
        }

        if let Some(schema) = keywords.get("not") {
            if self.try_node(schema, value, path).is_some() {
                errors.push(ValidationIssue::new(path, "must not be valid"));
            }
        }
    }

    /// Validate a copy of `value`, returning the applied copy on success.
    fn try_node(&self, schema: &JsonValue, value: &JsonValue, path: &str) -> Option<JsonValue> {
        let mut candidate = value.clone();
        let mut scratch = Vec::new();
        self.check_node(schema, &mut candidate, path, &mut scratch);
        scratch.is_empty().then_some(candidate)
    }

    fn pattern_matches(&self, pattern: &str, text: &str) -> Result<bool, regex::Error> {
        if let Some(regex) = self.patterns.get(pattern) {
            return Ok(regex.is_match(text));
        }

        let regex = Regex::new(pattern)?;
        let matched = regex.is_match(text);
        self.patterns.insert(pattern.to_string(), regex);
        Ok(matched)
    }
}

impl Default for BasicSchemaValidator {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SchemaValidator for BasicSchemaValidator {
    async fn validate(&self, schema: &JsonSchema, value: JsonValue) -> ValidationOutcome {
        self.check(schema, value)
    }
}

fn inject_defaults(keywords: &Keywords, value: &mut JsonValue) {
    let (Some(properties), Some(map)) = (
        keywords.get("properties").and_then(JsonValue::as_object),
        value.as_object_mut(),
    ) else {
        return;
    };

    for (name, schema) in properties {
        if map.contains_key(name) {
            continue;
        }
        if let Some(default) = schema.get("default") {
            map.insert(name.clone(), default.clone());
        }
    }
}

fn check_number(keywords: &Keywords, number: f64, path: &str, errors: &mut Vec<ValidationIssue>) {
    let bound = |name: &str| keywords.get(name).and_then(JsonValue::as_f64);

    if let Some(min) = bound("minimum") {
        if number < min {
            errors.push(ValidationIssue::new(path, format!("must be >= {}", min)));
        }
    }
    if let Some(max) = bound("maximum") {
        if number > max {
            errors.push(ValidationIssue::new(path, format!("must be <= {}", max)));
        }
    }
    if let Some(min) = bound("exclusiveMinimum") {
        if number <= min {
            errors.push(ValidationIssue::new(path, format!("must be > {}", min)));
        }
    }
    if let Some(max) = bound("exclusiveMaximum") {
        if number >= max {
            errors.push(ValidationIssue::new(path, format!("must be < {}", max)));
        }
    }
}

fn type_matches(expected: &JsonValue, value: &JsonValue) -> bool {
    match expected {
        JsonValue::String(name) => is_type(name, value),
        JsonValue::Array(names) => names
            .iter()
            .filter_map(JsonValue::as_str)
            .any(|name| is_type(name, value)),
        _ => false,
    }
}

fn is_type(name: &str, value: &JsonValue) -> bool {
    match name {
        "null" => value.is_null(),
        "boolean" => value.is_boolean(),
        "object" => value.is_object(),
        "array" => value.is_array(),
        "string" => value.is_string(),
        "number" => value.is_number(),
        "integer" => {
            value.is_i64()
                || value.is_u64()
                || value.as_f64().is_some_and(|n| n.is_finite() && n.fract() == 0.0)
        }
        _ => false,
    }
}

fn describe_type(expected: &JsonValue) -> String {
    match expected {
        JsonValue::String(name) => name.clone(),
        JsonValue::Array(names) => names
            .iter()
            .filter_map(JsonValue::as_str)
            .collect::<Vec<_>>()
            .join(","),
        other => other.to_string(),
    }
}

/// Append one escaped segment to a JSON pointer.
fn pointer(path: &str, segment: &str) -> String {
    format!("{}/{}", path, segment.replace('~', "~0").replace('/', "~1"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn check(schema: JsonValue, value: JsonValue) -> ValidationOutcome {
        BasicSchemaValidator::new().check(&JsonSchema::new(schema), value)
    }

    #[test]
    fn test_boolean_schemas() {
        assert!(check(json!(true), json!({"anything": [1, 2]})).success);

        let outcome = check(json!(false), json!(1));
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].path, "");
    }

    #[test]
    fn test_items_schema_accepts_numeric_list() {
        let outcome = check(json!({"items": {"type": "number"}}), json!([1, 2, 3, 4]));
        assert!(outcome.success);
        assert_eq!(outcome.value, json!([1, 2, 3, 4]));
    }

    #[test]
    fn test_items_errors_carry_index_path() {
        let outcome = check(
            json!({"type": "array", "items": {"type": "number"}}),
            json!([1, "two", 3, null]),
        );
        assert!(!outcome.success);
        let paths: Vec<&str> = outcome.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["/1", "/3"]);
    }

    #[test]
    fn test_type_mismatch_on_root() {
        let outcome = check(json!({"type": "object"}), json!([1, 2]));
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].message, "must be object");
    }

    #[test]
    fn test_type_list() {
        let schema = json!({"type": ["string", "null"]});
        assert!(check(schema.clone(), json!(null)).success);
        assert!(check(schema.clone(), json!("x")).success);
        let outcome = check(schema, json!(3));
        assert_eq!(outcome.errors[0].message, "must be string,null");
    }

    #[test]
    fn test_required_and_defaults() {
        let schema = json!({
            "type": "object",
            "properties": {
                "name": {"type": "string"},
                "retries": {"type": "integer", "default": 3}
            },
            "required": ["name", "retries"]
        });

        let outcome = check(schema.clone(), json!({"name": "build"}));
        assert!(outcome.success);
        assert_eq!(outcome.value, json!({"name": "build", "retries": 3}));

        let outcome = check(schema, json!({}));
        assert!(!outcome.success);
        assert_eq!(outcome.errors.len(), 1);
        assert!(outcome.errors[0].message.contains("'name'"));
    }

    #[test]
    fn test_defaults_can_be_disabled() {
        let validator = BasicSchemaValidator::new().with_defaults(false);
        let schema = JsonSchema::new(json!({
            "properties": {"retries": {"default": 3}},
            "required": ["retries"]
        }));
        let outcome = validator.check(&schema, json!({}));
        assert!(!outcome.success);
        assert_eq!(outcome.value, json!({}));
    }

    #[test]
    fn test_additional_properties() {
        let schema = json!({
            "properties": {"a": {"type": "number"}},
            "additionalProperties": false
        });
        let outcome = check(schema, json!({"a": 1, "b/c": 2}));
        assert!(!outcome.success);
        assert_eq!(outcome.errors[0].path, "/b~1c");

        let schema = json!({"additionalProperties": {"type": "string"}});
        assert!(check(schema.clone(), json!({"x": "y"})).success);
        assert!(!check(schema, json!({"x": 1})).success);
    }

    #[test]
    fn test_nested_paths() {
        let schema = json!({
            "properties": {
                "steps": {"items": {"properties": {"timeout": {"minimum": 1}}}}
            }
        });
        let outcome = check(schema, json!({"steps": [{"timeout": 5}, {"timeout": 0}]}));
        assert_eq!(outcome.errors.len(), 1);
        assert_eq!(outcome.errors[0].path, "/steps/1/timeout");
        assert_eq!(outcome.errors[0].message, "must be >= 1");
    }

    #[test]
    fn test_numeric_and_string_bounds() {
        assert!(!check(json!({"exclusiveMaximum": 10}), json!(10)).success);
        assert!(check(json!({"maximum": 10}), json!(10)).success);
        assert!(!check(json!({"minLength": 3}), json!("ab")).success);
        assert!(check(json!({"maxLength": 2}), json!("ün")).success);
        assert!(!check(json!({"minItems": 1}), json!([])).success);
    }

    #[test]
    fn test_pattern_is_cached() {
        let validator = BasicSchemaValidator::new();
        let schema = JsonSchema::new(json!({"pattern": "^[a-z]+-[0-9]+$"}));

        assert!(validator.check(&schema, json!("job-1")).success);
        assert!(!validator.check(&schema, json!("Job1")).success);
        assert_eq!(validator.patterns.len(), 1);
    }

    #[test]
    fn test_invalid_pattern_reported() {
        let outcome = check(json!({"pattern": "("}), json!("x"));
        assert!(!outcome.success);
        assert!(outcome.errors[0].message.starts_with("invalid pattern"));
    }

    #[test]
    fn test_enum_and_const() {
        assert!(check(json!({"enum": ["a", "b"]}), json!("a")).success);
        assert!(!check(json!({"enum": ["a", "b"]}), json!("c")).success);
        assert!(!check(json!({"const": 1}), json!(2)).success);
    }

    #[test]
    fn test_combinators() {
        let any_of = json!({"anyOf": [{"type": "string"}, {"type": "number"}]});
        assert!(check(any_of.clone(), json!(1)).success);
        assert!(!check(any_of, json!(null)).success);

        let one_of = json!({"oneOf": [{"type": "integer"}, {"type": "number"}]});
        // 1 is both an integer and a number
        assert!(!check(one_of.clone(), json!(1)).success);
        assert!(check(one_of, json!(1.5)).success);

        assert!(!check(json!({"not": {"type": "null"}}), json!(null)).success);
        assert!(!check(json!({"allOf": [{"minimum": 1}, {"maximum": 2}]}), json!(3)).success);
    }

    #[test]
    fn test_any_of_keeps_defaults_from_matching_branch() {
        let schema = json!({
            "anyOf": [
                {"type": "object", "properties": {"mode": {"default": "fast"}}}
            ]
        });
        let outcome = check(schema, json!({}));
        assert_eq!(outcome.value, json!({"mode": "fast"}));
    }

    #[tokio::test]
    async fn test_async_contract_delegates_to_check() {
        let validator = BasicSchemaValidator::new();
        let outcome = validator
            .validate(&JsonSchema::new(json!({"type": "number"})), json!("nope"))
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.value, json!("nope"));
    }

    proptest! {
        #[test]
        fn property_integers_are_numbers(n in any::<i64>()) {
            let as_integer = check(json!({"type": "integer"}), json!(n));
            let as_number = check(json!({"type": "number"}), json!(n));
            prop_assert!(as_integer.success);
            prop_assert!(as_number.success);
        }

        #[test]
        fn property_strings_are_not_numbers(s in ".*") {
            let outcome = check(json!({"type": "number"}), json!(s));
            prop_assert!(!outcome.success);
            prop_assert_eq!(outcome.errors.len(), 1);
        }

        #[test]
        fn property_true_schema_returns_value_unchanged(n in any::<i32>(), s in "[a-z]{0,8}") {
            let value = json!({"n": n, "s": s});
            let outcome = check(json!(true), value.clone());
            prop_assert!(outcome.success);
            prop_assert_eq!(outcome.value, value);
        }
    }
}
