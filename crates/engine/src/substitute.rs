//! Typed variable substitution with injection-safe escaping.
//!
//! Substitution is the second gate in the pipeline: the schema is checked,
//! every binding is coerced into a [`VarValue`] keyed by its declared type,
//! rendered through the driver's quoting primitive, spliced into the text by
//! literal `{{name}}` replacement, and the result is re-run through the
//! validator. A value cannot smuggle disallowed syntax past that re-check
//! even when it survives escaping.

use crate::definition::{Bindings, QueryDefinition, ValidationReport, VarType, VarValue};
use crate::validate::QueryValidator;
use cohort_common::config::SafetySettings;
use cohort_error::{CohortError, ErrorCode, ErrorContext};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static VARIABLE_NAME_REGEX: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-z_][a-z0-9_]*$").unwrap());

static INTEGER_STRING_REGEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^-?\d+$").unwrap());

pub struct VariableSubstitutor<'a> {
    validator: &'a QueryValidator,
    max_variables: usize,
    max_name_length: usize,
    max_rendered_length: usize,
}

impl<'a> VariableSubstitutor<'a> {
    pub fn new(validator: &'a QueryValidator, settings: &SafetySettings) -> Self {
        Self {
            validator,
            max_variables: settings.max_variables,
            max_name_length: cohort_common::config::MAX_VARIABLE_NAME_LENGTH,
            max_rendered_length: settings.max_rendered_value_length,
        }
    }

    /// Check the declared schema alone, without bindings. Used for
    /// authoring-time feedback and as the first step of substitution.
    pub fn validate_schema(&self, definition: &QueryDefinition) -> ValidationReport {
        let mut report = ValidationReport::default();

        if definition.variables.len() > self.max_variables {
            report.push(CohortError::new(
                ErrorCode::TooManyVariables,
                format!(
                    "Too many variables: {} declared, maximum is {}",
                    definition.variables.len(),
                    self.max_variables
                ),
            ));
        }

        for spec in &definition.variables {
            if spec.name.len() > self.max_name_length
                || !VARIABLE_NAME_REGEX.is_match(&spec.name)
            {
                report.push(CohortError::new(
                    ErrorCode::MalformedVariable,
                    format!("Malformed variable name: '{}'", spec.name),
                ));
            }
        }

        report
    }

    /// Dry-run binding resolution against the schema. Reports missing
    /// required variables and type mismatches without producing query text.
    pub fn validate_bindings(
        &self,
        definition: &QueryDefinition,
        bindings: &Bindings,
    ) -> ValidationReport {
        let mut report = self.validate_schema(definition);
        self.resolve(definition, bindings, &mut report);
        report
    }

    /// Produce fully substituted, re-validated query text.
    ///
    /// Fails closed: any schema, binding, or post-substitution validation
    /// error aborts with the accumulated report and no partial text escapes.
    pub fn substitute(
        &self,
        definition: &QueryDefinition,
        bindings: &Bindings,
    ) -> Result<String, ValidationReport> {
        let mut report = self.validate_schema(definition);
        let resolved = self.resolve(definition, bindings, &mut report);

        if !report.is_valid() {
            return Err(report);
        }

        let mut text = definition.query_text.clone();
        for (name, value) in &resolved {
            // Literal replacement for declared, validated variables only;
            // unknown {{...}} tokens stay untouched.
            text = text.replace(&format!("{{{{{name}}}}}"), &value.to_sql());
        }

        let post = self.validator.validate(&text);
        if !post.is_valid() {
            let mut report = ValidationReport::default();
            for mut error in post.errors {
                error.message = format!("After substitution: {}", error.message);
                report.push(error);
            }
            return Err(report);
        }

        Ok(text)
    }

    fn resolve(
        &self,
        definition: &QueryDefinition,
        bindings: &Bindings,
        report: &mut ValidationReport,
    ) -> Vec<(String, VarValue)> {
        let mut resolved = Vec::new();

        for spec in &definition.variables {
            let provided = bindings.get(&spec.name).or(spec.default.as_ref());

            let value = match provided {
                Some(value) => value,
                None if spec.required => {
                    report.push(
                        CohortError::new(
                            ErrorCode::MissingVariable,
                            format!("Missing required variable: '{}'", spec.name),
                        )
                        .with_context(ErrorContext::Variable {
                            name: spec.name.clone(),
                            declared_type: spec.var_type.as_str().to_string(),
                            provided: None,
                        }),
                    );
                    continue;
                }
                None => continue,
            };

            match coerce(spec.var_type, value) {
                Ok(coerced) => {
                    let rendered = coerced.to_sql();
                    if rendered.len() > self.max_rendered_length {
                        report.push(CohortError::new(
                            ErrorCode::ValueTooLong,
                            format!(
                                "Variable '{}' value exceeds maximum length of {} characters",
                                spec.name, self.max_rendered_length
                            ),
                        ));
                    } else {
                        resolved.push((spec.name.clone(), coerced));
                    }
                }
                Err(detail) => {
                    report.push(
                        CohortError::new(
                            ErrorCode::VariableTypeMismatch,
                            format!(
                                "Variable '{}' must be a {}: {detail}",
                                spec.name,
                                spec.var_type.as_str()
                            ),
                        )
                        .with_context(ErrorContext::Variable {
                            name: spec.name.clone(),
                            declared_type: spec.var_type.as_str().to_string(),
                            provided: Some(json_type_name(value).to_string()),
                        }),
                    );
                }
            }
        }

        resolved
    }
}

/// Coerce a loosely typed JSON binding into the declared variable type.
fn coerce(var_type: VarType, value: &Value) -> Result<VarValue, String> {
    match var_type {
        VarType::String => match value {
            Value::String(s) => Ok(VarValue::Text(s.clone())),
            Value::Number(n) => Ok(VarValue::Text(n.to_string())),
            other => Err(format!("got {}", json_type_name(other))),
        },
        VarType::Integer => match value {
            Value::Number(n) => n
                .as_i64()
                .map(VarValue::Int)
                .ok_or_else(|| "not an integer".to_string()),
            Value::String(s) if INTEGER_STRING_REGEX.is_match(s) => s
                .parse::<i64>()
                .map(VarValue::Int)
                .map_err(|_| "out of range".to_string()),
            other => Err(format!("got {}", json_type_name(other))),
        },
        VarType::Boolean => match value {
            Value::Bool(b) => Ok(VarValue::Bool(*b)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(VarValue::Bool(true)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(VarValue::Bool(false)),
            Value::String(s) => match s.to_lowercase().as_str() {
                "true" | "1" => Ok(VarValue::Bool(true)),
                "false" | "0" => Ok(VarValue::Bool(false)),
                _ => Err(format!("got '{s}'")),
            },
            other => Err(format!("got {}", json_type_name(other))),
        },
        VarType::Array => match value {
            Value::Array(items) => {
                let mut elements = Vec::with_capacity(items.len());
                for item in items {
                    match item {
                        Value::String(s) => elements.push(s.clone()),
                        Value::Number(n) => elements.push(n.to_string()),
                        other => return Err(format!("element is {}", json_type_name(other))),
                    }
                }
                Ok(VarValue::List(elements))
            }
            // A comma-separated string is accepted as a convenience for
            // form-style callers.
            Value::String(s) => Ok(VarValue::List(
                s.split(',').map(|e| e.trim().to_string()).collect(),
            )),
            other => Err(format!("got {}", json_type_name(other))),
        },
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
