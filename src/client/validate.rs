//! Local checks of submitted data against a template's declared properties.

use std::collections::BTreeMap;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::hal::{Property, Template};

/// A value submitted through a template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<String>),
}

impl FieldValue {
    fn is_blank(&self) -> bool {
        match self {
            FieldValue::Text(s) => s.trim().is_empty(),
            FieldValue::List(items) => items.is_empty(),
            FieldValue::Bool(_) | FieldValue::Number(_) => false,
        }
    }

    /// Every submitted value in text form, one per list item.
    pub fn texts(&self) -> Vec<String> {
        match self {
            FieldValue::Bool(b) => vec![b.to_string()],
            FieldValue::Number(n) => vec![n.to_string()],
            FieldValue::Text(s) => vec![s.clone()],
            FieldValue::List(items) => items.clone(),
        }
    }

    fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

impl From<&str> for FieldValue {
    fn from(value: &str) -> Self {
        FieldValue::Text(value.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(value: String) -> Self {
        FieldValue::Text(value)
    }
}

impl From<f64> for FieldValue {
    fn from(value: f64) -> Self {
        FieldValue::Number(value)
    }
}

impl From<bool> for FieldValue {
    fn from(value: bool) -> Self {
        FieldValue::Bool(value)
    }
}

impl From<Vec<String>> for FieldValue {
    fn from(value: Vec<String>) -> Self {
        FieldValue::List(value)
    }
}

/// Data submitted through a template, by property name.
pub type Fields = BTreeMap<String, FieldValue>;

/// Field-level failures, by property name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldErrors(pub BTreeMap<String, Vec<String>>);

impl FieldErrors {
    fn add(&mut self, field: &str, message: String) {
        self.0.entry(field.to_string()).or_default().push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, field: &str) -> Option<&[String]> {
        self.0.get(field).map(Vec::as_slice)
    }
}

impl std::fmt::Display for FieldErrors {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let parts: Vec<String> = self
            .0
            .iter()
            .map(|(field, messages)| format!("{}: {}", field, messages.join(", ")))
            .collect();
        write!(f, "{}", parts.join("; "))
    }
}

/// Checks `data` against every property of `template`.
pub fn validate(template: &Template, data: &Fields) -> Result<(), FieldErrors> {
    let mut errors = FieldErrors::default();

    for property in &template.properties {
        if property.read_only {
            continue;
        }
        match data.get(&property.name) {
            Some(value) if !value.is_blank() => check(property, value, &mut errors),
            _ if property.required => {
                errors.add(&property.name, format!("{} is required", property.name));
            }
            _ => {}
        }
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

fn check(property: &Property, value: &FieldValue, errors: &mut FieldErrors) {
    let name = property.name.as_str();

    if let FieldValue::Text(text) = value {
        let len = text.chars().count();
        if let Some(min) = property.min_length {
            if len < min {
                errors.add(name, format!("{} must be at least {} characters", name, min));
            }
        }
        if let Some(max) = property.max_length {
            if len > max {
                errors.add(name, format!("{} must be at most {} characters", name, max));
            }
        }
        if let Some(pattern) = &property.regex {
            match Regex::new(&format!("^(?:{})$", pattern)) {
                Ok(re) if !re.is_match(text) => {
                    errors.add(name, format!("{} has an invalid format", name));
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Ignoring unparseable pattern on {}: {}", name, e),
            }
        }
    }

    if property.min.is_some() || property.max.is_some() {
        match value.as_number() {
            Some(n) => {
                if let Some(min) = property.min.filter(|min| n < *min) {
                    errors.add(name, format!("{} must be at least {}", name, min));
                }
                if let Some(max) = property.max.filter(|max| n > *max) {
                    errors.add(name, format!("{} must be at most {}", name, max));
                }
            }
            None => errors.add(name, format!("{} must be a number", name)),
        }
    }

    if let Some(options) = &property.options {
        let allowed: Vec<&str> = options.inline.iter().map(|o| o.value()).collect();
        if value.texts().iter().any(|v| !allowed.contains(&v.as_str())) {
            errors.add(name, format!("{} must be one of: {}", name, allowed.join(", ")));
        }
    }
}
