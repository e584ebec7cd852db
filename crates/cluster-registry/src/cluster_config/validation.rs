// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Accumulating validation of raw cluster records.
//!
//! Every check appends to a shared issue list instead of returning early, so
//! one load reports every offending field of every record.

use std::collections::HashMap;
use std::fmt;

use serde_json::{Map, Value};

use super::defaults::{DefaultValue, FIELD_DEFAULTS};
use crate::model::{ClusterType, parse_cluster_url};

/// JSON kind a configuration field must hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// JSON string.
    String,
    /// JSON boolean.
    Bool,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Bool => value.is_boolean(),
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::String => "string",
            Self::Bool => "boolean",
        })
    }
}

/// Declared shape of one configuration key.
#[derive(Debug, Clone, Copy)]
pub struct FieldSpec {
    /// Key in the JSON record.
    pub name: &'static str,
    /// Expected JSON kind.
    pub kind: FieldKind,
    /// Whether the key must be present and non-empty.
    pub required: bool,
}

const fn field(name: &'static str, kind: FieldKind, required: bool) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required,
    }
}

/// Every key a cluster record may carry.
pub static FIELDS: &[FieldSpec] = &[
    field("name", FieldKind::String, true),
    field("api-url", FieldKind::String, true),
    field("console-url", FieldKind::String, false),
    field("metrics-url", FieldKind::String, false),
    field("logging-url", FieldKind::String, false),
    field("app-dns", FieldKind::String, true),
    field("service-account-token", FieldKind::String, true),
    field("service-account-username", FieldKind::String, true),
    field("service-account-token-encrypted", FieldKind::Bool, false),
    field("token-provider-id", FieldKind::String, false),
    field("auth-client-id", FieldKind::String, true),
    field("auth-client-secret", FieldKind::String, true),
    field("auth-client-default-scope", FieldKind::String, true),
    field("type", FieldKind::String, false),
    field("capacity-exhausted", FieldKind::Bool, false),
];

/// Keys holding URLs.
pub const URL_FIELDS: [&str; 4] = ["api-url", "console-url", "metrics-url", "logging-url"];

/// Look up the declared shape of a key.
pub fn field_spec(name: &str) -> Option<&'static FieldSpec> {
    FIELDS.iter().find(|spec| spec.name == name)
}

/// One problem found in the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    /// Index of the record in the `clusters` array; `None` for file-level issues.
    pub record: Option<usize>,
    /// The record's `name`, when it has a usable one.
    pub name: Option<String>,
    /// Offending key, if the issue is about one field.
    pub field: Option<String>,
    /// What is wrong.
    pub message: String,
}

impl ValidationIssue {
    pub(crate) fn file(message: impl Into<String>) -> Self {
        Self {
            record: None,
            name: None,
            field: None,
            message: message.into(),
        }
    }

    fn at(index: usize, record: &Map<String, Value>, field: Option<&str>, message: String) -> Self {
        Self {
            record: Some(index),
            name: record
                .get("name")
                .and_then(Value::as_str)
                .filter(|name| !name.trim().is_empty())
                .map(str::to_string),
            field: field.map(str::to_string),
            message,
        }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(index) = self.record {
            write!(f, "clusters[{}]", index)?;
            if let Some(name) = &self.name {
                write!(f, " ({})", name)?;
            }
            f.write_str(": ")?;
        }
        if let Some(field) = &self.field {
            write!(f, "{}: ", field)?;
        }
        f.write_str(&self.message)
    }
}

/// Render issues as one aggregate message.
pub(crate) fn render_issues(issues: &[ValidationIssue]) -> String {
    issues
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Report keys that hold a JSON kind other than the declared one.
///
/// Runs before defaults are injected.
pub(crate) fn check_types(
    index: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<ValidationIssue>,
) {
    for spec in FIELDS {
        if let Some(value) = record.get(spec.name)
            && !spec.kind.matches(value)
        {
            issues.push(ValidationIssue::at(
                index,
                record,
                Some(spec.name),
                format!("expected a {}, found {}", spec.kind, json_kind(value)),
            ));
        }
    }
}

/// Report missing required keys, empty required strings, unknown types and bad URLs.
///
/// Runs after defaults are injected. Keys with the wrong JSON kind were
/// already reported by [`check_types`] and are skipped here.
pub(crate) fn check_values(
    index: usize,
    record: &Map<String, Value>,
    issues: &mut Vec<ValidationIssue>,
) {
    for spec in FIELDS.iter().filter(|spec| spec.required) {
        match record.get(spec.name) {
            None => issues.push(ValidationIssue::at(
                index,
                record,
                Some(spec.name),
                "is required".to_string(),
            )),
            Some(Value::String(s)) if s.trim().is_empty() => issues.push(ValidationIssue::at(
                index,
                record,
                Some(spec.name),
                "must not be empty".to_string(),
            )),
            Some(_) => {}
        }
    }

    if let Some(Value::String(raw)) = record.get("type")
        && raw.parse::<ClusterType>().is_err()
    {
        issues.push(ValidationIssue::at(
            index,
            record,
            Some("type"),
            format!("'{}' is not one of OSD, OCP, OSO", raw),
        ));
    }

    for name in URL_FIELDS {
        if let Some(Value::String(raw)) = record.get(name)
            && !raw.trim().is_empty()
            && let Err(message) = parse_cluster_url(raw)
        {
            issues.push(ValidationIssue::at(index, record, Some(name), message));
        }
    }

    // Defaults left these absent because the API host gives nothing to derive from.
    if let Some(Value::String(raw)) = record.get("api-url")
        && parse_cluster_url(raw).is_ok()
    {
        for (name, default) in FIELD_DEFAULTS {
            if matches!(default, DefaultValue::DerivedUrl { .. }) && !record.contains_key(*name) {
                issues.push(ValidationIssue::at(
                    index,
                    record,
                    Some(*name),
                    format!("cannot be derived from api-url '{}'", raw),
                ));
            }
        }
    }
}

/// Report records sharing an API URL with an earlier record.
pub(crate) fn check_duplicate_urls(
    records: &[(usize, Map<String, Value>)],
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (index, record) in records {
        let Some(url) = record.get("api-url").and_then(Value::as_str) else {
            continue;
        };
        if url.trim().is_empty() {
            continue;
        }
        if let Some(first) = seen.get(url) {
            issues.push(ValidationIssue::at(
                *index,
                record,
                Some("api-url"),
                format!("'{}' is already used by clusters[{}]", url, first),
            ));
        } else {
            seen.insert(url, *index);
        }
    }
}
