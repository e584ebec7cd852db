// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Field defaults for cluster records.
//!
//! Defaults are injected into the raw JSON object before it is decoded, and
//! only for keys the file does not mention. A key set to `""` keeps its value.

use serde_json::{Map, Value};
use url::Url;

use super::validation::URL_FIELDS;
use crate::model::{parse_cluster_url, with_trailing_slash};

/// How a missing key gets its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefaultValue {
    /// Derived from `api-url`: the leading host label is replaced with
    /// `host_label` and the path set to `path`.
    DerivedUrl {
        /// Replacement for the leading host label.
        host_label: &'static str,
        /// Path of the derived URL.
        path: &'static str,
    },
    /// Fixed string.
    Str(&'static str),
    /// Fixed boolean.
    Bool(bool),
}

/// Default for every optional key.
pub static FIELD_DEFAULTS: &[(&str, DefaultValue)] = &[
    (
        "console-url",
        DefaultValue::DerivedUrl {
            host_label: "console",
            path: "/console/",
        },
    ),
    (
        "metrics-url",
        DefaultValue::DerivedUrl {
            host_label: "metrics",
            path: "/",
        },
    ),
    (
        "logging-url",
        DefaultValue::DerivedUrl {
            host_label: "console",
            path: "/console/",
        },
    ),
    ("type", DefaultValue::Str("OSO")),
    ("service-account-token-encrypted", DefaultValue::Bool(true)),
    ("capacity-exhausted", DefaultValue::Bool(false)),
    ("token-provider-id", DefaultValue::Str("")),
];

/// Fill absent keys from [`FIELD_DEFAULTS`], then add trailing slashes to URLs.
///
/// Derived URLs are skipped when `api-url` is missing or unparsable; the
/// validator reports that instead.
pub fn apply_defaults(record: &mut Map<String, Value>) {
    let api_url = record
        .get("api-url")
        .and_then(Value::as_str)
        .and_then(|raw| parse_cluster_url(raw).ok());

    for (name, default) in FIELD_DEFAULTS {
        if record.contains_key(*name) {
            continue;
        }
        let value = match default {
            DefaultValue::DerivedUrl { host_label, path } => {
                let Some(api) = &api_url else { continue };
                match derive_url(api, host_label, path) {
                    Some(url) => Value::String(url),
                    None => continue,
                }
            }
            DefaultValue::Str(s) => Value::String((*s).to_string()),
            DefaultValue::Bool(b) => Value::Bool(*b),
        };
        record.insert((*name).to_string(), value);
    }

    for name in URL_FIELDS {
        if let Some(Value::String(url)) = record.get_mut(name)
            && !url.trim().is_empty()
        {
            *url = with_trailing_slash(url);
        }
    }
}

/// Derived default for a URL key; `None` for keys without one.
pub fn default_url_for(field: &str, api_url: &Url) -> Option<String> {
    FIELD_DEFAULTS
        .iter()
        .find(|(name, _)| *name == field)
        .and_then(|(_, default)| match default {
            DefaultValue::DerivedUrl { host_label, path } => derive_url(api_url, host_label, path),
            _ => None,
        })
}

/// Derive an auxiliary endpoint URL from the API URL.
///
/// `https://api.c1.example.com:6443/` with label `console` and path
/// `/console/` becomes `https://console.c1.example.com:6443/console/`.
/// A single-label host gets the label prepended.
pub fn derive_url(api_url: &Url, host_label: &str, path: &str) -> Option<String> {
    let host = api_url.host_str()?;
    let derived_host = match host.split_once('.') {
        Some((_, rest)) => format!("{}.{}", host_label, rest),
        None => format!("{}.{}", host_label, host),
    };

    let mut url = api_url.clone();
    url.set_host(Some(&derived_host)).ok()?;
    url.set_path(path);
    url.set_query(None);
    url.set_fragment(None);
    Some(with_trailing_slash(url.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster_config::validation::{FieldKind, field_spec};
    use serde_json::json;

    #[test]
    fn test_field_defaults_match_declared_fields() {
        for (name, default) in FIELD_DEFAULTS {
            let spec = field_spec(name).unwrap_or_else(|| panic!("unknown field {name}"));
            assert!(
                !spec.required,
                "{name} is required and must not have a default"
            );
            let expected = match default {
                DefaultValue::DerivedUrl { .. } | DefaultValue::Str(_) => FieldKind::String,
                DefaultValue::Bool(_) => FieldKind::Bool,
            };
            assert_eq!(spec.kind, expected, "default kind mismatch for {name}");
            if let DefaultValue::Str(value) = default
                && *name == "type"
            {
                assert!(value.parse::<crate::model::ClusterType>().is_ok());
            }
        }
    }

    #[test]
    fn test_derive_url() {
        let api = Url::parse("https://api.starter-us-east-2.openshift.com/").unwrap();
        assert_eq!(
            derive_url(&api, "console", "/console/").unwrap(),
            "https://console.starter-us-east-2.openshift.com/console/"
        );
        assert_eq!(
            derive_url(&api, "metrics", "/").unwrap(),
            "https://metrics.starter-us-east-2.openshift.com/"
        );

        let with_port = Url::parse("https://api.c1.example.com:6443/some/path?q=1").unwrap();
        assert_eq!(
            derive_url(&with_port, "console", "/console/").unwrap(),
            "https://console.c1.example.com:6443/console/"
        );

        let single = Url::parse("http://localhost:8443").unwrap();
        assert_eq!(
            derive_url(&single, "metrics", "/").unwrap(),
            "http://metrics.localhost:8443/"
        );
    }

    #[test]
    fn test_default_url_for() {
        let api = Url::parse("https://api.c1.example.com/").unwrap();
        assert_eq!(
            default_url_for("logging-url", &api).unwrap(),
            "https://console.c1.example.com/console/"
        );
        assert!(default_url_for("type", &api).is_none());
        assert!(default_url_for("api-url", &api).is_none());
    }

    #[test]
    fn test_apply_defaults_only_fills_absent_keys() {
        let mut record = match json!({
            "api-url": "https://api.c1.example.com",
            "logging-url": "",
            "token-provider-id": "",
            "service-account-token-encrypted": false,
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };

        apply_defaults(&mut record);

        assert_eq!(record["api-url"], "https://api.c1.example.com/");
        assert_eq!(
            record["console-url"],
            "https://console.c1.example.com/console/"
        );

        assert_eq!(record["metrics-url"], "https://metrics.c1.example.com/");
        // Explicitly assigned values are kept, empty or not.
        assert_eq!(record["logging-url"], "");
        assert_eq!(record["token-provider-id"], "");
        assert_eq!(record["service-account-token-encrypted"], false);
        assert_eq!(record["type"], "OSO");
        assert_eq!(record["capacity-exhausted"], false);
    }

    #[test]
    fn test_apply_defaults_without_api_url_skips_derived_urls() {
        let mut record = Map::new();
        apply_defaults(&mut record);

        assert!(!record.contains_key("console-url"));
        assert!(!record.contains_key("metrics-url"));
        assert_eq!(record["type"], "OSO");
    }
}
