// Managed Path Configuration Model
// The subset of MediaMTX path settings this server writes, plus verbatim pass-through

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Errors raised when a known path field receives a value of the wrong shape
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PathConfigError {
    #[error("Invalid value for '{field}': expected {expected}")]
    InvalidValue {
        field: &'static str,
        expected: &'static str,
    },

    #[error("Path configuration must be a JSON object")]
    NotAnObject,

    #[error("Failed to decode path configuration: {0}")]
    Decode(String),
}

/// Known MediaMTX path fields and the JSON type each one carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PathField {
    Name,
    Source,
    SourceOnDemand,
    Fallback,
    MaxReaders,
    Record,
    RecordPath,
    RunOnInit,
    RunOnDemand,
    RunOnReady,
    RunOnReadyRestart,
    RunOnNotReady,
    RunOnRead,
    RunOnUnread,
}

impl PathField {
    pub const ALL: &'static [PathField] = &[
        PathField::Name,
        PathField::Source,
        PathField::SourceOnDemand,
        PathField::Fallback,
        PathField::MaxReaders,
        PathField::Record,
        PathField::RecordPath,
        PathField::RunOnInit,
        PathField::RunOnDemand,
        PathField::RunOnReady,
        PathField::RunOnReadyRestart,
        PathField::RunOnNotReady,
        PathField::RunOnRead,
        PathField::RunOnUnread,
    ];

    /// Key as MediaMTX spells it
    pub fn key(&self) -> &'static str {
        match self {
            PathField::Name => "name",
            PathField::Source => "source",
            PathField::SourceOnDemand => "sourceOnDemand",
            PathField::Fallback => "fallback",
            PathField::MaxReaders => "maxReaders",
            PathField::Record => "record",
            PathField::RecordPath => "recordPath",
            PathField::RunOnInit => "runOnInit",
            PathField::RunOnDemand => "runOnDemand",
            PathField::RunOnReady => "runOnReady",
            PathField::RunOnReadyRestart => "runOnReadyRestart",
            PathField::RunOnNotReady => "runOnNotReady",
            PathField::RunOnRead => "runOnRead",
            PathField::RunOnUnread => "runOnUnread",
        }
    }

    /// Resolve a key written in camelCase or PascalCase (`RunOnReady` == `runOnReady`)
    pub fn parse(key: &str) -> Option<Self> {
        let mut chars = key.chars();
        let first = chars.next()?;
        let normalized: String = first.to_lowercase().chain(chars).collect();
        Self::ALL.iter().copied().find(|field| field.key() == normalized)
    }
}

/// MediaMTX path configuration.
///
/// Only the fields in [`PathField`] are typed. Everything else (recording tuning,
/// rpiCamera*, srt*, ...) is kept in `extra` and written back exactly as loaded.
/// Decoding goes through [`ManagedPathConfig::from_map`], so known keys spelled
/// in PascalCase land in their typed field.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ManagedPathConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_on_demand: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fallback: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_readers: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub record_path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_init: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_demand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_ready: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_ready_restart: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_not_ready: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_read: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_on_unread: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl<'de> Deserialize<'de> for ManagedPathConfig {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let map = Map::<String, Value>::deserialize(deserializer)?;
        Self::from_map(map).map_err(serde::de::Error::custom)
    }
}

fn expect_string(field: PathField, value: Value) -> Result<Option<String>, PathConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        _ => Err(PathConfigError::InvalidValue {
            field: field.key(),
            expected: "a string",
        }),
    }
}

fn expect_bool(field: PathField, value: Value) -> Result<Option<bool>, PathConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::Bool(b) => Ok(Some(b)),
        _ => Err(PathConfigError::InvalidValue {
            field: field.key(),
            expected: "a boolean",
        }),
    }
}

fn expect_int(field: PathField, value: Value) -> Result<Option<i64>, PathConfigError> {
    match value {
        Value::Null => Ok(None),
        Value::Number(n) => n.as_i64().map(Some).ok_or(PathConfigError::InvalidValue {
            field: field.key(),
            expected: "an integer",
        }),
        _ => Err(PathConfigError::InvalidValue {
            field: field.key(),
            expected: "an integer",
        }),
    }
}

impl ManagedPathConfig {
    /// Build a configuration from a decoded JSON object. Known keys are
    /// type-checked in either case; the rest is kept verbatim.
    pub fn from_map(map: Map<String, Value>) -> Result<Self, PathConfigError> {
        let mut config = Self::default();
        for (key, value) in map {
            if PathField::parse(&key).is_some() {
                config.set(&key, value)?;
            } else {
                config.extra.insert(key, value);
            }
        }
        Ok(config)
    }

    /// Build a configuration from any JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Result<Self, PathConfigError> {
        match value {
            Value::Object(map) => Self::from_map(map),
            _ => Err(PathConfigError::NotAnObject),
        }
    }

    /// Flatten back to the JSON object MediaMTX expects
    pub fn to_map(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Set one key. Known fields are type-checked; `null` clears them.
    /// Unknown keys are stored for pass-through.
    pub fn set(&mut self, key: &str, value: Value) -> Result<(), PathConfigError> {
        let Some(field) = PathField::parse(key) else {
            log::debug!("Passing through unmodelled path field '{key}'");
            self.extra.insert(key.to_string(), value);
            return Ok(());
        };

        match field {
            PathField::Name => self.name = expect_string(field, value)?,
            PathField::Source => self.source = expect_string(field, value)?,
            PathField::SourceOnDemand => self.source_on_demand = expect_bool(field, value)?,
            PathField::Fallback => self.fallback = expect_string(field, value)?,
            PathField::MaxReaders => self.max_readers = expect_int(field, value)?,
            PathField::Record => self.record = expect_bool(field, value)?,
            PathField::RecordPath => self.record_path = expect_string(field, value)?,
            PathField::RunOnInit => self.run_on_init = expect_string(field, value)?,
            PathField::RunOnDemand => self.run_on_demand = expect_string(field, value)?,
            PathField::RunOnReady => self.run_on_ready = expect_string(field, value)?,
            PathField::RunOnReadyRestart => self.run_on_ready_restart = expect_bool(field, value)?,
            PathField::RunOnNotReady => self.run_on_not_ready = expect_string(field, value)?,
            PathField::RunOnRead => self.run_on_read = expect_string(field, value)?,
            PathField::RunOnUnread => self.run_on_unread = expect_string(field, value)?,
        }
        Ok(())
    }

    /// Apply several keys at once. Either every key is applied or none is.
    pub fn apply(&mut self, updates: &Map<String, Value>) -> Result<(), PathConfigError> {
        let mut staged = self.clone();
        for (key, value) in updates {
            staged.set(key, value.clone())?;
        }
        *self = staged;
        Ok(())
    }

    /// Copy with every occurrence of each secret masked in string values
    pub fn redacted(&self, secrets: &[&str]) -> Map<String, Value> {
        fn mask(value: &mut Value, secret: &str) {
            match value {
                Value::String(s) if s.contains(secret) => *s = s.replace(secret, "********"),
                Value::Array(items) => items.iter_mut().for_each(|item| mask(item, secret)),
                Value::Object(map) => map.values_mut().for_each(|item| mask(item, secret)),
                _ => {}
            }
        }

        let mut value = Value::Object(self.to_map());
        for secret in secrets.iter().filter(|secret| !secret.is_empty()) {
            mask(&mut value, secret);
        }
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_map() -> Map<String, Value> {
        match json!({
            "name": "cam/stream",
            "source": "publisher",
            "record": true,
            "maxReaders": 4,
            "rpiCameraWidth": 1280,
            "rpiCameraAWBGains": [1, 2],
            "srtReadPassphrase": "",
            "runOnReadyRestart": false
        }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_round_trip_preserves_unknown_keys() {
        let config = ManagedPathConfig::from_map(sample_map()).unwrap();
        assert_eq!(config.extra.get("rpiCameraWidth"), Some(&json!(1280)));

        let reloaded = ManagedPathConfig::from_map(config.to_map()).unwrap();
        assert_eq!(reloaded, config);
        assert_eq!(config.to_map(), sample_map());
    }

    #[test]
    fn test_set_accepts_pascal_case_keys() {
        let mut config = ManagedPathConfig::default();
        config.set("RunOnReady", json!("ffmpeg ...")).unwrap();
        config.set("runOnNotReady", json!("curl ...")).unwrap();
        assert_eq!(config.run_on_ready.as_deref(), Some("ffmpeg ..."));
        assert_eq!(config.to_map().get("runOnNotReady"), Some(&json!("curl ...")));
        assert!(!config.extra.contains_key("RunOnReady"));
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut config = ManagedPathConfig::default();
        let err = config.set("record", json!("yes")).unwrap_err();
        assert_eq!(
            err,
            PathConfigError::InvalidValue {
                field: "record",
                expected: "a boolean"
            }
        );
        assert_eq!(config.record, None);
    }

    #[test]
    fn test_set_null_clears_field() {
        let mut config = ManagedPathConfig::from_map(sample_map()).unwrap();
        config.set("source", Value::Null).unwrap();
        assert!(config.source.is_none());
        assert!(!config.to_map().contains_key("source"));
    }

    #[test]
    fn test_apply_is_all_or_nothing() {
        let mut config = ManagedPathConfig::default();
        let mut updates = Map::new();
        updates.insert("source".into(), json!("rtsp://127.0.0.1:8554/a/stream"));
        updates.insert("maxReaders".into(), json!("many"));

        assert!(config.apply(&updates).is_err());
        assert_eq!(config, ManagedPathConfig::default());

        updates.insert("maxReaders".into(), json!(10));
        config.apply(&updates).unwrap();
        assert_eq!(config.max_readers, Some(10));
    }

    #[test]
    fn test_redacted_masks_secret() {
        let mut config = ManagedPathConfig::default();
        config.set("runOnReady", json!("ffmpeg -metadata otp=\"s3cretOTP\"")).unwrap();
        config
            .set("runOnNotReady", json!("curl -H \"Authorization: Bearer sig-token\""))
            .unwrap();
        let redacted = config.redacted(&["s3cretOTP", "", "sig-token"]);
        let hook = redacted["runOnReady"].as_str().unwrap();
        assert!(!hook.contains("s3cretOTP"));
        assert!(hook.contains("********"));
        assert!(!redacted["runOnNotReady"].as_str().unwrap().contains("sig-token"));
    }

    #[test]
    fn test_pascal_case_keys_load_into_typed_fields() {
        let map = match json!({ "RunOnReady": "x", "Source": "rtsp://a", "rpiCameraWidth": 640 }) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        let mut config = ManagedPathConfig::from_map(map).unwrap();
        assert_eq!(config.run_on_ready.as_deref(), Some("x"));
        assert_eq!(config.source.as_deref(), Some("rtsp://a"));
        assert_eq!(config.extra.keys().collect::<Vec<_>>(), vec!["rpiCameraWidth"]);

        config.set("RunOnReady", json!("y")).unwrap();
        let keys: Vec<String> = config.to_map().keys().cloned().collect();
        assert_eq!(keys, vec!["rpiCameraWidth", "runOnReady", "source"]);
    }

    #[test]
    fn test_deserialize_checks_known_field_types() {
        let config: ManagedPathConfig =
            serde_json::from_value(json!({ "Record": true, "maxReaders": 3 })).unwrap();
        assert_eq!(config.record, Some(true));
        assert_eq!(config.max_readers, Some(3));

        let err = serde_json::from_value::<ManagedPathConfig>(json!({ "record": "on" }));
        assert!(err.is_err());
    }

    #[test]
    fn test_from_value_rejects_non_objects() {
        assert_eq!(
            ManagedPathConfig::from_value(json!([1, 2])).unwrap_err(),
            PathConfigError::NotAnObject
        );
    }
}
