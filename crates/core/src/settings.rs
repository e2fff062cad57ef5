//! Declared, remotely mutable monitor settings.
//!
//! Every monitor publishes an ordered schema of named settings. A single
//! generic routine coerces raw command text (or config JSON) into the declared
//! type, validates it and swaps the value in place, so any declared setting is
//! mutable at runtime and undeclared keys are rejected.

use crate::{MonitorError, MonitorResult};
use serde_json::Value;
use std::fmt;

/// Typed value of a single setting.
#[derive(Debug, Clone, PartialEq)]
pub enum SettingValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<String>),
}

impl SettingValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            SettingValue::Bool(_) => "bool",
            SettingValue::Int(_) => "integer",
            SettingValue::Float(_) => "number",
            SettingValue::Text(_) => "text",
            SettingValue::List(_) => "list",
        }
    }

    /// Parse `raw` into a value of the same variant as `self`.
    pub fn coerce(&self, key: &str, raw: &str) -> MonitorResult<SettingValue> {
        let raw = raw.trim();
        let mismatch = || MonitorError::TypeCoercion {
            key: key.to_string(),
            value: raw.to_string(),
            expected: self.type_name(),
        };

        match self {
            SettingValue::Bool(_) => parse_bool(raw).map(SettingValue::Bool).ok_or_else(mismatch),
            SettingValue::Int(_) => raw.parse::<i64>().map(SettingValue::Int).map_err(|_| mismatch()),
            SettingValue::Float(_) => raw
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .map(SettingValue::Float)
                .ok_or_else(mismatch),
            SettingValue::Text(_) => Ok(SettingValue::Text(raw.to_string())),
            SettingValue::List(_) => Ok(SettingValue::List(parse_list(raw))),
        }
    }

    /// Convert a JSON config value into the same variant as `self`.
    pub fn coerce_json(&self, key: &str, value: &Value) -> MonitorResult<SettingValue> {
        let converted = match (self, value) {
            (_, Value::String(s)) => return self.coerce(key, s),
            (SettingValue::Bool(_), Value::Bool(b)) => Some(SettingValue::Bool(*b)),
            (SettingValue::Int(_), Value::Number(n)) => n.as_i64().map(SettingValue::Int),
            (SettingValue::Float(_), Value::Number(n)) => n.as_f64().map(SettingValue::Float),
            (SettingValue::Text(_), Value::Number(n)) => Some(SettingValue::Text(n.to_string())),
            (SettingValue::Text(_), Value::Null) => Some(SettingValue::Text(String::new())),
            (SettingValue::List(_), Value::Null) => Some(SettingValue::List(Vec::new())),
            (SettingValue::List(_), Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Some(s.trim().to_string()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .collect::<Option<Vec<_>>>()
                .map(SettingValue::List),
            _ => None,
        };

        converted.ok_or_else(|| MonitorError::TypeCoercion {
            key: key.to_string(),
            value: value.to_string(),
            expected: self.type_name(),
        })
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettingValue::Bool(v) => write!(f, "{}", v),
            SettingValue::Int(v) => write!(f, "{}", v),
            SettingValue::Float(v) => write!(f, "{}", v),
            SettingValue::Text(v) if v.is_empty() => f.write_str("(empty)"),
            SettingValue::Text(v) => f.write_str(v),
            SettingValue::List(v) if v.is_empty() => f.write_str("(none)"),
            SettingValue::List(v) => f.write_str(&v.join(", ")),
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_list(raw: &str) -> Vec<String> {
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("clear") {
        return Vec::new();
    }
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Extra constraint checked after a successful type coercion.
pub type Validator = fn(&SettingValue) -> Result<(), String>;

/// Accepts strictly positive numbers.
pub fn positive(value: &SettingValue) -> Result<(), String> {
    match value {
        SettingValue::Int(v) if *v > 0 => Ok(()),
        SettingValue::Float(v) if *v > 0.0 => Ok(()),
        _ => Err("must be greater than zero".to_string()),
    }
}

/// Accepts zero and positive numbers.
pub fn non_negative(value: &SettingValue) -> Result<(), String> {
    match value {
        SettingValue::Int(v) if *v >= 0 => Ok(()),
        SettingValue::Float(v) if *v >= 0.0 => Ok(()),
        _ => Err("must not be negative".to_string()),
    }
}

#[derive(Debug, Clone)]
struct Setting {
    name: String,
    value: SettingValue,
    validator: Option<Validator>,
    secret: bool,
}

/// Ordered settings schema of one monitor.
#[derive(Debug, Clone)]
pub struct Settings {
    monitor: String,
    entries: Vec<Setting>,
}

impl Settings {
    /// Create a schema pre-populated with the settings every monitor has.
    pub fn new(monitor: impl Into<String>, enabled: bool, interval_secs: u64) -> Self {
        Self {
            monitor: monitor.into(),
            entries: Vec::new(),
        }
        .declare("enabled", SettingValue::Bool(enabled))
        .declare("interval", SettingValue::Int(interval_secs as i64))
        .validate_with(positive)
    }

    /// Declare a new setting with its default value.
    pub fn declare(mut self, name: &str, value: SettingValue) -> Self {
        self.entries.retain(|s| s.name != name);
        self.entries.push(Setting {
            name: name.to_string(),
            value,
            validator: None,
            secret: false,
        });
        self
    }

    pub fn bool(self, name: &str, value: bool) -> Self {
        self.declare(name, SettingValue::Bool(value))
    }

    pub fn int(self, name: &str, value: i64) -> Self {
        self.declare(name, SettingValue::Int(value))
    }

    pub fn float(self, name: &str, value: f64) -> Self {
        self.declare(name, SettingValue::Float(value))
    }

    pub fn text(self, name: &str, value: &str) -> Self {
        self.declare(name, SettingValue::Text(value.to_string()))
    }

    pub fn list(self, name: &str, value: Vec<String>) -> Self {
        self.declare(name, SettingValue::List(value))
    }

    /// Attach a validator to the most recently declared setting.
    pub fn validate_with(mut self, validator: Validator) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.validator = Some(validator);
        }
        self
    }

    /// Mask the most recently declared setting in rendered output.
    pub fn secret(mut self) -> Self {
        if let Some(last) = self.entries.last_mut() {
            last.secret = true;
        }
        self
    }

    pub fn monitor(&self) -> &str {
        &self.monitor
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|s| s.name.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|s| s.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&SettingValue> {
        self.entries.iter().find(|s| s.name == name).map(|s| &s.value)
    }

    pub fn get_bool(&self, name: &str) -> bool {
        matches!(self.get(name), Some(SettingValue::Bool(true)))
    }

    pub fn get_int(&self, name: &str) -> i64 {
        match self.get(name) {
            Some(SettingValue::Int(v)) => *v,
            _ => 0,
        }
    }

    pub fn get_u64(&self, name: &str) -> u64 {
        self.get_int(name).max(0) as u64
    }

    pub fn get_float(&self, name: &str) -> f64 {
        match self.get(name) {
            Some(SettingValue::Float(v)) => *v,
            Some(SettingValue::Int(v)) => *v as f64,
            _ => 0.0,
        }
    }

    pub fn get_text(&self, name: &str) -> &str {
        match self.get(name) {
            Some(SettingValue::Text(v)) => v.as_str(),
            _ => "",
        }
    }

    pub fn get_list(&self, name: &str) -> &[String] {
        match self.get(name) {
            Some(SettingValue::List(v)) => v.as_slice(),
            _ => &[],
        }
    }

    pub fn enabled(&self) -> bool {
        self.get_bool("enabled")
    }

    pub fn interval_secs(&self) -> u64 {
        self.get_u64("interval").max(1)
    }

    /// Coerce `raw` to the declared type of `key` and store it.
    ///
    /// On any error the stored value is left untouched.
    pub fn set_raw(&mut self, key: &str, raw: &str) -> MonitorResult<SettingValue> {
        let monitor = self.monitor.clone();
        let entry = self
            .entries
            .iter_mut()
            .find(|s| s.name == key)
            .ok_or_else(|| MonitorError::InvalidKey {
                monitor,
                key: key.to_string(),
            })?;

        let value = entry.value.coerce(key, raw)?;
        Self::check(entry, &value)?;
        entry.value = value.clone();
        Ok(value)
    }

    /// Apply config-file parameters; returns the keys that were not declared.
    pub fn apply_json(
        &mut self,
        params: &serde_json::Map<String, Value>,
    ) -> MonitorResult<Vec<String>> {
        let mut unknown = Vec::new();
        for (key, raw) in params {
            match self.entries.iter_mut().find(|s| &s.name == key) {
                Some(entry) => {
                    let value = entry.value.coerce_json(key, raw)?;
                    Self::check(entry, &value)?;
                    entry.value = value;
                }
                None => unknown.push(key.clone()),
            }
        }
        Ok(unknown)
    }

    fn check(entry: &Setting, value: &SettingValue) -> MonitorResult<()> {
        if let Some(validator) = entry.validator {
            validator(value).map_err(|reason| MonitorError::InvalidValue {
                key: entry.name.clone(),
                reason,
            })?;
        }
        Ok(())
    }

    /// Render `name = value` pairs with secrets masked.
    pub fn render(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|s| {
                let shown = if s.secret {
                    mask(&s.value)
                } else {
                    s.value.to_string()
                };
                (s.name.clone(), shown)
            })
            .collect()
    }

    /// Rendered value of one setting, secrets masked.
    pub fn render_one(&self, name: &str) -> Option<String> {
        self.entries.iter().find(|s| s.name == name).map(|s| {
            if s.secret {
                mask(&s.value)
            } else {
                s.value.to_string()
            }
        })
    }
}

fn mask(value: &SettingValue) -> String {
    match value {
        SettingValue::Text(v) if v.is_empty() => "(not set)".to_string(),
        _ => "******".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn schema() -> Settings {
        Settings::new("funding_rate", true, 60)
            .float("threshold", 0.001)
            .validate_with(positive)
            .int("top_n", 20)
            .text("quote_asset", "USDT")
            .text("api_key", "")
            .secret()
            .list("symbols", vec![])
    }

    #[test]
    fn test_common_settings_declared() {
        let settings = schema();
        assert!(settings.enabled());
        assert_eq!(settings.interval_secs(), 60);
    }

    #[test]
    fn test_set_raw_each_type() {
        let mut settings = schema();
        assert_eq!(settings.set_raw("threshold", "0.02").unwrap(), SettingValue::Float(0.02));
        assert_eq!(settings.set_raw("top_n", "5").unwrap(), SettingValue::Int(5));
        assert_eq!(settings.set_raw("enabled", "off").unwrap(), SettingValue::Bool(false));
        assert_eq!(
            settings.set_raw("symbols", "BTCUSDT, ETHUSDT").unwrap(),
            SettingValue::List(vec!["BTCUSDT".into(), "ETHUSDT".into()])
        );
        assert_eq!(settings.get_float("threshold"), 0.02);
        assert_eq!(settings.get_int("top_n"), 5);
        assert!(!settings.enabled());
    }

    #[test]
    fn test_unknown_key_rejected_and_state_unchanged() {
        let mut settings = schema();
        let before = settings.render();
        let err = settings.set_raw("does_not_exist", "1").unwrap_err();
        assert!(matches!(err, MonitorError::InvalidKey { .. }));
        assert_eq!(settings.render(), before);
    }

    #[test]
    fn test_type_coercion_failure_keeps_value() {
        let mut settings = schema();
        let err = settings.set_raw("top_n", "twenty").unwrap_err();
        assert!(matches!(err, MonitorError::TypeCoercion { expected: "integer", .. }));
        assert_eq!(settings.get_int("top_n"), 20);

        let err = settings.set_raw("enabled", "maybe").unwrap_err();
        assert!(matches!(err, MonitorError::TypeCoercion { .. }));
        assert!(settings.enabled());
    }

    #[test]
    fn test_validator_rejects_value() {
        let mut settings = schema();
        let err = settings.set_raw("interval", "0").unwrap_err();
        assert!(matches!(err, MonitorError::InvalidValue { .. }));
        assert_eq!(settings.interval_secs(), 60);

        assert!(settings.set_raw("threshold", "-1").is_err());
        assert_eq!(settings.get_float("threshold"), 0.001);
    }

    #[test]
    fn test_nan_is_not_a_number() {
        let mut settings = schema();
        assert!(settings.set_raw("threshold", "NaN").is_err());
    }

    #[test]
    fn test_apply_json_reports_unknown_keys() {
        let mut settings = schema();
        let params = serde_json::json!({
            "threshold": 0.005,
            "top_n": "10",
            "symbols": ["BTCUSDT"],
            "colour": "blue"
        });
        let unknown = settings.apply_json(params.as_object().unwrap()).unwrap();
        assert_eq!(unknown, vec!["colour".to_string()]);
        assert_eq!(settings.get_float("threshold"), 0.005);
        assert_eq!(settings.get_int("top_n"), 10);
        assert_eq!(settings.get_list("symbols"), &["BTCUSDT".to_string()]);
    }

    #[test]
    fn test_apply_json_type_error() {
        let mut settings = schema();
        let params = serde_json::json!({ "enabled": [1, 2] });
        assert!(settings.apply_json(params.as_object().unwrap()).is_err());
    }

    #[test]
    fn test_secret_masked_in_render() {
        let mut settings = schema();
        assert_eq!(settings.render_one("api_key").unwrap(), "(not set)");
        settings.set_raw("api_key", "abc").unwrap();
        assert_eq!(settings.render_one("api_key").unwrap(), "******");
        assert_eq!(settings.get_text("api_key"), "abc");
    }

    #[test]
    fn test_clear_list() {
        let mut settings = schema();
        settings.set_raw("symbols", "A,B").unwrap();
        settings.set_raw("symbols", "clear").unwrap();
        assert!(settings.get_list("symbols").is_empty());
    }
}
