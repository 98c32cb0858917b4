//! Per-service run modes.
//!
//! A [`Mode`] overrides how a service runs. Overrides are kept as a
//! [`ServiceModes`] map persisted under the `service-modes` config key, where
//! [`Mode::Default`] is implicit: it is never stored.
//!
//! The compact textual form is `["name"=mode,"other"=mode]`, with quoted
//! service names and bare mode tokens. `""` and `"[]"` both mean no
//! overrides.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_yaml::Value;

use crate::config::ConfigKey;
use crate::error::ModeError;

/// How a service should run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Default,
    Local,
    Debug,
}

impl Mode {
    /// Every mode, in declaration order.
    pub const ALL: [Mode; 3] = [Mode::Default, Mode::Local, Mode::Debug];

    /// The token used in config files and the compact form.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Local => "local",
            Self::Debug => "debug",
        }
    }
}

/// Names of every valid mode, for completion and help text.
pub fn valid_mode_names() -> Vec<&'static str> {
    Mode::ALL.iter().map(|m| m.as_str()).collect()
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = ModeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ModeError(format!("invalid mode value {s:?}")))
    }
}

/// Service name to mode overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServiceModes(BTreeMap<String, Mode>);

impl ServiceModes {
    pub fn new() -> Self {
        Self::default()
    }

    /// The override for `service`, if any.
    pub fn get(&self, service: &str) -> Option<Mode> {
        self.0.get(service).copied()
    }

    /// Set the mode for `service`. Setting [`Mode::Default`] removes the
    /// entry. Returns whether anything changed.
    pub fn set(&mut self, service: impl Into<String>, mode: Mode) -> bool {
        let service = service.into();
        if mode == Mode::Default {
            self.0.remove(&service).is_some()
        } else {
            self.0.insert(service, mode) != Some(mode)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, Mode)> {
        self.0.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Fill in entries from `base` that this map does not override.
    pub(crate) fn inherit(&mut self, base: &ServiceModes) {
        for (name, mode) in base.iter() {
            self.0.entry(name.to_string()).or_insert(mode);
        }
    }
}

impl FromIterator<(String, Mode)> for ServiceModes {
    fn from_iter<I: IntoIterator<Item = (String, Mode)>>(iter: I) -> Self {
        let mut modes = ServiceModes::new();
        for (name, mode) in iter {
            modes.set(name, mode);
        }
        modes
    }
}

impl FromStr for ServiceModes {
    type Err = ModeError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let mut modes = BTreeMap::new();
        if value.is_empty() {
            return Ok(Self(modes));
        }
        let Some(mut rest) = value.strip_prefix('[') else {
            return Err(err(format!("value must start with [, not {:?}", first(value))));
        };
        let mut closed = false;
        while !rest.is_empty() {
            if let Some(after) = rest.strip_prefix(']') {
                rest = after;
                closed = true;
                break;
            }
            if !rest.starts_with('"') {
                return Err(err(format!(
                    "keys must be quoted, not start with {:?}",
                    first(rest)
                )));
            }
            let (key, after) = unquote_prefix(rest)?;
            let Some(after) = after.strip_prefix('=') else {
                return Err(err(format!(
                    "key must be followed by =, not {:?}",
                    first(after)
                )));
            };
            let Some(end) = after.find(|c| c == ',' || c == ']') else {
                return Err(err(format!("missing delimiter after \"=\" in {after:?}")));
            };
            let mode: Mode = after[..end].parse()?;
            if after[end..].starts_with(',') && end + 2 >= after.len() {
                return Err(err(format!(
                    "must have another entry after \",\" in {:?}",
                    &after[end + 1..]
                )));
            }
            rest = &after[end + 1..];
            if mode == Mode::Default {
                modes.remove(&key);
            } else {
                modes.insert(key, mode);
            }
            if after[end..].starts_with(']') {
                closed = true;
                break;
            }
        }
        if !closed || !rest.is_empty() {
            return Err(err(format!("value must end with ], not {rest:?}")));
        }
        Ok(Self(modes))
    }
}

impl fmt::Display for ServiceModes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        let mut wrote = false;
        for (name, mode) in self.iter().filter(|(_, m)| *m != Mode::Default) {
            if wrote {
                f.write_str(",")?;
            }
            write!(f, "{}={mode}", quote(name))?;
            wrote = true;
        }
        f.write_str("]")
    }
}

fn err(msg: String) -> ModeError {
    ModeError(msg)
}

fn first(s: &str) -> &str {
    s.char_indices()
        .nth(1)
        .map_or(s, |(i, _)| &s[..i])
}

/// Split a leading double-quoted string off `s`, returning the unescaped
/// contents and the remainder.
fn unquote_prefix(s: &str) -> Result<(String, &str), ModeError> {
    let mut out = String::new();
    let mut chars = s.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &s[i + 1..])),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, '"')) => '"',
                    Some((_, '\\')) => '\\',
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    _ => return Err(err(format!("invalid key quoting: {s:?}"))),
                };
                out.push(escaped);
            }
            c => out.push(c),
        }
    }
    Err(err(format!("keys must be quoted: {s:?}")))
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

/// Name of the config key holding the configured [`ServiceModes`].
pub const SERVICE_MODES_KEY: &str = "service-modes";

/// Config key for the persisted service modes.
///
/// Saved as a YAML mapping; loading also accepts the compact string form.
#[derive(Debug, Default)]
pub struct ServiceModesKey;

impl ConfigKey for ServiceModesKey {
    type Value = ServiceModes;

    fn name(&self) -> &str {
        SERVICE_MODES_KEY
    }

    fn new_value(&self) -> ServiceModes {
        ServiceModes::new()
    }

    fn new_from(&self, raw: &Value) -> Result<ServiceModes, serde_yaml::Error> {
        match raw {
            Value::Null => Ok(ServiceModes::new()),
            Value::String(s) => s
                .parse()
                .map_err(<serde_yaml::Error as serde::de::Error>::custom),
            other => {
                let modes: BTreeMap<String, Mode> = serde_yaml::from_value(other.clone())?;
                Ok(modes.into_iter().collect())
            }
        }
    }

    fn to_raw(&self, value: &ServiceModes) -> Result<Value, serde_yaml::Error> {
        serde_yaml::to_value(value)
    }

    fn is_default(&self, value: &ServiceModes) -> bool {
        value.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn modes(entries: &[(&str, Mode)]) -> ServiceModes {
        entries
            .iter()
            .map(|(k, m)| (k.to_string(), *m))
            .collect()
    }

    #[rstest]
    #[case::empty("", &[])]
    #[case::no_entries("[]", &[])]
    #[case::single(r#"["foo"=debug]"#, &[("foo", Mode::Debug)])]
    #[case::multiple(r#"["foo"=debug,"bar"=local]"#, &[("foo", Mode::Debug), ("bar", Mode::Local)])]
    #[case::escaped(r#"["a\"b"=local]"#, &[("a\"b", Mode::Local)])]
    #[case::explicit_default(r#"["foo"=default]"#, &[])]
    fn test_parse_service_modes(#[case] input: &str, #[case] want: &[(&str, Mode)]) {
        let parsed: ServiceModes = input.parse().unwrap();
        assert_eq!(parsed, modes(want));
    }

    #[rstest]
    #[case::bad_empty(" ", "must start with [")]
    #[case::missing_open(r#""foo"=debug]"#, "must start with [")]
    #[case::trailing_comma(r#"["foo"=debug,]"#, "must have another entry")]
    #[case::bad_mode(r#"["foo"=bar]"#, "invalid mode value")]
    #[case::bad_quoting(r#"["foo\"=bar]"#, "keys must be quoted")]
    #[case::unquoted_key("[foo=debug]", "keys must be quoted")]
    #[case::missing_equals(r#"["foo"debug]"#, "key must be followed by =")]
    #[case::unterminated(r#"["foo"=debug"#, "missing delimiter")]
    #[case::missing_close("[", "must end with ]")]
    #[case::trailing_garbage(r#"["foo"=debug]x"#, "must end with ]")]
    fn test_parse_service_modes_errors(#[case] input: &str, #[case] want: &str) {
        let err = input.parse::<ServiceModes>().unwrap_err();
        assert!(err.to_string().contains(want), "{input:?}: {err}");
    }

    #[test]
    fn test_display_round_trips() {
        let m = modes(&[("web", Mode::Local), ("api \"v2\"", Mode::Debug)]);
        let text = m.to_string();
        assert_eq!(text, r#"["api \"v2\""=debug,"web"=local]"#);
        assert_eq!(text.parse::<ServiceModes>().unwrap(), m);
        assert_eq!(ServiceModes::new().to_string(), "[]");
    }

    #[test]
    fn test_set_default_removes_entry() {
        let mut m = ServiceModes::new();
        assert!(m.set("api", Mode::Debug));
        assert!(!m.set("api", Mode::Debug));
        assert_eq!(m.get("api"), Some(Mode::Debug));

        assert!(m.set("api", Mode::Default));
        assert_eq!(m.get("api"), None);
        assert!(!m.set("api", Mode::Default));
        assert!(m.is_empty());
    }

    #[test]
    fn test_mode_tokens() {
        assert_eq!("local".parse::<Mode>().unwrap(), Mode::Local);
        assert!("Local".parse::<Mode>().is_err());
        assert_eq!(valid_mode_names(), vec!["default", "local", "debug"]);
        assert_eq!(serde_yaml::to_string(&Mode::Debug).unwrap(), "debug\n");
    }

    #[test]
    fn test_key_accepts_mapping_and_compact_string() {
        let key = ServiceModesKey;
        let mapping: Value = serde_yaml::from_str("api: debug\nweb: local\n").unwrap();
        let compact = Value::String(r#"["api"=debug,"web"=local]"#.to_string());
        let want = modes(&[("api", Mode::Debug), ("web", Mode::Local)]);

        assert_eq!(key.new_from(&mapping).unwrap(), want);
        assert_eq!(key.new_from(&compact).unwrap(), want);
        assert!(key
            .new_from(&serde_yaml::from_str("api: fast\n").unwrap())
            .is_err());
        assert_eq!(key.to_raw(&want).unwrap(), mapping);
    }
}
