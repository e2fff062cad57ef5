//! `/config` argument parsing.

use monitor_core::{MonitorError, MonitorResult};

pub const CONFIG_USAGE: &str = "Usage: /config &lt;name&gt; [get | set &lt;key&gt; &lt;value&gt; | add &lt;item&gt; | remove &lt;item&gt;]";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigAction {
    Get,
    Set { key: String, value: String },
    Add(String),
    Remove(String),
}

/// Split `/config` arguments into the monitor name and the action.
///
/// A bare name means `get`. The value of `set` is the rest of the line, so it
/// may contain spaces.
pub fn parse_config_command(args: &str) -> MonitorResult<(String, ConfigAction)> {
    let mut words = args.split_whitespace();
    let name = words
        .next()
        .ok_or_else(|| MonitorError::InvalidCommand("missing monitor name".into()))?
        .to_string();

    let action = match words.next().map(str::to_ascii_lowercase).as_deref() {
        None | Some("get") => ConfigAction::Get,
        Some("set") => {
            let key = words
                .next()
                .ok_or_else(|| MonitorError::InvalidCommand("set needs a key and a value".into()))?
                .to_string();
            let value = words.collect::<Vec<_>>().join(" ");
            if value.is_empty() {
                return Err(MonitorError::InvalidCommand(format!("missing value for `{}`", key)));
            }
            ConfigAction::Set { key, value }
        }
        Some(verb @ ("add" | "remove")) => {
            let item = words.next().ok_or_else(|| {
                MonitorError::InvalidCommand(format!("{} needs an item", verb))
            })?;
            if words.next().is_some() {
                return Err(MonitorError::InvalidCommand(format!("{} takes a single item", verb)));
            }
            if verb == "add" {
                ConfigAction::Add(item.to_string())
            } else {
                ConfigAction::Remove(item.to_string())
            }
        }
        Some(other) => {
            return Err(MonitorError::InvalidCommand(format!("unknown action `{}`", other)))
        }
    };
    Ok((name, action))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(args: &str) -> (String, ConfigAction) {
        parse_config_command(args).unwrap()
    }

    #[test]
    fn test_bare_name_is_get() {
        assert_eq!(parse("funding"), ("funding".to_string(), ConfigAction::Get));
        assert_eq!(parse(" funding  GET "), ("funding".to_string(), ConfigAction::Get));
    }

    #[test]
    fn test_set_keeps_spaces_in_value() {
        assert_eq!(
            parse("social set bearer_token abc def"),
            (
                "social".to_string(),
                ConfigAction::Set {
                    key: "bearer_token".into(),
                    value: "abc def".into()
                }
            )
        );
    }

    #[test]
    fn test_watchlist_actions() {
        assert_eq!(parse("oi add SOLUSDT").1, ConfigAction::Add("SOLUSDT".into()));
        assert_eq!(parse("oi Remove SOLUSDT").1, ConfigAction::Remove("SOLUSDT".into()));
    }

    #[test]
    fn test_malformed_commands() {
        for args in ["", "   ", "oi set", "oi set threshold", "oi add", "oi add A B", "oi toggle"] {
            assert!(
                matches!(parse_config_command(args), Err(MonitorError::InvalidCommand(_))),
                "{:?} should be rejected",
                args
            );
        }
    }
}
