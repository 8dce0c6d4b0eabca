//! Keyboard trigger.
//!
//! Many trigger interfaces emulate a USB keyboard and "type" a key (usually
//! `5`) at every volume. Detection reads those presses from the shared key
//! buffer.

use crate::config::TriggerConfig;
use crate::device::{PollContext, TriggerDevice};
use crate::error::{Result, TriggerError};
use serde::{Deserialize, Deserializer};

#[derive(Debug, Clone, Deserialize)]
pub struct KeyboardConfig {
    /// Keys acting as a trigger; a single key or a list
    #[serde(
        default = "default_key_list",
        alias = "keyList",
        deserialize_with = "deserialize_key_list"
    )]
    pub key_list: Vec<String>,
}

fn default_key_list() -> Vec<String> {
    vec!["5".to_string()]
}

fn deserialize_key_list<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> std::result::Result<Vec<String>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Raw::deserialize(deserializer)? {
        Raw::One(key) => vec![key],
        Raw::Many(keys) => keys,
    })
}

impl Default for KeyboardConfig {
    fn default() -> Self {
        Self {
            key_list: default_key_list(),
        }
    }
}

/// Trigger on presses of any key in a list. Each press is one trigger.
#[derive(Debug, Clone)]
pub struct KeyboardTrigger {
    key_list: Vec<String>,
}

impl KeyboardTrigger {
    pub fn new(config: KeyboardConfig) -> Result<Self> {
        if config.key_list.is_empty() || config.key_list.iter().any(|k| k.is_empty()) {
            return Err(TriggerError::InvalidConfig(
                "keyboard key_list must name at least one key".into(),
            ));
        }
        Ok(Self {
            key_list: config.key_list,
        })
    }

    pub fn from_config(config: &TriggerConfig) -> Result<Box<dyn TriggerDevice>> {
        let device = Self::new(config.device_config()?)?;
        if device.key_list.contains(&config.esc_key) {
            tracing::warn!(
                "abort key '{}' is also a trigger key; it will only abort",
                config.esc_key
            );
        }
        Ok(Box::new(device))
    }

    pub fn key_list(&self) -> &[String] {
        &self.key_list
    }
}

impl TriggerDevice for KeyboardTrigger {
    fn port_type(&self) -> &str {
        "keyboard"
    }

    fn describe(&self) -> String {
        format!("keys={}", self.key_list.join(","))
    }

    fn open(&mut self) -> Result<()> {
        Ok(())
    }

    fn poll(&mut self, ctx: &mut PollContext<'_>) -> Result<Option<f64>> {
        let keys: Vec<&str> = self
            .key_list
            .iter()
            .map(String::as_str)
            .filter(|k| *k != ctx.esc_key)
            .collect();

        // One press per tick, so presses arriving together still count one by one.
        let press = ctx.keyboard.take_first(&keys);
        Ok(press.map(|press| ctx.clock.time_at(press.at)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::Clock;
    use crate::input::Keyboard;
    use serde_json::json;

    #[test]
    fn test_key_list_accepts_string_or_list() {
        let one: KeyboardConfig = TriggerConfig::new("keyboard")
            .with_port_config(json!({"key_list": "t"}))
            .device_config()
            .unwrap();
        assert_eq!(one.key_list, vec!["t"]);

        let many: KeyboardConfig = TriggerConfig::new("keyboard")
            .with_port_config(json!({"keyList": ["5", "t"]}))
            .device_config()
            .unwrap();
        assert_eq!(many.key_list, vec!["5", "t"]);

        let default: KeyboardConfig = TriggerConfig::new("keyboard").device_config().unwrap();
        assert_eq!(default.key_list, vec!["5"]);
    }

    #[test]
    fn test_empty_key_list_is_invalid() {
        let config = KeyboardConfig { key_list: vec![] };
        assert!(KeyboardTrigger::new(config).is_err());
    }

    #[test]
    fn test_detects_listed_keys_only() {
        let clock = Clock::new();
        let mut keyboard = Keyboard::new();
        let sender = keyboard.sender();
        let mut device = KeyboardTrigger::new(KeyboardConfig::default()).unwrap();

        sender.press("a");
        let mut ctx = PollContext {
            clock: &clock,
            keyboard: &mut keyboard,
            esc_key: "escape",
        };
        assert!(device.poll(&mut ctx).unwrap().is_none());

        sender.press("5");
        sender.press("5");
        assert!(device.poll(&mut ctx).unwrap().is_some());
        assert!(device.poll(&mut ctx).unwrap().is_some());
        assert!(device.poll(&mut ctx).unwrap().is_none());
        // The unrelated press is still buffered for other readers.
        assert_eq!(ctx.keyboard.get_keys(&["a"]).len(), 1);
    }

    #[test]
    fn test_escape_key_never_triggers() {
        let clock = Clock::new();
        let mut keyboard = Keyboard::new();
        keyboard.sender().press("q");
        let config = KeyboardConfig {
            key_list: vec!["5".into(), "q".into()],
        };
        let mut device = KeyboardTrigger::new(config).unwrap();
        let mut ctx = PollContext {
            clock: &clock,
            keyboard: &mut keyboard,
            esc_key: "q",
        };
        assert!(device.poll(&mut ctx).unwrap().is_none());
        assert!(ctx.keyboard.has_key(&["q"]));
    }
}
