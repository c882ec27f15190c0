use crate::domain::models::{AccountSnapshot, TimerConfig};
use std::collections::BTreeMap;

pub const KEY_MICRO_LEONS: &str = "microLeons";
pub const KEY_STICKER_INVENTORY: &str = "stickerInventory";
pub const KEY_TIMER_CONFIG: &str = "timerConfig";
pub const KEY_AVATAR_URL: &str = "avatarUrl";

// Keys written by earlier clients; read-only compatibility.
const LEGACY_KEY_UNLOCKED_STICKERS: &str = "unlockedStickers";
const LEGACY_KEY_TIMER_SETTINGS: &str = "timerSettings";

/// The remote per-user preference document: a flat JSON object whose values
/// this crate treats as opaque except for the keys above. The balance is a
/// stringified integer and the structured values are JSON-encoded strings,
/// matching what the account service stores.
pub type PreferenceDocument = serde_json::Map<String, serde_json::Value>;

// Missing or malformed values fall back to defaults rather than failing the
// read; the document is not under this client's control.
pub fn decode_account(prefs: &PreferenceDocument) -> AccountSnapshot {
    AccountSnapshot {
        balance: decode_balance(prefs),
        inventory: decode_inventory(prefs),
        timer_config: decode_timer_config(prefs),
        avatar_url: prefs
            .get(KEY_AVATAR_URL)
            .and_then(serde_json::Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(ToOwned::to_owned),
    }
}

pub fn encode_balance(balance: u64) -> PreferenceDocument {
    let mut partial = PreferenceDocument::new();
    partial.insert(
        KEY_MICRO_LEONS.to_string(),
        serde_json::Value::String(balance.to_string()),
    );
    partial
}

pub fn encode_inventory(inventory: &BTreeMap<String, u32>) -> PreferenceDocument {
    let encoded = serde_json::Value::Object(
        inventory
            .iter()
            .filter(|(_, count)| **count > 0)
            .map(|(name, count)| (name.clone(), serde_json::Value::from(*count)))
            .collect(),
    );
    let mut partial = PreferenceDocument::new();
    partial.insert(
        KEY_STICKER_INVENTORY.to_string(),
        serde_json::Value::String(encoded.to_string()),
    );
    partial
}

pub fn encode_timer_config(config: &TimerConfig) -> PreferenceDocument {
    let encoded = serde_json::to_string(config).unwrap_or_else(|_| "{}".to_string());
    let mut partial = PreferenceDocument::new();
    partial.insert(
        KEY_TIMER_CONFIG.to_string(),
        serde_json::Value::String(encoded),
    );
    partial
}

fn decode_balance(prefs: &PreferenceDocument) -> u64 {
    let Some(value) = prefs.get(KEY_MICRO_LEONS) else {
        return 0;
    };
    if let Some(raw) = value.as_str() {
        return raw.trim().parse::<u64>().unwrap_or(0);
    }
    value.as_u64().unwrap_or(0)
}

fn decode_inventory(prefs: &PreferenceDocument) -> BTreeMap<String, u32> {
    if let Some(value) = prefs.get(KEY_STICKER_INVENTORY) {
        if let Some(object) = as_json_object(value) {
            return object
                .iter()
                .filter_map(|(name, count)| {
                    let count = count.as_u64()?;
                    if count == 0 {
                        return None;
                    }
                    Some((name.clone(), count.min(u32::MAX as u64) as u32))
                })
                .collect();
        }
    }

    // Earlier clients stored a deduplicated name list; each entry becomes a
    // single owned copy.
    if let Some(value) = prefs.get(LEGACY_KEY_UNLOCKED_STICKERS) {
        if let Some(names) = as_json_array(value) {
            return names
                .iter()
                .filter_map(|name| name.as_str())
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(|name| (name.to_string(), 1))
                .collect();
        }
    }

    BTreeMap::new()
}

fn decode_timer_config(prefs: &PreferenceDocument) -> TimerConfig {
    let value = prefs
        .get(KEY_TIMER_CONFIG)
        .or_else(|| prefs.get(LEGACY_KEY_TIMER_SETTINGS));
    let Some(value) = value else {
        return TimerConfig::default();
    };

    let parsed = match value {
        serde_json::Value::String(raw) => serde_json::from_str::<TimerConfig>(raw).ok(),
        other => serde_json::from_value::<TimerConfig>(other.clone()).ok(),
    };

    match parsed {
        Some(config) if config.validate().is_ok() => config,
        _ => TimerConfig::default(),
    }
}

fn as_json_object(value: &serde_json::Value) -> Option<serde_json::Map<String, serde_json::Value>> {
    match value {
        serde_json::Value::Object(object) => Some(object.clone()),
        serde_json::Value::String(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .ok()?
            .as_object()
            .cloned(),
        _ => None,
    }
}

fn as_json_array(value: &serde_json::Value) -> Option<Vec<serde_json::Value>> {
    match value {
        serde_json::Value::Array(values) => Some(values.clone()),
        serde_json::Value::String(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .ok()?
            .as_array()
            .cloned(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Phase;

    fn sample_prefs() -> PreferenceDocument {
        let mut prefs = PreferenceDocument::new();
        prefs.insert(
            KEY_MICRO_LEONS.to_string(),
            serde_json::Value::String("450".to_string()),
        );
        prefs.insert(
            KEY_STICKER_INVENTORY.to_string(),
            serde_json::Value::String(r#"{"learnw1Wink.png":2,"learnw1First.png":1}"#.to_string()),
        );
        prefs.insert(
            KEY_TIMER_CONFIG.to_string(),
            serde_json::Value::String(
                r#"{"work":50,"shortBreak":10,"longBreak":30,"longBreakInterval":2,"currentPhase":"shortBreak"}"#
                    .to_string(),
            ),
        );
        prefs.insert(
            "avatarUrl".to_string(),
            serde_json::Value::String("https://example.invalid/avatar.png".to_string()),
        );
        prefs
    }

    #[test]
    fn decode_account_reads_wire_format() {
        let account = decode_account(&sample_prefs());
        assert_eq!(account.balance, 450);
        assert_eq!(account.owned_count("learnw1Wink.png"), 2);
        assert_eq!(account.owned_count("learnw1First.png"), 1);
        assert_eq!(account.owned_count("never-drawn.png"), 0);
        assert_eq!(account.timer_config.work, 50);
        assert_eq!(account.timer_config.current_phase, Phase::ShortBreak);
        assert_eq!(
            account.avatar_url.as_deref(),
            Some("https://example.invalid/avatar.png")
        );
    }

    #[test]
    fn decode_account_defaults_on_empty_document() {
        let account = decode_account(&PreferenceDocument::new());
        assert_eq!(account.balance, 0);
        assert!(account.inventory.is_empty());
        assert_eq!(account.timer_config, TimerConfig::default());
    }

    #[test]
    fn decode_account_tolerates_malformed_values() {
        let mut prefs = PreferenceDocument::new();
        prefs.insert(
            KEY_MICRO_LEONS.to_string(),
            serde_json::Value::String("not-a-number".to_string()),
        );
        prefs.insert(
            KEY_STICKER_INVENTORY.to_string(),
            serde_json::Value::String("{broken".to_string()),
        );
        prefs.insert(
            KEY_TIMER_CONFIG.to_string(),
            serde_json::Value::String(r#"{"work":0}"#.to_string()),
        );

        let account = decode_account(&prefs);
        assert_eq!(account.balance, 0);
        assert!(account.inventory.is_empty());
        assert_eq!(account.timer_config, TimerConfig::default());
    }

    #[test]
    fn decode_inventory_accepts_legacy_unlocked_sticker_list() {
        let mut prefs = PreferenceDocument::new();
        prefs.insert(
            LEGACY_KEY_UNLOCKED_STICKERS.to_string(),
            serde_json::Value::String(r#"["learnw1Wink.png","learnw1Goget.png"]"#.to_string()),
        );

        let account = decode_account(&prefs);
        assert_eq!(account.owned_count("learnw1Wink.png"), 1);
        assert_eq!(account.owned_count("learnw1Goget.png"), 1);
    }

    #[test]
    fn decode_timer_config_accepts_legacy_settings_key() {
        let mut prefs = PreferenceDocument::new();
        prefs.insert(
            LEGACY_KEY_TIMER_SETTINGS.to_string(),
            serde_json::Value::String(
                r#"{"work":45,"shortBreak":5,"longBreak":15,"longBreakInterval":4,"currentMode":"work"}"#
                    .to_string(),
            ),
        );

        let account = decode_account(&prefs);
        assert_eq!(account.timer_config.work, 45);
    }

    #[test]
    fn encode_and_decode_roundtrip_preserves_account_fields() {
        let mut inventory = BTreeMap::new();
        inventory.insert("learnw1Spicy.png".to_string(), 3);
        inventory.insert("learnw1Nuns.png".to_string(), 1);
        let config = TimerConfig {
            work: 40,
            short_break: 8,
            long_break: 20,
            long_break_interval: 3,
            current_phase: Phase::LongBreak,
        };

        let mut prefs = PreferenceDocument::new();
        prefs.extend(encode_balance(725));
        prefs.extend(encode_inventory(&inventory));
        prefs.extend(encode_timer_config(&config));

        let account = decode_account(&prefs);
        assert_eq!(account.balance, 725);
        assert_eq!(account.inventory, inventory);
        assert_eq!(account.timer_config, config);
    }

    #[test]
    fn encode_inventory_drops_zero_counts() {
        let mut inventory = BTreeMap::new();
        inventory.insert("gone.png".to_string(), 0);
        inventory.insert("kept.png".to_string(), 2);

        let mut prefs = PreferenceDocument::new();
        prefs.extend(encode_inventory(&inventory));
        let account = decode_account(&prefs);
        assert_eq!(account.owned_count("gone.png"), 0);
        assert_eq!(account.owned_count("kept.png"), 2);
    }
}
