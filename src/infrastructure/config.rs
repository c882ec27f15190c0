use crate::infrastructure::error::InfraError;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

const APP_JSON: &str = "app.json";
const ECONOMY_JSON: &str = "economy.json";
const STICKERS_JSON: &str = "stickers.json";

const DEFAULT_ENDPOINT: &str = "https://cloud.appwrite.io/v1";
const DEFAULT_BOOSTER_PACK_COST: u64 = 100;
const DEFAULT_MAX_PACKS_PER_OPEN: u32 = 10;
const DEFAULT_WORK_REWARD: u64 = 50;
const DEFAULT_LONG_BREAK_REWARD: u64 = 250;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEndpoints {
    pub endpoint: String,
    pub project_id: String,
    pub database_id: String,
    pub messages_collection_id: String,
    pub stickers_bucket_id: String,
}

// The asymmetric reward for landing on a long-break boundary is policy, not
// derived from durations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EconomyPolicy {
    pub booster_pack_cost: u64,
    pub max_packs_per_open: u32,
    pub work_reward: u64,
    pub long_break_reward: u64,
}

impl Default for EconomyPolicy {
    fn default() -> Self {
        Self {
            booster_pack_cost: DEFAULT_BOOSTER_PACK_COST,
            max_packs_per_open: DEFAULT_MAX_PACKS_PER_OPEN,
            work_reward: DEFAULT_WORK_REWARD,
            long_break_reward: DEFAULT_LONG_BREAK_REWARD,
        }
    }
}

impl EconomyPolicy {
    pub fn reward_for(&self, long_break_due: bool) -> u64 {
        if long_break_due {
            self.long_break_reward
        } else {
            self.work_reward
        }
    }
}

fn default_files() -> HashMap<&'static str, serde_json::Value> {
    HashMap::from([
        (
            APP_JSON,
            serde_json::json!({
                "schema": 1,
                "appName": "FocusLeon",
                "endpoint": DEFAULT_ENDPOINT,
                "projectId": "",
                "databaseId": "main",
                "messagesCollectionId": "messages",
                "stickersBucketId": "stickers"
            }),
        ),
        (
            ECONOMY_JSON,
            serde_json::json!({
                "schema": 1,
                "boosterPackCost": DEFAULT_BOOSTER_PACK_COST,
                "maxPacksPerOpen": DEFAULT_MAX_PACKS_PER_OPEN,
                "workReward": DEFAULT_WORK_REWARD,
                "longBreakReward": DEFAULT_LONG_BREAK_REWARD
            }),
        ),
        (
            STICKERS_JSON,
            serde_json::json!({
                "schema": 1,
                "soundCues": {
                    "learnw1Getgot.png": "big_eyyy",
                    "learnw1Wink.png": "yuh",
                    "learnw1First.png": "first_try",
                    "learnw1Goget.png": "lets_go",
                    "learnw1Smile.png": "small_eyyy",
                    "learnw1Spicy.png": "thats_wild",
                    "learnw1Hypeleon.png": "boats_and_logs",
                    "learnw1Nuns.png": "what"
                }
            }),
        ),
    ])
}

pub fn ensure_default_configs(config_dir: &Path) -> Result<(), InfraError> {
    for (name, value) in default_files() {
        let path = config_dir.join(name);
        if !path.exists() {
            let formatted = serde_json::to_string_pretty(&value)?;
            fs::write(path, format!("{formatted}\n"))?;
        }
    }
    Ok(())
}

fn read_config(path: &Path) -> Result<serde_json::Value, InfraError> {
    let raw = fs::read_to_string(path)?;
    let parsed: serde_json::Value = serde_json::from_str(&raw)?;
    let schema = parsed
        .get("schema")
        .and_then(serde_json::Value::as_u64)
        .ok_or_else(|| InfraError::InvalidConfig(format!("missing schema in {}", path.display())))?;
    if schema != 1 {
        return Err(InfraError::InvalidConfig(format!(
            "unsupported schema {} in {}",
            schema,
            path.display()
        )));
    }
    Ok(parsed)
}

fn string_field(value: &serde_json::Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|field| !field.is_empty())
        .map(ToOwned::to_owned)
}

pub fn load_store_endpoints(config_dir: &Path) -> Result<StoreEndpoints, InfraError> {
    let app = read_config(&config_dir.join(APP_JSON))?;
    Ok(StoreEndpoints {
        endpoint: string_field(&app, "endpoint").unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
        project_id: string_field(&app, "projectId").unwrap_or_default(),
        database_id: string_field(&app, "databaseId").unwrap_or_else(|| "main".to_string()),
        messages_collection_id: string_field(&app, "messagesCollectionId")
            .unwrap_or_else(|| "messages".to_string()),
        stickers_bucket_id: string_field(&app, "stickersBucketId")
            .unwrap_or_else(|| "stickers".to_string()),
    })
}

// Missing or malformed values fall back to defaults; a zero pack cost or
// pack limit is treated as absent.
pub fn load_economy_policy(config_dir: &Path) -> EconomyPolicy {
    let mut policy = EconomyPolicy::default();
    let Ok(parsed) = read_config(&config_dir.join(ECONOMY_JSON)) else {
        return policy;
    };

    if let Some(value) = parsed
        .get("boosterPackCost")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
    {
        policy.booster_pack_cost = value;
    }
    if let Some(value) = parsed
        .get("maxPacksPerOpen")
        .and_then(serde_json::Value::as_u64)
        .filter(|value| *value > 0)
    {
        policy.max_packs_per_open = value.min(u32::MAX as u64) as u32;
    }
    if let Some(value) = parsed.get("workReward").and_then(serde_json::Value::as_u64) {
        policy.work_reward = value;
    }
    if let Some(value) = parsed
        .get("longBreakReward")
        .and_then(serde_json::Value::as_u64)
    {
        policy.long_break_reward = value;
    }

    policy
}

pub fn load_sound_cues(config_dir: &Path) -> HashMap<String, String> {
    let Ok(parsed) = read_config(&config_dir.join(STICKERS_JSON)) else {
        return HashMap::new();
    };
    let Some(cues) = parsed.get("soundCues").and_then(serde_json::Value::as_object) else {
        return HashMap::new();
    };

    cues.iter()
        .filter_map(|(name, cue)| {
            let cue = cue.as_str()?.trim();
            if cue.is_empty() {
                return None;
            }
            Some((name.clone(), cue.to_string()))
        })
        .collect()
}
