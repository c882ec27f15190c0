use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_WORK_MINUTES: u32 = 25;
pub const DEFAULT_SHORT_BREAK_MINUTES: u32 = 5;
pub const DEFAULT_LONG_BREAK_MINUTES: u32 = 15;
pub const DEFAULT_LONG_BREAK_INTERVAL: u32 = 4;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Work,
    ShortBreak,
    LongBreak,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Work => "work",
            Self::ShortBreak => "shortBreak",
            Self::LongBreak => "longBreak",
        }
    }
}

pub fn parse_phase(value: &str) -> Result<Phase, String> {
    match value.trim() {
        "work" => Ok(Phase::Work),
        "shortBreak" => Ok(Phase::ShortBreak),
        "longBreak" => Ok(Phase::LongBreak),
        other => Err(format!("unsupported phase: {other}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerConfig {
    pub work: u32,
    pub short_break: u32,
    pub long_break: u32,
    pub long_break_interval: u32,
    #[serde(alias = "currentMode")]
    pub current_phase: Phase,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            work: DEFAULT_WORK_MINUTES,
            short_break: DEFAULT_SHORT_BREAK_MINUTES,
            long_break: DEFAULT_LONG_BREAK_MINUTES,
            long_break_interval: DEFAULT_LONG_BREAK_INTERVAL,
            current_phase: Phase::Work,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.work == 0 {
            return Err("timerConfig.work must be > 0".to_string());
        }
        if self.short_break == 0 {
            return Err("timerConfig.shortBreak must be > 0".to_string());
        }
        if self.long_break == 0 {
            return Err("timerConfig.longBreak must be > 0".to_string());
        }
        if self.long_break_interval == 0 {
            return Err("timerConfig.longBreakInterval must be > 0".to_string());
        }
        Ok(())
    }

    pub fn duration_seconds(&self, phase: Phase) -> u32 {
        let minutes = match phase {
            Phase::Work => self.work,
            Phase::ShortBreak => self.short_break,
            Phase::LongBreak => self.long_break,
        };
        minutes.saturating_mul(60)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub balance: u64,
    pub inventory: BTreeMap<String, u32>,
    pub timer_config: TimerConfig,
    pub avatar_url: Option<String>,
}

impl AccountSnapshot {
    pub fn owned_count(&self, sticker: &str) -> u32 {
        self.inventory.get(sticker).copied().unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    #[serde(rename = "$id")]
    pub id: String,
    pub content: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userAvatar", skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "message.id")?;
        validate_non_empty(&self.content, "message.content")?;
        validate_non_empty(&self.user_id, "message.userId")?;
        validate_non_empty(&self.user_name, "message.userName")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct NewChatMessage {
    pub content: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "userName")]
    pub user_name: String,
    #[serde(rename = "userAvatar", skip_serializing_if = "Option::is_none")]
    pub user_avatar: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl NewChatMessage {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.content, "message.content")?;
        validate_non_empty(&self.user_id, "message.userId")?;
        validate_non_empty(&self.user_name, "message.userName")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StickerFile {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ApiSession {
    pub user_id: String,
    pub user_name: String,
    pub session_token: String,
    pub issued_at: DateTime<Utc>,
}

impl ApiSession {
    pub fn is_usable(&self) -> bool {
        !self.user_id.trim().is_empty() && !self.session_token.trim().is_empty()
    }
}

// A token is a run of name characters between two colons; anything else
// (plain colons, spaces) is left alone.
pub fn sticker_tokens(content: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut rest = content;
    while let Some(start) = rest.find(':') {
        let after = &rest[start + 1..];
        let Some(end) = after.find(':') else {
            break;
        };
        let candidate = &after[..end];
        if !candidate.is_empty() && candidate.chars().all(is_sticker_name_char) {
            tokens.push(candidate.to_string());
            rest = &after[end + 1..];
        } else {
            rest = after;
        }
    }
    tokens
}

fn is_sticker_name_char(value: char) -> bool {
    value.is_ascii_alphanumeric() || matches!(value, '_' | '-' | '.')
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}
