use crate::application::bootstrap::bootstrap_workspace;
use crate::application::booster::BoosterPackEngine;
use crate::application::ledger::CurrencyLedger;
use crate::domain::models::{
    AccountSnapshot, ApiSession, ChatMessage, NewChatMessage, TimerConfig, parse_phase,
    sticker_tokens,
};
use crate::domain::timer::{TickOutcome, TimerSession};
use crate::infrastructure::config::{
    StoreEndpoints, load_economy_policy, load_sound_cues, load_store_endpoints,
};
use crate::infrastructure::document_store::{MessageStore, ReqwestMessageStore};
use crate::infrastructure::error::InfraError;
use crate::infrastructure::preference_store::ReqwestPreferenceStore;
use crate::infrastructure::realtime::document_channel;
use crate::infrastructure::session_store::{KeyringSessionStore, SessionStore};
use crate::infrastructure::sticker_catalog::{ReqwestStickerCatalog, StickerCatalog};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

const CHAT_HISTORY_LIMIT: u32 = 50;

pub struct AppState {
    config_dir: PathBuf,
    logs_dir: PathBuf,
    runtime: Mutex<RuntimeState>,
    log_guard: Mutex<()>,
}

impl AppState {
    pub fn new(workspace_root: PathBuf) -> Result<Self, InfraError> {
        let bootstrap = bootstrap_workspace(&workspace_root)?;

        Ok(Self {
            config_dir: bootstrap.config_dir,
            logs_dir: bootstrap.logs_dir,
            runtime: Mutex::new(RuntimeState::default()),
            log_guard: Mutex::new(()),
        })
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn command_error(&self, command: &str, error: &InfraError) -> String {
        self.log_error(command, &error.to_string());
        error.to_string()
    }

    pub fn log_info(&self, command: &str, message: &str) {
        self.append_log("info", command, message);
    }

    pub fn log_error(&self, command: &str, message: &str) {
        self.append_log("error", command, message);
    }

    fn append_log(&self, level: &str, command: &str, message: &str) {
        let Ok(_guard) = self.log_guard.lock() else {
            return;
        };
        let path = self.logs_dir.join("commands.log");
        let payload = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "level": level,
            "command": command,
            "message": message,
        });

        if let Ok(mut file) = OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{}", payload);
        }
    }
}

#[derive(Debug)]
struct RuntimeState {
    timer_config: TimerConfig,
    timer: TimerSession,
}

impl Default for RuntimeState {
    fn default() -> Self {
        let timer_config = TimerConfig::default();
        let timer = TimerSession::new(&timer_config);
        Self {
            timer_config,
            timer,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TimerStateResponse {
    pub phase: String,
    pub remaining_seconds: u32,
    pub running: bool,
    pub completed_work_sessions: u32,
    pub awaiting_acknowledgement: bool,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CompletionResponse {
    pub completed_phase: String,
    pub session_index: u32,
    pub long_break_due: bool,
    /// `None` when no session is active or the award failed; either way the
    /// timer has already advanced.
    pub reward_granted: Option<u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TickResponse {
    pub timer: TimerStateResponse,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completion: Option<CompletionResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AccountResponse {
    pub balance: u64,
    pub inventory: BTreeMap<String, u32>,
    pub timer_config: TimerConfig,
    pub avatar_url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DrawnStickerResponse {
    pub id: String,
    pub name: String,
    pub view_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoosterOpenResponse {
    pub drawn: Vec<DrawnStickerResponse>,
    pub newly_unlocked: Vec<String>,
    pub sound_cues: Vec<String>,
    pub balance: u64,
    pub inventory: BTreeMap<String, u32>,
}

pub fn get_timer_state_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let runtime = lock_runtime(state)?;
    Ok(to_timer_state_response(&runtime.timer))
}

pub fn start_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.timer.start();
    Ok(to_timer_state_response(&runtime.timer))
}

pub fn pause_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.timer.pause();
    Ok(to_timer_state_response(&runtime.timer))
}

pub fn toggle_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let mut runtime = lock_runtime(state)?;
    runtime.timer.toggle();
    Ok(to_timer_state_response(&runtime.timer))
}

pub fn reset_timer_impl(state: &AppState) -> Result<TimerStateResponse, InfraError> {
    let mut runtime = lock_runtime(state)?;
    let config = runtime.timer_config.clone();
    runtime.timer.reset(&config);
    Ok(to_timer_state_response(&runtime.timer))
}

pub async fn select_phase_impl(
    state: &AppState,
    phase: String,
) -> Result<TimerStateResponse, InfraError> {
    let phase = parse_phase(&phase).map_err(InfraError::InvalidConfig)?;

    let config = {
        let mut runtime = lock_runtime(state)?;
        let config = runtime.timer_config.clone();
        runtime.timer.select_phase(phase, &config);
        runtime.timer_config.current_phase = phase;
        runtime.timer_config.clone()
    };

    persist_timer_config_best_effort(state, &config, "select_phase").await;
    state.log_info("select_phase", &format!("switched to phase={}", phase.as_str()));

    let runtime = lock_runtime(state)?;
    Ok(to_timer_state_response(&runtime.timer))
}

/// A work completion computes the reward tier and credits the ledger; a
/// failed or unavailable award is logged and the phase transition proceeds
/// regardless. Timekeeping is never blocked by the economy layer.
pub async fn tick_timer_impl(state: &AppState) -> Result<TickResponse, InfraError> {
    let (outcome, prior_phase) = {
        let mut runtime = lock_runtime(state)?;
        let prior_phase = runtime.timer.phase();
        let config = runtime.timer_config.clone();
        (runtime.timer.tick(&config), prior_phase)
    };

    let completion = match outcome {
        TickOutcome::Idle | TickOutcome::Running { .. } => None,
        TickOutcome::WorkComplete {
            session_index,
            long_break_due,
        } => {
            let economy = load_economy_policy(state.config_dir());
            let amount = economy.reward_for(long_break_due);
            let reward_granted = match try_session(state) {
                Ok(Some((endpoints, session))) => {
                    let ledger = ledger_for(&endpoints);
                    match ledger.award(&session.session_token, amount).await {
                        Ok(balance) => {
                            state.log_info(
                                "tick_timer",
                                &format!("awarded {amount} microLeons; balance={balance}"),
                            );
                            Some(amount)
                        }
                        Err(error) => {
                            state.log_error(
                                "tick_timer",
                                &format!("award failed; continuing under-rewarded: {error}"),
                            );
                            None
                        }
                    }
                }
                Ok(None) => None,
                Err(error) => {
                    state.log_error(
                        "tick_timer",
                        &format!("session lookup failed; completion not rewarded: {error}"),
                    );
                    None
                }
            };

            Some(CompletionResponse {
                completed_phase: prior_phase.as_str().to_string(),
                session_index,
                long_break_due,
                reward_granted,
            })
        }
        TickOutcome::BreakComplete => {
            let (config, session_index) = {
                let mut runtime = lock_runtime(state)?;
                runtime.timer_config.current_phase = runtime.timer.phase();
                (
                    runtime.timer_config.clone(),
                    runtime.timer.completed_work_sessions(),
                )
            };
            persist_timer_config_best_effort(state, &config, "tick_timer").await;

            Some(CompletionResponse {
                completed_phase: prior_phase.as_str().to_string(),
                session_index,
                long_break_due: false,
                reward_granted: None,
            })
        }
    };

    let timer = {
        let runtime = lock_runtime(state)?;
        to_timer_state_response(&runtime.timer)
    };
    Ok(TickResponse { timer, completion })
}

// Dismisses the completion dialog and moves into the earned break.
pub async fn acknowledge_completion_impl(
    state: &AppState,
) -> Result<TimerStateResponse, InfraError> {
    let config = {
        let mut runtime = lock_runtime(state)?;
        let config = runtime.timer_config.clone();
        let next_phase = runtime
            .timer
            .acknowledge_completion(&config)
            .map_err(InfraError::InvalidConfig)?;
        runtime.timer_config.current_phase = next_phase;
        runtime.timer_config.clone()
    };

    persist_timer_config_best_effort(state, &config, "acknowledge_completion").await;

    let runtime = lock_runtime(state)?;
    Ok(to_timer_state_response(&runtime.timer))
}

pub async fn update_timer_config_impl(
    state: &AppState,
    work: u32,
    short_break: u32,
    long_break: u32,
    long_break_interval: u32,
) -> Result<TimerConfig, InfraError> {
    let config = {
        let runtime = lock_runtime(state)?;
        TimerConfig {
            work,
            short_break,
            long_break,
            long_break_interval,
            current_phase: runtime.timer_config.current_phase,
        }
    };
    config.validate().map_err(InfraError::InvalidConfig)?;

    // An explicit settings save is the one timer-config write the user is
    // waiting on, so a persistence failure surfaces instead of degrading.
    if let Some((endpoints, session)) = try_session(state)? {
        let ledger = ledger_for(&endpoints);
        ledger
            .save_timer_config(&session.session_token, &config)
            .await?;
    }

    let mut runtime = lock_runtime(state)?;
    runtime.timer_config = config.clone();
    runtime.timer.reset(&config);
    drop(runtime);

    state.log_info(
        "update_timer_config",
        &format!(
            "updated durations work={work} shortBreak={short_break} longBreak={long_break} interval={long_break_interval}"
        ),
    );
    Ok(config)
}

// Reads the authoritative account document and restores the persisted timer
// config into the local session.
pub async fn load_account_impl(state: &AppState) -> Result<AccountResponse, InfraError> {
    let (endpoints, session) = required_session(state)?;
    let ledger = ledger_for(&endpoints);
    let account = ledger.read_account(&session.session_token).await?;

    {
        let mut runtime = lock_runtime(state)?;
        runtime.timer_config = account.timer_config.clone();
        runtime.timer = TimerSession::new(&account.timer_config);
    }

    state.log_info(
        "load_account",
        &format!("loaded account balance={}", account.balance),
    );

    Ok(AccountResponse {
        balance: account.balance,
        inventory: account.inventory,
        timer_config: account.timer_config,
        avatar_url: account.avatar_url,
    })
}

pub async fn open_booster_packs_impl(
    state: &AppState,
    pack_count: u32,
) -> Result<BoosterOpenResponse, InfraError> {
    let (endpoints, session) = required_session(state)?;
    let economy = load_economy_policy(state.config_dir());
    let sound_cues = load_sound_cues(state.config_dir());

    let ledger = Arc::new(ledger_for(&endpoints));
    let catalog = Arc::new(ReqwestStickerCatalog::new(&endpoints));
    let engine = BoosterPackEngine::new(ledger, Arc::clone(&catalog), economy);

    let opening = engine.open(&session.session_token, pack_count).await?;

    let drawn = opening
        .drawn
        .iter()
        .map(|file| {
            Ok(DrawnStickerResponse {
                id: file.id.clone(),
                name: file.name.clone(),
                view_url: catalog.resolve_view_url(&file.id)?,
            })
        })
        .collect::<Result<Vec<_>, InfraError>>()?;
    let cues = opening
        .newly_unlocked
        .iter()
        .filter_map(|name| sound_cues.get(name).cloned())
        .collect();

    state.log_info(
        "open_booster_packs",
        &format!(
            "opened {pack_count} packs; {} newly unlocked; balance={}",
            opening.newly_unlocked.len(),
            opening.balance
        ),
    );

    Ok(BoosterOpenResponse {
        drawn,
        newly_unlocked: opening.newly_unlocked,
        sound_cues: cues,
        balance: opening.balance,
        inventory: opening.inventory,
    })
}

// Sticker ownership is validated against a fresh account read; the returned
// document is the optimistic echo for the feed.
pub async fn send_chat_message_impl(
    state: &AppState,
    content: String,
) -> Result<ChatMessage, InfraError> {
    let content = content.trim().to_string();
    if content.is_empty() {
        return Err(InfraError::InvalidDocument(
            "message content must not be empty".to_string(),
        ));
    }

    let (endpoints, session) = required_session(state)?;
    let ledger = ledger_for(&endpoints);
    let account = ledger.read_account(&session.session_token).await?;

    if !sticker_tokens(&content).is_empty() {
        let catalog = ReqwestStickerCatalog::new(&endpoints);
        let catalog_names: HashSet<String> = catalog
            .list(&session.session_token)
            .await?
            .into_iter()
            .map(|file| file.name)
            .collect();
        ensure_stickers_owned(&content, &account, &catalog_names)?;
    }

    let message = NewChatMessage {
        content,
        user_id: session.user_id.clone(),
        user_name: session.user_name.clone(),
        user_avatar: account.avatar_url.clone(),
        created_at: Utc::now(),
    };

    let store = ReqwestMessageStore::new(&endpoints);
    let created = store
        .create_message(&session.session_token, &message)
        .await?;

    state.log_info(
        "send_chat_message",
        &format!("created message id={}", created.id),
    );
    Ok(created)
}

pub async fn list_chat_messages_impl(
    state: &AppState,
    limit: Option<u32>,
) -> Result<Vec<ChatMessage>, InfraError> {
    let (endpoints, session) = required_session(state)?;
    let store = ReqwestMessageStore::new(&endpoints);
    store
        .list_recent(
            &session.session_token,
            limit.unwrap_or(CHAT_HISTORY_LIMIT).max(1),
        )
        .await
}

pub fn chat_channels_impl(state: &AppState) -> Result<Vec<String>, InfraError> {
    let endpoints = load_store_endpoints(state.config_dir())?;
    Ok(vec![document_channel(
        &endpoints.database_id,
        &endpoints.messages_collection_id,
    )])
}

pub fn save_session_impl(
    state: &AppState,
    user_id: String,
    user_name: String,
    session_token: String,
) -> Result<(), InfraError> {
    let session = ApiSession {
        user_id: user_id.trim().to_string(),
        user_name: user_name.trim().to_string(),
        session_token: session_token.trim().to_string(),
        issued_at: Utc::now(),
    };
    if !session.is_usable() {
        return Err(InfraError::InvalidConfig(
            "user_id and session_token must not be empty".to_string(),
        ));
    }

    KeyringSessionStore::default().save_session(&session)?;
    state.log_info("save_session", &format!("stored session for user={user_id}"));
    Ok(())
}

pub fn clear_session_impl(state: &AppState) -> Result<(), InfraError> {
    KeyringSessionStore::default().delete_session()?;
    state.log_info("clear_session", "cleared stored session");
    Ok(())
}

fn lock_runtime(state: &AppState) -> Result<MutexGuard<'_, RuntimeState>, InfraError> {
    state
        .runtime
        .lock()
        .map_err(|error| InfraError::InvalidConfig(format!("runtime lock poisoned: {error}")))
}

fn to_timer_state_response(timer: &TimerSession) -> TimerStateResponse {
    TimerStateResponse {
        phase: timer.phase().as_str().to_string(),
        remaining_seconds: timer.remaining_seconds(),
        running: timer.is_running(),
        completed_work_sessions: timer.completed_work_sessions(),
        awaiting_acknowledgement: timer.is_awaiting_acknowledgement(),
    }
}

fn ledger_for(endpoints: &StoreEndpoints) -> CurrencyLedger<ReqwestPreferenceStore> {
    CurrencyLedger::new(Arc::new(ReqwestPreferenceStore::new(endpoints)))
}

fn try_session(state: &AppState) -> Result<Option<(StoreEndpoints, ApiSession)>, InfraError> {
    let endpoints = load_store_endpoints(state.config_dir())?;
    if endpoints.project_id.is_empty() {
        return Ok(None);
    }

    match KeyringSessionStore::default().load_session()? {
        Some(session) if session.is_usable() => Ok(Some((endpoints, session))),
        _ => Ok(None),
    }
}

fn required_session(state: &AppState) -> Result<(StoreEndpoints, ApiSession), InfraError> {
    let endpoints = load_store_endpoints(state.config_dir())?;
    if endpoints.project_id.is_empty() {
        return Err(InfraError::InvalidConfig(
            "projectId is not configured; set it in config/app.json".to_string(),
        ));
    }

    let session = KeyringSessionStore::default()
        .load_session()?
        .filter(ApiSession::is_usable)
        .ok_or_else(|| {
            InfraError::Unauthorized("no active session; sign in first".to_string())
        })?;
    Ok((endpoints, session))
}

async fn persist_timer_config_best_effort(state: &AppState, config: &TimerConfig, command: &str) {
    match try_session(state) {
        Ok(Some((endpoints, session))) => {
            let ledger = ledger_for(&endpoints);
            if let Err(error) = ledger
                .save_timer_config(&session.session_token, config)
                .await
            {
                state.log_error(command, &format!("timer config not persisted: {error}"));
            }
        }
        Ok(None) => {}
        Err(error) => {
            state.log_error(command, &format!("timer config not persisted: {error}"));
        }
    }
}

fn ensure_stickers_owned(
    content: &str,
    account: &AccountSnapshot,
    catalog_names: &HashSet<String>,
) -> Result<(), InfraError> {
    for token in sticker_tokens(content) {
        let candidates = [token.clone(), format!("{token}.png")];
        let Some(name) = candidates
            .iter()
            .find(|candidate| catalog_names.contains(*candidate))
        else {
            // Not a catalog sticker; leave the text alone.
            continue;
        };
        if account.owned_count(name) == 0 {
            return Err(InfraError::InvalidDocument(format!(
                "sticker not unlocked: {name}"
            )));
        }
    }
    Ok(())
}
