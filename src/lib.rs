pub mod application;
pub mod domain;
pub mod infrastructure;

pub use application::booster::{BoosterPackEngine, BoosterPackOpening};
pub use application::commands::{
    AccountResponse, AppState, BoosterOpenResponse, CompletionResponse, DrawnStickerResponse,
    TickResponse, TimerStateResponse, acknowledge_completion_impl, chat_channels_impl,
    clear_session_impl, get_timer_state_impl, list_chat_messages_impl, load_account_impl,
    open_booster_packs_impl, pause_timer_impl, reset_timer_impl, save_session_impl,
    select_phase_impl, send_chat_message_impl, start_timer_impl, tick_timer_impl,
    toggle_timer_impl, update_timer_config_impl,
};
pub use application::ledger::{CurrencyLedger, RetryPolicy, SpendOutcome};
pub use application::reconciler::{
    ChatFeed, ConnectionState, RealtimeReconciler, ScrollDirective, follow_policy,
};
pub use domain::models::{
    AccountSnapshot, ApiSession, ChatMessage, NewChatMessage, Phase, StickerFile, TimerConfig,
};
pub use domain::timer::{TickOutcome, TimerSession};
pub use infrastructure::error::InfraError;
