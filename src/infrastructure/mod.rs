pub mod config;
pub mod document_store;
pub mod error;
pub mod preference_store;
pub mod prefs_codec;
pub mod realtime;
pub mod session_store;
pub mod sticker_catalog;
