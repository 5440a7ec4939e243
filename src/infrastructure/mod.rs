pub mod config;
pub mod credential_store;
pub mod drive_client;
pub mod error;
pub mod local_store;
pub mod logging;
pub mod oauth_client;
pub mod state_codec;
pub mod storage;
pub mod userinfo_client;
