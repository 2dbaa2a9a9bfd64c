pub mod app_state;
pub mod client;
pub mod config_record;
pub mod coordinator;
pub mod entity;
pub mod integration;
pub mod sensor;
pub mod settings;
pub mod snapshot;
