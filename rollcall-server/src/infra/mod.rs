pub mod app_state;
pub mod config;
pub mod live;
pub mod startup;
pub mod websocket;
