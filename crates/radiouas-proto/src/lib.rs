pub mod api;
pub mod catalog;
pub mod config;
pub mod news;
pub mod platform;
pub mod playback;
pub mod protocol;
pub mod schedule;
pub mod state;
pub mod titles;
