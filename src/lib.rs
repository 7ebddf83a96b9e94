// src/lib.rs

pub mod analysis;
pub mod api;
pub mod chat;
pub mod config;
pub mod db;
pub mod error;
pub mod identity;
pub mod insight;
pub mod rtc;
pub mod session;
pub mod state;
