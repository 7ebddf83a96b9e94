// src/chat/mod.rs

pub mod store;

pub use store::{MessageStore, StoredMessage};
