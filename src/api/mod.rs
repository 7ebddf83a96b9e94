// src/api/mod.rs

pub mod ws;
