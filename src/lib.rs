//! Botkit - tunnel, webhook, and scaffolding helpers for Telegram bots on Chalice

pub mod commands;
pub mod config;
pub mod error;
pub mod subprocess;
pub mod telegram;
pub mod telemetry;
pub mod template;
pub mod tunnel;
