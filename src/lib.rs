//! talkscribe — a Telegram-fronted speech-to-text service
//!
//! A user sends a voice, audio or video artifact; the service transcribes
//! it, optionally separates speakers, formats the result with an LLM, debits
//! the user's minute balance and returns text. Hexagonal layout: `ports`
//! define the seams, `adapters` speak to the real services, `app` owns the
//! job pipeline.

pub mod adapters;
pub mod app;
pub mod config;
pub mod domain;
pub mod engine;
pub mod error;
pub mod formatter;
pub mod media;
pub mod ports;
pub mod server;
