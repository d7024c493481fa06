//! Chat platform adapters

mod telegram;

pub use telegram::TelegramService;
