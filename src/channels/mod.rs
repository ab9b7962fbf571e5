//! Channel abstraction for message I/O.

pub mod channel;
pub mod rich_text;
pub mod telegram;

pub use channel::*;
pub use telegram::TelegramChannel;
