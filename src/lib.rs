//! LifeOS onboarding bot: a scripted Telegram conversation that collects a
//! short profile from each new user.

pub mod channels;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod onboarding;
pub mod store;
