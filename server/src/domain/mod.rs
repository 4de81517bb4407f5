//! Domain models

pub mod command;
pub mod events;
pub mod requests;
pub mod types;
