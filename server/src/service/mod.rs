//! Service layer

pub mod adapter;
pub mod command;
pub mod health;
pub mod operations;
pub mod stream;
