//! Infrastructure layer

pub mod output_sink;
pub mod process_runner;
pub mod process_tree;
pub mod pty;
pub mod tool_registry;
