//! I/O collaborators for the decision loop.

pub mod apply;
pub mod archive;
pub mod completion;
pub mod config;
pub mod context;
pub mod forge;
pub mod git;
pub mod graph;
pub mod kill_switch;
pub mod memory;
pub mod mutations;
pub mod process;
pub mod prompt;
pub mod publish;
pub mod quality;
pub mod workspace;
