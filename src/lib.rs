//! Issue Runner: turns assigned tracker issues into agent-made branches.

pub mod agent;
pub mod cli;
pub mod config;
pub mod error;
pub mod logging;
pub mod poller;
pub mod queue;
pub mod recovery;
pub mod store;
pub mod tracker;
pub mod vcs;
pub mod worker;
pub mod workspace;
