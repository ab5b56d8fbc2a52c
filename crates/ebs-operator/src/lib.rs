//! EBS operator process: configuration and the reconcile loop

pub mod config;
pub mod runner;

pub use config::{Cli, Command, LogFormat, Settings};
pub use runner::{shutdown_signal, Operator};
