#![forbid(unsafe_code)]

pub mod cli;
pub mod config;
pub mod error;
pub mod evaluate;
pub mod models;
pub mod optimize;
pub mod pipeline;
pub mod profiler;
pub mod reasoning;
pub mod sqlite;
pub mod stages;
pub mod utils;
pub mod validator;

pub use cli::app::{Cli, Command};
