pub(crate) mod builder;
pub(crate) mod config;
pub(crate) mod manifest;
pub(crate) mod process;
pub(crate) mod registry;
pub(crate) mod release;
pub(crate) mod scheduler;
pub(crate) mod task;
pub(crate) mod unit;

pub mod cli;
pub mod output;

pub(crate) type Result<T, E = Box<dyn std::error::Error + Send + Sync + 'static>> =
    std::result::Result<T, E>;
