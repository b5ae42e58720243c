pub mod config;
pub mod fixture;
pub mod output;
pub mod run;

pub use config::CliConfig;
pub use fixture::Fixture;
pub use run::{run, Action, RunOptions};
