use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::error::ConfigError;
use crate::factorize::FactorizationOracle;
use crate::oracle::{CommandOracle, ScoringOracle};

/// Refresh settings shared by `refresh` and `schedule`. Every flag can also
/// come from the environment (or a `.env` file).
#[derive(Debug, Clone, Args)]
pub struct PipelineArgs {
    /// Seconds between scheduled refresh cycles
    #[arg(long, env = "REFRESH_INTERVAL_SECS", default_value_t = 60)]
    pub refresh_interval_secs: u64,

    /// External oracle command line; the in-process factorization is used when unset
    #[arg(long, env = "ORACLE_COMMAND")]
    pub oracle_command: Option<String>,

    /// Upper bound on one oracle exchange
    #[arg(long, env = "ORACLE_TIMEOUT_SECS", default_value_t = 120)]
    pub oracle_timeout_secs: u64,

    /// Concurrent per-user publishes
    #[arg(long, env = "PUBLISH_CONCURRENCY", default_value_t = 8)]
    pub publish_concurrency: usize,

    /// Seed for the in-process factorization
    #[arg(long, env = "FACTORIZATION_SEED", default_value_t = 42)]
    pub factorization_seed: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OracleSettings {
    Command { program: String, args: Vec<String> },
    Factorization { seed: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub refresh_interval: Duration,
    pub oracle: OracleSettings,
    pub oracle_timeout: Duration,
    pub publish_concurrency: usize,
}

impl PipelineArgs {
    pub fn into_config(self) -> Result<PipelineConfig, ConfigError> {
        if self.refresh_interval_secs == 0 {
            return Err(ConfigError::NotPositive {
                name: "REFRESH_INTERVAL_SECS",
            });
        }
        if self.oracle_timeout_secs == 0 {
            return Err(ConfigError::NotPositive {
                name: "ORACLE_TIMEOUT_SECS",
            });
        }
        if self.publish_concurrency == 0 {
            return Err(ConfigError::NotPositive {
                name: "PUBLISH_CONCURRENCY",
            });
        }

        let oracle = match self.oracle_command {
            Some(command) => {
                let mut parts = command.split_whitespace().map(str::to_string);
                let program = parts.next().ok_or(ConfigError::EmptyOracleCommand)?;
                OracleSettings::Command {
                    program,
                    args: parts.collect(),
                }
            }
            None => OracleSettings::Factorization {
                seed: self.factorization_seed,
            },
        };

        Ok(PipelineConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs),
            oracle,
            oracle_timeout: Duration::from_secs(self.oracle_timeout_secs),
            publish_concurrency: self.publish_concurrency,
        })
    }
}

impl OracleSettings {
    pub fn build(&self) -> Arc<dyn ScoringOracle> {
        match self {
            OracleSettings::Command { program, args } => {
                Arc::new(CommandOracle::new(program.clone(), args.clone()))
            }
            OracleSettings::Factorization { seed } => Arc::new(FactorizationOracle::new(*seed)),
        }
    }
}
