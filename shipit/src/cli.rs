mod release;
mod repos;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use constcat::concat;

use crate::{
    config::{self, Config},
    output::Output,
    registry::{Ecr, Okteto, Registry},
    task, Result,
};

#[derive(Debug, Parser)]
#[command(version, about)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Stream the output of every tool and all log records as they happen. Without this only a
    /// failed run prints what happened.
    #[arg(long = "verbose", short = 'v', global = true, default_value_t)]
    verbose: bool,

    #[arg(long = "config", global = true, default_value = config::DEFAULT_CONFIG_PATH, help = concat!("The release configuration. Base images may refer to the registry released to as `", task::BASE_URL_PLACEHOLDER, "`."))]
    config: PathBuf,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Release to AWS Elastic Container Registry
    #[command(subcommand)]
    Ecr(EcrCommand),

    /// Release to the registry of the current Okteto namespace
    #[command(subcommand)]
    Okteto(OktetoCommand),
}

#[derive(Debug, Subcommand)]
enum EcrCommand {
    /// Build, tag and push the image of every service
    Release(release::ReleaseArgs),

    /// Create the repositories the services are pushed to when they do not exist yet
    CreateMissingRepos(repos::CreateMissingReposArgs),
}

#[derive(Debug, Subcommand)]
enum OktetoCommand {
    /// Build, tag and push the image of every service
    Release(release::ReleaseArgs),
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn run(self, output: &Output) -> Result<()> {
        let config = Config::load(&self.config)?;

        match self.command {
            Commands::Ecr(command) => {
                let ecr_config = config
                    .ecr
                    .as_ref()
                    .ok_or_else(|| format!("{} has no `ecr` section", self.config.display()))?;
                let mut ecr = Ecr::new(
                    ecr_config.account.clone(),
                    ecr_config.region.clone(),
                    output.clone(),
                );
                ecr.init()?;
                match command {
                    EcrCommand::Release(args) => release::release(&ecr, &config, args, output)?,
                    EcrCommand::CreateMissingRepos(args) => {
                        repos::create_missing_repos(&ecr, &config, args)?
                    }
                }
            }
            Commands::Okteto(command) => {
                let mut okteto = Okteto::new(output.clone());
                okteto.init()?;
                match command {
                    OktetoCommand::Release(args) => {
                        release::release(&okteto, &config, args, output)?
                    }
                }
            }
        }

        Ok(())
    }
}
