use log::debug;

use super::{docker_login, Credentials, Registry, RepositoryManager};
use crate::{output::Output, process, Result};

const NOT_FOUND_MARKER: &[u8] = b"RepositoryNotFoundException";

/// Amazon ECR, driven through the `aws` command line.
pub struct Ecr {
    account: String,
    region: String,
    output: Output,
}

impl Ecr {
    /// `account` may be empty, in which case [`Registry::init`] asks AWS which account the
    /// ambient credentials belong to.
    pub fn new(account: impl Into<String>, region: impl Into<String>, output: Output) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            output,
        }
    }

    fn aws_ecr(&self) -> process::Command {
        process::command!("aws", "ecr", "--region", &self.region, "--output", "json")
    }

    fn login_password(&self) -> Result<String> {
        let output = self
            .output
            .capture(process::args!(self.aws_ecr(), "get-login-password"))?;
        Ok(std::str::from_utf8(&output.stdout)?.trim().to_owned())
    }
}

impl Registry for Ecr {
    fn init(&mut self) -> Result<()> {
        if self.region.is_empty() {
            return Err("the ECR region is not configured, set `ecr.region` in the config".into());
        }
        if self.account.is_empty() {
            let output = self.output.capture(process::command!(
                "aws",
                "sts",
                "get-caller-identity",
                "--query",
                "Account",
                "--output",
                "text",
            ))?;
            self.account = std::str::from_utf8(&output.stdout)?.trim().to_owned();
            debug!("resolved ECR account {}", self.account);
        }
        if self.account.is_empty() {
            return Err("could not determine the AWS account of the ECR registry".into());
        }
        Ok(())
    }

    fn url(&self) -> String {
        format!(
            "{account}.dkr.ecr.{region}.amazonaws.com",
            account = self.account,
            region = self.region
        )
    }

    fn login(&self) -> Result<()> {
        let credentials = Credentials {
            username: "AWS".to_owned(),
            password: self.login_password()?,
        };
        docker_login(&self.url(), &credentials, &self.output)
    }
}

impl RepositoryManager for Ecr {
    fn repository_exists(&self, repository: &str) -> Result<bool> {
        let process::Output { command, output } = process::args!(
            self.aws_ecr(),
            "describe-repositories",
            "--repository-names",
            repository,
        )
        .try_output()?;

        if output.status.success() {
            Ok(true)
        } else if contains(&output.stderr, NOT_FOUND_MARKER) {
            Ok(false)
        } else {
            self.output.append(&output.stderr);
            Err(process::Error {
                command,
                kind: process::ErrorKind::NonZeroExitStatus(
                    output.status.code().and_then(std::num::NonZeroI32::new),
                ),
            }
            .into())
        }
    }

    fn create_repository(&self, repository: &str) -> Result<()> {
        self.output.capture(process::args!(
            self.aws_ecr(),
            "create-repository",
            "--repository-name",
            repository,
        ))?;
        Ok(())
    }
}

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack
        .windows(needle.len())
        .any(|window| window == needle)
}
