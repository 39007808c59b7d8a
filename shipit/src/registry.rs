mod ecr;
mod okteto;

use std::fmt;

pub use ecr::*;
use log::info;
pub use okteto::*;

use crate::{output::Output, process, Result};

pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// The capabilities every registry offers.
pub trait Registry: Sync {
    /// Resolves whatever the registry needs from its environment. Called once, before any other
    /// method.
    fn init(&mut self) -> Result<()>;

    /// The base address images are pushed below, possibly including a path.
    fn url(&self) -> String;

    fn repository_url(&self, path: &str) -> String {
        format!("{url}/{path}", url = self.url())
    }

    /// Makes docker able to push to this registry. External builds push from inside `docker
    /// buildx`, so this has to happen before any of them starts.
    fn login(&self) -> Result<()>;

    /// Registries that carry their own credentials return themselves here. Everyone else relies
    /// on the docker keychain of the machine.
    fn self_auth(&self) -> Option<&dyn SelfAuth> {
        None
    }
}

pub trait SelfAuth: Registry {
    fn credentials(&self) -> Credentials;
}

/// Registries whose repositories have to exist before anything can be pushed to them.
pub trait RepositoryManager: Registry {
    fn repository_exists(&self, repository: &str) -> Result<bool>;
    fn create_repository(&self, repository: &str) -> Result<()>;
}

/// Creates the repositories from `repositories` that do not exist yet and returns their names.
pub fn create_missing_repositories(
    manager: &dyn RepositoryManager,
    repositories: &[String],
) -> Result<Vec<String>> {
    let mut created = Vec::new();
    for repository in repositories {
        if manager.repository_exists(repository)? {
            continue;
        }
        manager.create_repository(repository)?;
        info!("repository created in registry: {repository}");
        created.push(repository.clone());
    }
    Ok(created)
}

/// `docker login` wants the host, not the namespace path some registries add to their url.
pub fn registry_host(url: &str) -> &str {
    url.split('/').next().unwrap_or(url)
}

pub fn docker_login(host: &str, credentials: &Credentials, output: &Output) -> Result<()> {
    info!("Logging docker into {host} as {}", credentials.username);
    output.capture_with_input(
        process::command!(
            "docker",
            "login",
            "--username",
            &credentials.username,
            "--password-stdin",
            host,
        ),
        credentials.password.clone().into_bytes(),
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod fake {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    };

    use super::*;

    #[derive(Default)]
    pub struct FakeRegistry {
        pub logins: AtomicUsize,
        pub fail_login: bool,
        pub existing: Vec<String>,
        pub created: Mutex<Vec<String>>,
        pub credentials: Option<(String, String)>,
    }

    impl Registry for FakeRegistry {
        fn init(&mut self) -> Result<()> {
            Ok(())
        }

        fn url(&self) -> String {
            "registry.example.com".to_owned()
        }

        fn login(&self) -> Result<()> {
            self.logins.fetch_add(1, Ordering::SeqCst);
            if self.fail_login {
                return Err("login rejected".into());
            }
            Ok(())
        }

        fn self_auth(&self) -> Option<&dyn SelfAuth> {
            self.credentials.as_ref().map(|_| self as &dyn SelfAuth)
        }
    }

    impl SelfAuth for FakeRegistry {
        fn credentials(&self) -> Credentials {
            let (username, password) = self.credentials.clone().unwrap_or_default();
            Credentials { username, password }
        }
    }

    impl RepositoryManager for FakeRegistry {
        fn repository_exists(&self, repository: &str) -> Result<bool> {
            Ok(self.existing.iter().any(|existing| existing == repository)
                || self.created.lock().unwrap().iter().any(|r| r == repository))
        }

        fn create_repository(&self, repository: &str) -> Result<()> {
            self.created.lock().unwrap().push(repository.to_owned());
            Ok(())
        }
    }
}
