use super::{docker_login, registry_host, Credentials, Registry, SelfAuth};
use crate::{output::Output, Result};

const REGISTRY_URL_VAR: &str = "OKTETO_REGISTRY_URL";
const NAMESPACE_VAR: &str = "OKTETO_NAMESPACE";
const USERNAME_VAR: &str = "OKTETO_USERNAME";
const TOKEN_VAR: &str = "OKTETO_TOKEN";

/// The Okteto registry of the namespace the environment points at. Okteto hands out its own
/// credentials, so this registry authenticates itself.
pub struct Okteto {
    registry_url: String,
    namespace: String,
    username: String,
    token: String,
    output: Output,
}

impl Okteto {
    pub fn new(output: Output) -> Self {
        Self {
            registry_url: String::new(),
            namespace: String::new(),
            username: String::new(),
            token: String::new(),
            output,
        }
    }

    fn init_from(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let require = |name: &str| {
            lookup(name)
                .filter(|value| !value.is_empty())
                .ok_or_else(|| format!("failed getting Okteto's registry: {name} not set"))
        };
        let registry_url = require(REGISTRY_URL_VAR)?;
        self.registry_url = registry_url
            .trim_start_matches("https://")
            .trim_end_matches('/')
            .to_owned();
        self.namespace = require(NAMESPACE_VAR)?;
        self.username = require(USERNAME_VAR)?;
        self.token = require(TOKEN_VAR)?;
        Ok(())
    }
}

impl Registry for Okteto {
    fn init(&mut self) -> Result<()> {
        self.init_from(|name| std::env::var(name).ok())
    }

    fn url(&self) -> String {
        format!("{}/{}", self.registry_url, self.namespace)
    }

    fn login(&self) -> Result<()> {
        docker_login(
            registry_host(&self.registry_url),
            &self.credentials(),
            &self.output,
        )
    }

    fn self_auth(&self) -> Option<&dyn SelfAuth> {
        Some(self)
    }
}

impl SelfAuth for Okteto {
    fn credentials(&self) -> Credentials {
        Credentials {
            username: self.username.clone(),
            password: self.token.clone(),
        }
    }
}
