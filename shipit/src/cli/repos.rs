use clap::Args;
use log::info;

use crate::{
    config::Config,
    registry::{create_missing_repositories, RepositoryManager},
    unit::{namespaced, BuildVariant, ServiceUnit},
    Result,
};

#[derive(Debug, Args)]
pub struct CreateMissingReposArgs {
    /// The namespace the repositories are created below.
    #[arg(long = "namespace", value_parser = non_empty)]
    pub namespace: String,
}

fn non_empty(value: &str) -> Result<String, &'static str> {
    if value.is_empty() {
        return Err("expected a non-empty namespace");
    }
    Ok(value.to_string())
}

pub fn create_missing_repos(
    manager: &dyn RepositoryManager,
    config: &Config,
    args: CreateMissingReposArgs,
) -> Result<()> {
    let repositories = required_repositories(&config.units()?, &args.namespace);
    let created = create_missing_repositories(manager, &repositories)?;
    info!(
        "{} of {} repositories were missing",
        created.len(),
        repositories.len()
    );
    Ok(())
}

/// Every repository a release below `namespace` pushes to, build caches included.
fn required_repositories(units: &[ServiceUnit], namespace: &str) -> Vec<String> {
    let mut repositories = Vec::with_capacity(units.len());
    for unit in units {
        repositories.push(unit.repository_path(Some(namespace)));
        if let BuildVariant::External {
            cache: Some(cache), ..
        } = &unit.variant
        {
            let namespace = unit.namespace.as_deref().unwrap_or(namespace);
            let repository = namespaced(Some(namespace), &cache.repository);
            if !repositories.contains(&repository) {
                repositories.push(repository);
            }
        }
    }
    repositories
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::{registry::fake::FakeRegistry, unit::CacheHint};

    fn units() -> Vec<ServiceUnit> {
        let external = |name: &str| ServiceUnit {
            name: name.to_owned(),
            tags: vec!["latest".to_owned()],
            namespace: None,
            variant: BuildVariant::External {
                build_file: PathBuf::from("Dockerfile"),
                context: PathBuf::from("."),
                target: Some(name.to_owned()),
                cache: Some(CacheHint {
                    repository: "build-cache".to_owned(),
                    key: "web-admin".to_owned(),
                }),
            },
        };
        vec![
            ServiceUnit {
                name: "api".to_owned(),
                tags: vec![],
                namespace: Some("tools".to_owned()),
                variant: BuildVariant::Native {
                    source: "./cmd/api".to_owned(),
                    base_image: "busybox".to_owned(),
                },
            },
            external("web"),
            external("admin"),
        ]
    }

    #[test]
    fn lists_service_and_cache_repositories_once() {
        assert_eq!(
            required_repositories(&units(), "prod"),
            ["tools/api", "prod/web", "prod/build-cache", "prod/admin"]
        );
    }

    #[test]
    fn creates_what_is_missing() {
        let registry = FakeRegistry {
            existing: vec!["prod/web".to_owned()],
            ..Default::default()
        };
        let repositories = required_repositories(&units(), "prod");
        let created = create_missing_repositories(&registry, &repositories).unwrap();
        assert_eq!(created, ["tools/api", "prod/build-cache", "prod/admin"]);
    }

    #[test]
    fn empty_namespace_is_rejected() {
        assert!(non_empty("").is_err());
        assert_eq!(non_empty("prod").unwrap(), "prod");
    }
}
