use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use log::info;

use crate::{
    builder::{ExternalBuilder, NativeBuilder, Publisher},
    manifest::Manifest,
    registry::{registry_host, Registry},
    scheduler::Scheduler,
    task::{self, TaskContext},
    unit::{RenamingRecord, ServiceUnit},
    Result,
};

pub struct Release<'a> {
    pub registry: &'a dyn Registry,
    pub native: &'a dyn NativeBuilder,
    pub publisher: &'a dyn Publisher,
    pub external: &'a dyn ExternalBuilder,
    pub logical_domain: &'a str,
    /// Without a namespace nothing is recorded.
    pub namespace: Option<&'a str>,
    pub manifest_dir: &'a Path,
    pub max_concurrency: NonZeroUsize,
}

#[derive(Debug)]
pub struct ReleaseReport {
    /// In completion order.
    pub records: Vec<RenamingRecord>,
    /// The manifest that was updated, if any.
    pub manifest: Option<PathBuf>,
}

impl Release<'_> {
    /// Native images are published by the publisher, which shares one credential store between
    /// all tasks. Logging in once up front keeps tasks from rewriting it concurrently.
    fn login_publisher(&self) -> Result<()> {
        match self.registry.self_auth() {
            Some(auth) => {
                let url = self.registry.url();
                self.publisher
                    .login(registry_host(&url), &auth.credentials())
                    .map_err(|error| format!("failed logging into {url}: {error}").into())
            }
            None => {
                info!("Using the default docker config.json credentials for login");
                Ok(())
            }
        }
    }

    pub fn run(&self, units: &[ServiceUnit]) -> Result<ReleaseReport> {
        let namespace = self.namespace.filter(|namespace| !namespace.is_empty());

        // External builds push from inside the build, they need docker to be logged in first.
        if units.iter().any(ServiceUnit::is_external) {
            self.registry
                .login()
                .map_err(|error| format!("failed logging into {}: {error}", self.registry.url()))?;
        }
        if units.iter().any(|unit| !unit.is_external()) {
            self.login_publisher()?;
        }

        let context = TaskContext {
            registry: self.registry,
            native: self.native,
            publisher: self.publisher,
            external: self.external,
            namespace,
            logical_domain: self.logical_domain,
        };
        let scheduler = Scheduler::new(self.max_concurrency)?;
        let records = scheduler.run(units, |unit| task::run(&context, unit))?;
        info!("published {} images", records.len());

        let Some(namespace) = namespace else {
            return Ok(ReleaseReport {
                records,
                manifest: None,
            });
        };

        let path = Manifest::path(self.manifest_dir, namespace);
        let mut manifest = Manifest::load(&path)?;
        let changed = manifest.reconcile(records.iter().cloned());
        manifest.persist(&path)?;
        info!(
            "updated {changed} of {} images in {}",
            manifest.entries().len(),
            path.display()
        );

        Ok(ReleaseReport {
            records,
            manifest: Some(path),
        })
    }
}
