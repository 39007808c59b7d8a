use std::path::PathBuf;

/// One buildable and publishable service of a release. Built from the configuration and never
/// modified afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUnit {
    /// Unique within a release. Doubles as the repository name.
    pub name: String,
    /// Explicit tags, in declaration order.
    pub tags: Vec<String>,
    /// Overrides the namespace of the run for this unit.
    pub namespace: Option<String>,
    pub variant: BuildVariant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildVariant {
    /// Compiled straight into an image by `ko`.
    Native {
        source: String,
        /// May contain [`crate::task::BASE_URL_PLACEHOLDER`].
        base_image: String,
    },
    /// Built and pushed by `docker buildx` from a build file.
    External {
        build_file: PathBuf,
        context: PathBuf,
        target: Option<String>,
        cache: Option<CacheHint>,
    },
}

/// Where an external build imports and exports its layer cache. All targets of one build file
/// share a key so that they reuse each other's layers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheHint {
    pub repository: String,
    pub key: String,
}

impl ServiceUnit {
    pub fn is_external(&self) -> bool {
        matches!(self.variant, BuildVariant::External { .. })
    }

    /// The repository path of this unit below the registry, `[namespace/]name`.
    pub fn repository_path(&self, run_namespace: Option<&str>) -> String {
        namespaced(self.namespace.as_deref().or(run_namespace), &self.name)
    }
}

pub(crate) fn namespaced(namespace: Option<&str>, name: &str) -> String {
    match namespace.filter(|namespace| !namespace.is_empty()) {
        Some(namespace) => format!("{namespace}/{name}"),
        None => name.to_owned(),
    }
}

/// The result of one successful build-publish task: the stable logical name of an image and the
/// digest-pinned reference it was just published under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenamingRecord {
    pub old_reference: String,
    pub new_reference: String,
}
