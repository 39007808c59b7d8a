use std::fmt;

use image_ref::{split_digest, ImageRef};
use log::info;

use crate::{
    builder::{
        ExternalBuildArgs, ExternalBuilder, NativeBuildArgs, NativeBuilder, PublishArgs,
        Publisher, PLATFORM,
    },
    registry::Registry,
    unit::{namespaced, BuildVariant, CacheHint, RenamingRecord, ServiceUnit},
};

/// Replaced by the url of the registry in base images, so that services can build on top of
/// images published to the same registry.
pub const BASE_URL_PLACEHOLDER: &str = "BASE_URL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Build,
    Digest,
    Publish,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Build => "build",
            Phase::Digest => "resolve the digest of",
            Phase::Publish => "publish",
        })
    }
}

/// A failed task, attributed to its unit and the phase it failed in.
#[derive(Debug)]
pub struct TaskError {
    pub unit: String,
    pub phase: Phase,
    pub source: Box<dyn std::error::Error + Send + Sync + 'static>,
}

impl fmt::Display for TaskError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to {phase} service `{unit}`: {source}",
            phase = self.phase,
            unit = self.unit,
            source = self.source
        )
    }
}

impl std::error::Error for TaskError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&*self.source)
    }
}

pub type TaskOutcome = Result<RenamingRecord, TaskError>;

/// Everything a task needs besides its unit. Shared by all tasks of a release.
pub struct TaskContext<'a> {
    pub registry: &'a dyn Registry,
    pub native: &'a dyn NativeBuilder,
    pub publisher: &'a dyn Publisher,
    pub external: &'a dyn ExternalBuilder,
    /// The namespace of the run, overridden by the namespace of a unit.
    pub namespace: Option<&'a str>,
    /// The domain of the stable names deployment manifests refer to images by.
    pub logical_domain: &'a str,
}

/// Builds `unit`, resolves the digest of the result and publishes it.
pub fn run(context: &TaskContext, unit: &ServiceUnit) -> TaskOutcome {
    let fail = |phase: Phase| {
        move |source: Box<dyn std::error::Error + Send + Sync + 'static>| TaskError {
            unit: unit.name.clone(),
            phase,
            source,
        }
    };

    let repository = ImageRef::parse(
        context
            .registry
            .repository_url(&unit.repository_path(context.namespace)),
    )
    .map_err(|error| fail(Phase::Build)(error.into()))?;

    let digest = match &unit.variant {
        BuildVariant::Native { source, base_image } => {
            let base_image = resolve_base_image(base_image, &context.registry.url())
                .map_err(|error| fail(Phase::Build)(error.into()))?;
            info!("building {} from {source} on {base_image}", unit.name);
            let artifact = context
                .native
                .build(NativeBuildArgs {
                    source,
                    base_image: &base_image,
                    repository: &repository,
                    platform: PLATFORM,
                })
                .map_err(fail(Phase::Build))?;

            let digest = context
                .native
                .digest(&artifact)
                .map_err(fail(Phase::Digest))?;

            let tags = publish_tags(&unit.tags, &digest);
            context
                .publisher
                .publish(
                    &artifact,
                    PublishArgs {
                        repository: &repository,
                        tags: &tags,
                    },
                )
                .map_err(fail(Phase::Publish))?;
            digest
        }
        BuildVariant::External {
            build_file,
            context: build_context,
            target,
            cache,
        } => {
            let first_tag = unit.tags.first().ok_or_else(|| {
                fail(Phase::Build)("at least one tag is required to look up the digest".into())
            })?;
            let cache = cache
                .as_ref()
                .map(|cache| cache_ref(context, unit, cache))
                .transpose()
                .map_err(|error| fail(Phase::Build)(error.into()))?;

            info!("building {} from {}", unit.name, build_file.display());
            context
                .external
                .build_and_push(ExternalBuildArgs {
                    repository: &repository,
                    build_file,
                    context: build_context,
                    target: target.as_deref(),
                    tags: &unit.tags,
                    cache: cache.as_ref(),
                    platform: PLATFORM,
                })
                .map_err(fail(Phase::Build))?;

            let tagged = repository
                .to_builder()
                .with_tag(first_tag.as_str())
                .build()
                .map_err(|error| fail(Phase::Digest)(error.into()))?;
            context
                .external
                .digest(&tagged)
                .map_err(fail(Phase::Digest))?
        }
    };

    let pinned = repository
        .to_builder()
        .with_digest(digest.as_str())
        .build()
        .map_err(|error| fail(Phase::Digest)(error.into()))?;
    info!("{} is now {pinned}", unit.name);

    Ok(RenamingRecord {
        old_reference: format!("{}/{}", context.logical_domain, unit.name),
        new_reference: pinned.into(),
    })
}

/// Substitutes the registry url for every placeholder in `base_image`.
pub fn resolve_base_image(
    base_image: &str,
    registry_url: &str,
) -> Result<ImageRef, image_ref::InvalidImageRef> {
    ImageRef::parse(base_image.replace(BASE_URL_PLACEHOLDER, registry_url))
}

/// The explicit tags followed by the hex part of the digest.
fn publish_tags(tags: &[String], digest: &str) -> Vec<String> {
    let digest_tag = split_digest(digest).map_or(digest, |(_, hex)| hex);
    tags.iter()
        .cloned()
        .chain(std::iter::once(digest_tag.to_owned()))
        .collect()
}

fn cache_ref(
    context: &TaskContext,
    unit: &ServiceUnit,
    cache: &CacheHint,
) -> Result<ImageRef, image_ref::InvalidImageRef> {
    let path = namespaced(
        unit.namespace.as_deref().or(context.namespace),
        &cache.repository,
    );
    ImageRef::parse(context.registry.repository_url(&path))?
        .to_builder()
        .with_tag(cache.key.as_str())
        .build()
}
