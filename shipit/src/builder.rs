mod docker;
mod ko;

use std::{fmt, path::Path};

pub use docker::*;
use image_ref::ImageRef;
pub use ko::*;
use tempfile::TempDir;

use crate::{registry::Credentials, Result};

/// Every image is built for this platform only.
pub const PLATFORM: &str = "linux/amd64";

pub struct NativeBuildArgs<'a> {
    pub source: &'a str,
    pub base_image: &'a ImageRef,
    /// The repository the image will be published to.
    pub repository: &'a ImageRef,
    pub platform: &'a str,
}

/// An image that was built but not pushed anywhere yet, stored as an OCI image layout in a
/// temporary directory that is removed with the artifact.
pub struct Artifact {
    dir: TempDir,
}

impl Artifact {
    pub fn new(dir: TempDir) -> Self {
        Self { dir }
    }

    pub fn layout(&self) -> &Path {
        self.dir.path()
    }
}

/// Compiles a service straight into an image.
pub trait NativeBuilder: Sync {
    fn build(&self, args: NativeBuildArgs) -> Result<Artifact>;
    fn digest(&self, artifact: &Artifact) -> Result<String>;
}

pub struct PublishArgs<'a> {
    pub repository: &'a ImageRef,
    /// Never empty, the first tag is pushed and the rest point at it.
    pub tags: &'a [String],
}

pub trait Publisher: Sync {
    /// Stores `credentials` for `host` where every later publish finds them. Called once before
    /// any publish; without it the docker keychain of the machine is used.
    fn login(&self, host: &str, credentials: &Credentials) -> Result<()>;

    fn publish(&self, artifact: &Artifact, args: PublishArgs) -> Result<()>;
}

pub struct ExternalBuildArgs<'a> {
    pub repository: &'a ImageRef,
    pub build_file: &'a Path,
    pub context: &'a Path,
    pub target: Option<&'a str>,
    pub tags: &'a [String],
    /// Tagged reference layers are imported from and exported to.
    pub cache: Option<&'a ImageRef>,
    pub platform: &'a str,
}

/// Builds from a build file with an external tool that pushes as part of the build.
pub trait ExternalBuilder: Sync {
    fn build_and_push(&self, args: ExternalBuildArgs) -> Result<()>;

    /// Looks up the digest the tagged reference `image` points at in its registry.
    fn digest(&self, image: &ImageRef) -> Result<String>;
}

#[derive(Debug)]
pub enum DigestError {
    Parse(serde_json::Error),
    NoDescriptors,
    MissingDigest,
}

impl fmt::Display for DigestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DigestError::Parse(error) => write!(f, "unable to parse image manifest: {error}"),
            DigestError::NoDescriptors => f.write_str("image manifest lists no descriptors"),
            DigestError::MissingDigest => {
                f.write_str("first descriptor of the image manifest has no digest")
            }
        }
    }
}

impl std::error::Error for DigestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DigestError::Parse(error) => Some(error),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for DigestError {
    fn from(error: serde_json::Error) -> Self {
        DigestError::Parse(error)
    }
}

/// Returns the first digest, failing when there is none or it is empty.
fn first_digest<I>(digests: I) -> Result<String, DigestError>
where
    I: IntoIterator<Item = Option<String>>,
{
    let digest = digests
        .into_iter()
        .next()
        .ok_or(DigestError::NoDescriptors)?;
    digest
        .filter(|digest| !digest.is_empty())
        .ok_or(DigestError::MissingDigest)
}
