use std::{
    collections::HashMap,
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
};

use log::debug;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::unit::RenamingRecord;

pub const DEFAULT_MANIFEST_DIR: &str = ".shipit";

/// Maps the stable names deployment manifests use to the images last published for them.
///
/// Entries keep their position when their image changes and new names are appended, so that
/// the file diffs well between releases.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub old_image: String,
    pub new_image: String,
}

#[derive(Debug)]
pub enum ManifestError {
    Read { path: PathBuf, source: io::Error },
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    Serialize(serde_yaml::Error),
    Write { path: PathBuf, source: io::Error },
}

impl fmt::Display for ManifestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestError::Read { path, source } => {
                write!(f, "failed reading manifest {}: {source}", path.display())
            }
            ManifestError::Parse { path, source } => {
                write!(f, "failed parsing manifest {}: {source}", path.display())
            }
            ManifestError::Serialize(source) => write!(f, "failed serializing manifest: {source}"),
            ManifestError::Write { path, source } => {
                write!(f, "failed writing manifest {}: {source}", path.display())
            }
        }
    }
}

impl std::error::Error for ManifestError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ManifestError::Read { source, .. } | ManifestError::Write { source, .. } => {
                Some(source)
            }
            ManifestError::Parse { source, .. } | ManifestError::Serialize(source) => Some(source),
        }
    }
}

impl Manifest {
    /// The manifest of `namespace` below `dir`.
    pub fn path(dir: &Path, namespace: &str) -> PathBuf {
        dir.join(format!("{namespace}.yaml"))
    }

    /// Reads the manifest at `path`. A file that does not exist yet or is empty is an empty
    /// manifest.
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let contents = match fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                debug!("no manifest at {}, starting empty", path.display());
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ManifestError::Read {
                    path: path.to_owned(),
                    source,
                })
            }
        };
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }

        let manifest: Option<Self> =
            serde_yaml::from_str(&contents).map_err(|source| ManifestError::Parse {
                path: path.to_owned(),
                source,
            })?;
        let mut manifest = manifest.unwrap_or_default();
        manifest.collapse_duplicates();
        Ok(manifest)
    }

    /// Hand edits can leave a name listed twice. The first position wins, holding the last
    /// image listed for the name.
    fn collapse_duplicates(&mut self) {
        let mut index_of: HashMap<String, usize> = HashMap::with_capacity(self.images.len());
        let mut collapsed: Vec<ImageEntry> = Vec::with_capacity(self.images.len());
        for entry in self.images.drain(..) {
            match index_of.get(&entry.old_image) {
                Some(&index) => collapsed[index].new_image = entry.new_image,
                None => {
                    index_of.insert(entry.old_image.clone(), collapsed.len());
                    collapsed.push(entry);
                }
            }
        }
        self.images = collapsed;
    }

    /// Merges `records` into the manifest and returns how many entries changed.
    ///
    /// Known names are updated in place, unknown names appended in the order given. Applying
    /// the same records again changes nothing.
    pub fn reconcile<I>(&mut self, records: I) -> usize
    where
        I: IntoIterator<Item = RenamingRecord>,
    {
        let mut changed = 0;
        for record in records {
            match self
                .images
                .iter_mut()
                .find(|entry| entry.old_image == record.old_reference)
            {
                Some(entry) => {
                    if entry.new_image != record.new_reference {
                        entry.new_image = record.new_reference;
                        changed += 1;
                    }
                }
                None => {
                    self.images.push(ImageEntry {
                        old_image: record.old_reference,
                        new_image: record.new_reference,
                    });
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Replaces the file at `path` with this manifest. The file is either fully replaced or
    /// left as it was.
    pub fn persist(&self, path: &Path) -> Result<(), ManifestError> {
        let yaml = serde_yaml::to_string(self).map_err(ManifestError::Serialize)?;
        let write_error = |source: io::Error| ManifestError::Write {
            path: path.to_owned(),
            source,
        };

        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent).map_err(write_error)?;

        // Written next to the target so the rename stays on one file system. The temporary file
        // is removed when anything before the rename fails.
        let mut tmp = NamedTempFile::new_in(parent).map_err(write_error)?;
        tmp.write_all(yaml.as_bytes()).map_err(write_error)?;
        tmp.persist(path).map_err(|error| write_error(error.error))?;
        debug!("wrote {} images to {}", self.images.len(), path.display());
        Ok(())
    }

    #[cfg(test)]
    pub fn get(&self, old_image: &str) -> Option<&str> {
        self.images
            .iter()
            .find(|entry| entry.old_image == old_image)
            .map(|entry| entry.new_image.as_str())
    }

    pub fn entries(&self) -> &[ImageEntry] {
        &self.images
    }
}
