//! Packaged function artifacts.
//!
//! An artifact is identified by a content hash over the source directory;
//! the function resource is recreated whenever the hash changes. The hash
//! walks files in sorted relative-path order so that packaging the same
//! tree twice always yields the same identity.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A packaged function source tree plus its content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    pub source_dir: PathBuf,
    pub content_hash: String,
}

impl Artifact {
    /// Packages the source directory, computing its content hash.
    pub fn package(source_dir: &Path) -> Result<Self> {
        let mut files = Vec::new();
        collect_files(source_dir, source_dir, &mut files)
            .with_context(|| format!("walking artifact source {}", source_dir.display()))?;
        files.sort();

        let mut hasher = Sha256::new();
        for relative in &files {
            let contents = fs::read(source_dir.join(relative))
                .with_context(|| format!("reading artifact file {}", relative.display()))?;
            hasher.update(relative.to_string_lossy().as_bytes());
            hasher.update([0u8]);
            hasher.update(&contents);
        }

        Ok(Self {
            source_dir: source_dir.to_path_buf(),
            content_hash: hex::encode(hasher.finalize()),
        })
    }
}

fn collect_files(root: &Path, dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_files(root, &path, out)?;
        } else {
            let relative = path
                .strip_prefix(root)
                .expect("walked path is under its root")
                .to_path_buf();
            out.push(relative);
        }
    }
    Ok(())
}
