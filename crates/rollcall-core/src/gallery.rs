//! Enrolled identities backed by a directory of reference images.
//!
//! Each identity is one image named `<Name>_<Roll>.<ext>` plus a JSON
//! descriptor sidecar `<Name>_<Roll>.json`. Loading always rebuilds the whole
//! gallery; callers swap the returned [`Gallery`] in as one value.

use crate::analyzer::{AnalyzerError, FaceAnalyzer};
use crate::types::{Descriptor, Identity, IdentityKey};
use image::GrayImage;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];
const SIDECAR_EXTENSION: &str = "json";
const ENROLL_EXTENSION: &str = "jpg";

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("identity already enrolled: {0}")]
    DuplicateIdentity(IdentityKey),
    #[error("{0} cannot be empty")]
    EmptyField(&'static str),
    #[error("invalid {field} {value:?}: must not contain '_', path separators, or surrounding spaces")]
    InvalidField { field: &'static str, value: String },
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("image: {0}")]
    Image(#[from] image::ImageError),
    #[error("descriptor sidecar: {0}")]
    Sidecar(#[from] serde_json::Error),
    #[error("analyzer: {0}")]
    Analyzer(#[from] AnalyzerError),
}

/// Immutable snapshot of the enrolled identities, in file-name order.
#[derive(Debug, Clone, Default)]
pub struct Gallery {
    identities: Vec<Identity>,
}

impl Gallery {
    pub fn new(identities: Vec<Identity>) -> Self {
        Self { identities }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.identities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.identities.is_empty()
    }

    pub fn identities(&self) -> &[Identity] {
        &self.identities
    }

    pub fn get(&self, index: usize) -> Option<&Identity> {
        self.identities.get(index)
    }

    pub fn contains(&self, key: &IdentityKey) -> bool {
        self.identities.iter().any(|i| &i.key == key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &IdentityKey> {
        self.identities.iter().map(|i| &i.key)
    }
}

/// Directory-backed store of reference images and descriptors.
pub struct GalleryStore {
    dir: PathBuf,
}

impl GalleryStore {
    /// Open the store, creating its directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, GalleryError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Scan the directory and build a fresh gallery.
    ///
    /// Fails only if the directory itself cannot be read. Individual files
    /// that cannot be decoded or contain no face are skipped with a warning.
    pub fn load(&self, analyzer: &mut dyn FaceAnalyzer) -> Result<Gallery, GalleryError> {
        let mut paths: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && is_image_path(p))
            .collect();
        paths.sort();

        let mut identities = Vec::with_capacity(paths.len());
        let mut seen: HashSet<IdentityKey> = HashSet::new();

        for path in paths {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping file with non UTF-8 name");
                continue;
            };
            let key = IdentityKey::from_file_stem(stem);
            if seen.contains(&key) {
                tracing::warn!(path = %path.display(), identity = %key, "duplicate reference image, skipping");
                continue;
            }

            let descriptor = match self.descriptor_for(&path, analyzer) {
                Ok(Some(d)) => d,
                Ok(None) => {
                    tracing::warn!(path = %path.display(), "no face found in reference image, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to load reference image, skipping");
                    continue;
                }
            };

            seen.insert(key.clone());
            identities.push(Identity {
                key,
                descriptor,
                image_path: path,
            });
        }

        tracing::info!(count = identities.len(), dir = %self.dir.display(), "gallery loaded");
        Ok(Gallery::new(identities))
    }

    /// Validate a requested identity and make sure it is not already enrolled.
    pub fn check_new(&self, gallery: &Gallery, name: &str, roll: &str) -> Result<IdentityKey, GalleryError> {
        let name = validate_field("name", name)?;
        let roll = validate_field("roll", roll)?;
        let key = IdentityKey::new(name, roll);

        let on_disk = IMAGE_EXTENSIONS
            .iter()
            .any(|ext| self.path_for(&key, ext).exists());
        if gallery.contains(&key) || on_disk {
            return Err(GalleryError::DuplicateIdentity(key));
        }
        Ok(key)
    }

    /// Persist a new identity's reference image and descriptor, then reload.
    ///
    /// On any error the store is left without a partial entry and the caller's
    /// gallery is still valid.
    pub fn enroll(
        &self,
        gallery: &Gallery,
        name: &str,
        roll: &str,
        face: &GrayImage,
        descriptor: &Descriptor,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> Result<Gallery, GalleryError> {
        let key = self.check_new(gallery, name, roll)?;
        let image_path = self.path_for(&key, ENROLL_EXTENSION);
        let sidecar_path = self.path_for(&key, SIDECAR_EXTENSION);

        face.save(&image_path)?;
        if let Err(e) = write_sidecar(&sidecar_path, descriptor) {
            let _ = fs::remove_file(&image_path);
            return Err(e);
        }
        tracing::info!(identity = %key, path = %image_path.display(), "identity enrolled");

        self.load(analyzer)
    }

    fn path_for(&self, key: &IdentityKey, ext: &str) -> PathBuf {
        self.dir.join(format!("{}.{ext}", key.file_stem()))
    }

    /// Sidecar descriptor if fresh, otherwise derive one from the image.
    fn descriptor_for(
        &self,
        image_path: &Path,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> Result<Option<Descriptor>, GalleryError> {
        let sidecar_path = image_path.with_extension(SIDECAR_EXTENSION);
        if let Some(descriptor) = read_fresh_sidecar(image_path, &sidecar_path) {
            return Ok(Some(descriptor));
        }

        let image = image::open(image_path)?.to_luma8();
        let faces = analyzer.analyze(image.as_raw(), image.width(), image.height())?;
        let Some(face) = faces.into_iter().next() else {
            return Ok(None);
        };

        if let Err(e) = write_sidecar(&sidecar_path, &face.descriptor) {
            tracing::warn!(path = %sidecar_path.display(), error = %e, "failed to cache descriptor");
        }
        Ok(Some(face.descriptor))
    }
}

fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn validate_field<'a>(field: &'static str, value: &'a str) -> Result<&'a str, GalleryError> {
    if value.trim().is_empty() {
        return Err(GalleryError::EmptyField(field));
    }
    let bad = value.trim() != value
        || value.contains('_')
        || value.contains('/')
        || value.contains('\\')
        || value == "."
        || value == "..";
    if bad {
        return Err(GalleryError::InvalidField {
            field,
            value: value.to_string(),
        });
    }
    Ok(value)
}

/// Read a sidecar that is at least as new as its image and holds a non-empty descriptor.
fn read_fresh_sidecar(image_path: &Path, sidecar_path: &Path) -> Option<Descriptor> {
    let image_mtime = fs::metadata(image_path).and_then(|m| m.modified()).ok()?;
    let sidecar_mtime = fs::metadata(sidecar_path).and_then(|m| m.modified()).ok()?;
    if sidecar_mtime < image_mtime {
        tracing::debug!(path = %sidecar_path.display(), "descriptor sidecar is stale");
        return None;
    }
    let raw = fs::read_to_string(sidecar_path).ok()?;
    match serde_json::from_str::<Descriptor>(&raw) {
        Ok(d) if !d.is_empty() => Some(d),
        Ok(_) => None,
        Err(e) => {
            tracing::warn!(path = %sidecar_path.display(), error = %e, "unreadable descriptor sidecar");
            None
        }
    }
}

fn write_sidecar(path: &Path, descriptor: &Descriptor) -> Result<(), GalleryError> {
    let json = serde_json::to_string(descriptor)?;
    fs::write(path, json)?;
    Ok(())
}
