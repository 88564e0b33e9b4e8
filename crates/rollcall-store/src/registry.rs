//! Face image registry: `<root>/<identity>/<image file>`.

use image::GrayImage;
use rollcall_core::{EmbeddingOracle, Identity, RegistryEntry};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("registry I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not write image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub struct RegistryStore {
    root: PathBuf,
}

impl RegistryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn identity_dir(&self, identity: &Identity) -> PathBuf {
        self.root.join(identity.as_str())
    }

    /// Embed every reference image, one entry per image with a detectable face.
    ///
    /// Identities are visited in name order and files in file-name order, so
    /// the result is the same on every run over the same tree. Unreadable
    /// images, oracle failures and images without a face are skipped.
    pub fn load_all<O>(&self, oracle: &mut O) -> Result<Vec<RegistryEntry>, StoreError>
    where
        O: EmbeddingOracle + ?Sized,
    {
        let mut entries = Vec::new();

        for identity in self.identities()? {
            let files = match self.image_files(&identity) {
                Ok(files) => files,
                Err(e) => {
                    tracing::warn!(%identity, error = %e, "cannot read identity directory; skipping");
                    continue;
                }
            };

            for path in files {
                let image = match image::open(&path) {
                    Ok(img) => img.to_luma8(),
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "unreadable image; skipping");
                        continue;
                    }
                };
                match oracle.detect_faces(&image) {
                    Ok(faces) => match faces.into_iter().next() {
                        Some(face) => {
                            tracing::debug!(%identity, path = %path.display(), "reference face loaded");
                            entries.push(RegistryEntry::new(identity.clone(), face.embedding));
                        }
                        None => {
                            tracing::warn!(%identity, path = %path.display(), "no face found in reference image; skipping");
                        }
                    },
                    Err(e) => {
                        tracing::warn!(path = %path.display(), error = %e, "embedding failed; skipping");
                    }
                }
            }
        }

        tracing::info!(root = %self.root.display(), entries = entries.len(), "registry loaded");
        Ok(entries)
    }

    /// Registered identities, sorted by name. A missing root means none.
    pub fn identities(&self) -> Result<Vec<Identity>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut identities = Vec::new();
        for entry in std::fs::read_dir(&self.root).map_err(io_err(&self.root))? {
            let entry = entry.map_err(io_err(&self.root))?;
            if !entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name();
            match name.to_str().map(Identity::new) {
                Some(Ok(identity)) if identity.as_str() == name.to_str().unwrap_or_default() => {
                    identities.push(identity)
                }
                _ => tracing::warn!(
                    dir = %entry.path().display(),
                    "directory name is not a valid identity; ignoring"
                ),
            }
        }
        identities.sort();
        Ok(identities)
    }

    pub fn contains(&self, identity: &Identity) -> bool {
        self.identity_dir(identity).is_dir()
    }

    /// Regular files under the identity's directory, sorted by file name.
    pub fn image_files(&self, identity: &Identity) -> Result<Vec<PathBuf>, StoreError> {
        let dir = self.identity_dir(identity);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in std::fs::read_dir(&dir).map_err(io_err(&dir))? {
            let path = entry.map_err(io_err(&dir))?.path();
            if path.is_file() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }

    pub fn image_count(&self, identity: &Identity) -> Result<usize, StoreError> {
        Ok(self.image_files(identity)?.len())
    }

    /// Save a captured image as `<n>.png`.
    pub fn add_image(&self, identity: &Identity, image: &GrayImage) -> Result<PathBuf, StoreError> {
        let path = self.next_path(identity, "png")?;
        image.save(&path).map_err(|source| StoreError::Image {
            path: path.clone(),
            source,
        })?;
        tracing::info!(%identity, path = %path.display(), "reference image stored");
        Ok(path)
    }

    /// Copy an existing image file in as `<n>.<ext>`.
    pub fn import_file(&self, identity: &Identity, src: &Path) -> Result<PathBuf, StoreError> {
        let ext = src
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .unwrap_or_else(|| "png".to_string());
        let path = self.next_path(identity, &ext)?;
        std::fs::copy(src, &path).map_err(io_err(src))?;
        tracing::info!(%identity, from = %src.display(), path = %path.display(), "reference image imported");
        Ok(path)
    }

    /// Delete all reference images of `identity`. Returns false if none existed.
    ///
    /// Attendance already recorded for the identity is left untouched.
    pub fn remove(&self, identity: &Identity) -> Result<bool, StoreError> {
        let dir = self.identity_dir(identity);
        if !dir.is_dir() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(io_err(&dir))?;
        tracing::info!(%identity, "identity removed from registry");
        Ok(true)
    }

    /// Next unused `<n>.<ext>` in the identity's directory, creating it.
    fn next_path(&self, identity: &Identity, ext: &str) -> Result<PathBuf, StoreError> {
        let dir = self.identity_dir(identity);
        std::fs::create_dir_all(&dir).map_err(io_err(&dir))?;

        let next = self
            .image_files(identity)?
            .iter()
            .filter_map(|p| p.file_stem()?.to_str()?.parse::<u32>().ok())
            .max()
            .map_or(1, |n| n + 1);
        Ok(dir.join(format!("{next}.{ext}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;
    use rollcall_core::{BoundingBox, DetectedFace, Embedding, OracleError};
    use tempfile::tempdir;

    /// Sees a face unless the top-left pixel is black; embeds the pixel value.
    /// Each reported face also carries a second, weaker face to check "first wins".
    struct PixelOracle {
        calls: usize,
    }

    impl EmbeddingOracle for PixelOracle {
        fn detect_faces(&mut self, image: &GrayImage) -> Result<Vec<DetectedFace>, OracleError> {
            self.calls += 1;
            let v = image.get_pixel(0, 0)[0];
            if v == 0 {
                return Ok(Vec::new());
            }
            let face = |value: f32, confidence: f32| DetectedFace {
                bbox: BoundingBox {
                    x: 0.0,
                    y: 0.0,
                    width: 1.0,
                    height: 1.0,
                    confidence,
                    landmarks: None,
                },
                embedding: Embedding::new(vec![value]),
            };
            Ok(vec![face(v as f32, 0.9), face(-1.0, 0.6)])
        }
    }

    fn id(name: &str) -> Identity {
        Identity::new(name).unwrap()
    }

    fn write_png(path: &Path, value: u8) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        GrayImage::from_pixel(4, 4, Luma([value])).save(path).unwrap();
    }

    #[test]
    fn test_load_skips_faceless_image() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("alice/1.png"), 0);
        write_png(&dir.path().join("alice/2.png"), 77);

        let store = RegistryStore::new(dir.path());
        let mut oracle = PixelOracle { calls: 0 };
        let entries = store.load_all(&mut oracle).unwrap();

        assert_eq!(oracle.calls, 2);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].identity.as_str(), "alice");
        assert_eq!(entries[0].embedding.values, vec![77.0]);
    }

    #[test]
    fn test_load_order_is_deterministic() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("zoe/b.png"), 3);
        write_png(&dir.path().join("bob/2.png"), 2);
        write_png(&dir.path().join("zoe/a.png"), 4);
        write_png(&dir.path().join("bob/1.png"), 1);

        let store = RegistryStore::new(dir.path());
        let entries = store.load_all(&mut PixelOracle { calls: 0 }).unwrap();
        let seen: Vec<(String, f32)> = entries
            .iter()
            .map(|e| (e.identity.to_string(), e.embedding.values[0]))
            .collect();
        assert_eq!(
            seen,
            vec![
                ("bob".to_string(), 1.0),
                ("bob".to_string(), 2.0),
                ("zoe".to_string(), 4.0),
                ("zoe".to_string(), 3.0),
            ]
        );
    }

    #[test]
    fn test_load_skips_unreadable_files_and_loose_files() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("carol/1.png"), 9);
        std::fs::write(dir.path().join("carol/notes.txt"), "not an image").unwrap();
        std::fs::write(dir.path().join("stray.png"), "top-level file").unwrap();

        let store = RegistryStore::new(dir.path());
        let entries = store.load_all(&mut PixelOracle { calls: 0 }).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_missing_root_is_empty() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path().join("nope"));
        assert!(store.load_all(&mut PixelOracle { calls: 0 }).unwrap().is_empty());
        assert!(store.identities().unwrap().is_empty());
    }

    #[test]
    fn test_add_image_numbers_files() {
        let dir = tempdir().unwrap();
        let store = RegistryStore::new(dir.path());
        let dan = id("dan");
        let img = GrayImage::from_pixel(4, 4, Luma([50]));

        let first = store.add_image(&dan, &img).unwrap();
        let second = store.add_image(&dan, &img).unwrap();
        assert_eq!(first.file_name().unwrap(), "1.png");
        assert_eq!(second.file_name().unwrap(), "2.png");
        assert_eq!(store.image_count(&dan).unwrap(), 2);
        assert_eq!(store.identities().unwrap(), vec![dan]);
    }

    #[test]
    fn test_import_file_keeps_extension() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("photo.PNG");
        write_png(&src, 10);

        let store = RegistryStore::new(dir.path().join("images"));
        let stored = store.import_file(&id("eve"), &src).unwrap();
        assert_eq!(stored.file_name().unwrap(), "1.png");
        assert!(stored.exists());
    }

    #[test]
    fn test_remove_identity() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("frank/1.png"), 5);
        let store = RegistryStore::new(dir.path());
        let frank = id("frank");

        assert!(store.contains(&frank));
        assert!(store.remove(&frank).unwrap());
        assert!(!store.contains(&frank));
        assert!(!store.remove(&frank).unwrap());
    }

    #[test]
    fn test_identities_ignore_invalid_directory_names() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a,b")).unwrap();
        std::fs::create_dir_all(dir.path().join(" padded")).unwrap();
        std::fs::create_dir_all(dir.path().join("gina")).unwrap();

        let store = RegistryStore::new(dir.path());
        assert_eq!(store.identities().unwrap(), vec![id("gina")]);
    }
}
