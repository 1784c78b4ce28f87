use std::path::Path;

use derive_new::new;
use tracing::{info, warn};

use super::error::{DatasetError, DatasetResult};

pub const SUPPORTED_FILES: [&str; 6] = ["bmp", "jpg", "jpeg", "png", "tif", "tiff"];

/// File names of one image and its mask, relative to their directories.
#[derive(new, Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub image: String,
    pub mask: String,
}

/// Ordered table of image/mask file name pairs.
///
/// Row order is fixed at construction; shuffling is left to the data loader.
#[derive(Clone, Debug, Default)]
pub struct Manifest {
    entries: Vec<ManifestEntry>,
}

impl Manifest {
    pub fn new(entries: Vec<ManifestEntry>) -> Self {
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&ManifestEntry> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> &[ManifestEntry] {
        &self.entries
    }

    /// Pairs every image in `image_dir` with the mask in `mask_dir` sharing its
    /// file stem. Rows are sorted by image file name.
    ///
    /// Images without a mask are skipped.
    pub fn scan<P: AsRef<Path>>(image_dir: P, mask_dir: P) -> DatasetResult<Self> {
        let image_dir = image_dir.as_ref();
        let mask_dir = mask_dir.as_ref();

        for dir in [image_dir, mask_dir] {
            if !dir.is_dir() {
                return Err(DatasetError::DirectoryNotFound {
                    path: dir.to_path_buf(),
                });
            }
        }

        let read_dir =
            std::fs::read_dir(image_dir).map_err(|e| DatasetError::from_io(image_dir.into(), e))?;

        let mut entries = Vec::new();
        for entry in read_dir {
            let path = entry
                .map_err(|e| DatasetError::from_io(image_dir.into(), e))?
                .path();

            if !path.is_file() || !has_supported_extension(&path) {
                continue;
            }

            let (Some(file_name), Some(stem)) = (
                path.file_name().and_then(|name| name.to_str()),
                path.file_stem().and_then(|stem| stem.to_str()),
            ) else {
                warn!("Skipping non UTF-8 file name: {}", path.display());
                continue;
            };

            let mask = SUPPORTED_FILES
                .iter()
                .map(|ext| format!("{stem}.{ext}"))
                .find(|candidate| mask_dir.join(candidate).is_file());

            match mask {
                Some(mask) => entries.push(ManifestEntry::new(file_name.to_string(), mask)),
                None => warn!("No mask found for image {}", path.display()),
            }
        }

        if entries.is_empty() {
            return Err(DatasetError::NoValidPairs {
                path: image_dir.to_path_buf(),
            });
        }

        entries.sort_by(|a, b| a.image.cmp(&b.image));

        info!(
            "Found {} image/mask pairs in {}",
            entries.len(),
            image_dir.display()
        );

        Ok(Self::new(entries))
    }
}

impl FromIterator<ManifestEntry> for Manifest {
    fn from_iter<I: IntoIterator<Item = ManifestEntry>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

fn has_supported_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            SUPPORTED_FILES
                .iter()
                .any(|valid_ext| valid_ext.eq_ignore_ascii_case(ext))
        })
}
