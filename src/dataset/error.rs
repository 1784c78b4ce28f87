use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("Index {index} is out of range for a dataset of {len} samples")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("I/O error while reading {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode image: {path}")]
    Decode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("Directory does not exist: {path}")]
    DirectoryNotFound { path: PathBuf },

    #[error("No valid image/mask pairs found in: {path}")]
    NoValidPairs { path: PathBuf },
}

pub type DatasetResult<T> = Result<T, DatasetError>;

impl DatasetError {
    pub(crate) fn from_io(path: PathBuf, source: std::io::Error) -> Self {
        if source.kind() == std::io::ErrorKind::NotFound {
            DatasetError::FileNotFound { path }
        } else {
            DatasetError::Io { path, source }
        }
    }
}
