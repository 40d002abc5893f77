//! Reading grids, tag tables and configuration from files, and creating the
//! files block records are written to.

use crate::{
    error::{DecompositionError, Result},
    grid::VoxelGrid,
};
use serde::de::DeserializeOwned;
use std::{
    fs::{self, File},
    io::{self, BufWriter},
    path::Path,
};

/// Reads the grid in the text file at the given path. See
/// [`VoxelGrid::parse_slices`] for the format.
///
/// # Errors
/// Returns [`DecompositionError::Io`] if the file can not be read, or
/// [`DecompositionError::GridSyntax`] if its content is not a valid grid.
pub fn read_grid_file(file_path: impl AsRef<Path>) -> Result<VoxelGrid> {
    let text = read_text_file(file_path.as_ref())?;
    VoxelGrid::parse_slices(&text)
}

/// Reads the RON (Rusty Object Notation) file at the given path and
/// deserializes the contents into an object of type `T`.
///
/// # Errors
/// Returns [`DecompositionError::Io`] if the file can not be read, or
/// [`DecompositionError::RonFile`] if it does not hold a valid `T`.
pub fn parse_ron_file<T: DeserializeOwned>(file_path: impl AsRef<Path>) -> Result<T> {
    let file_path = file_path.as_ref();
    let text = read_text_file(file_path)?;
    ron::from_str(&text).map_err(|source| DecompositionError::RonFile {
        path: file_path.to_path_buf(),
        source,
    })
}

/// Creates (or truncates) the file at the given path for writing block
/// records, creating any missing parent directories first.
///
/// # Errors
/// Returns [`DecompositionError::Io`] if a directory or the file can not be
/// created.
pub fn create_record_file(file_path: impl AsRef<Path>) -> Result<BufWriter<File>> {
    let file_path = file_path.as_ref();
    let io_error = |source: io::Error| DecompositionError::Io {
        path: file_path.to_path_buf(),
        source,
    };

    if let Some(parent) = file_path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
    {
        fs::create_dir_all(parent).map_err(io_error)?;
    }
    File::create(file_path).map(BufWriter::new).map_err(io_error)
}

fn read_text_file(file_path: &Path) -> Result<String> {
    fs::read_to_string(file_path).map_err(|source| DecompositionError::Io {
        path: file_path.to_path_buf(),
        source,
    })
}
