//! Layer matrix persistence
//!
//! Each layer matrix is written as a 2-D little-endian f32 `.npy` file named
//! `{model}_Layer{index}_{tag}.npy`. A layer is written to a temporary file
//! in the output directory and renamed into place once complete, so a failure
//! on layer `n` never leaves a truncated file behind or touches layers `< n`.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};
use ndarray::Array2;
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use serde::{Deserialize, Serialize};

use crate::error::{ExtractError, Result};
use crate::neural::registry::file_stem_name;

/// How the output directory path is used
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputPathMode {
    /// Use the path exactly as configured
    #[default]
    AsGiven,
    /// Canonicalise to an absolute path before writing
    Absolute,
}

/// Output file name for one layer
pub fn layer_file_name(model: &str, layer: usize, tag: &str) -> String {
    format!("{}_Layer{}_{}.npy", file_stem_name(model), layer, tag)
}

/// Name of the scratch file used to test the output directory
const WRITE_CHECK_FILE: &str = ".layerfeat-write-check.partial";

/// Resolve the output directory, checking that it exists and is writable
pub fn prepare_output_dir(dir: &Path, mode: OutputPathMode, create: bool) -> Result<PathBuf> {
    if !dir.is_dir() {
        if !create {
            return Err(ExtractError::OutputDirMissing {
                path: dir.display().to_string(),
            });
        }
        fs::create_dir_all(dir)?;
        info!("Created output directory {}", dir.display());
    }

    let resolved = match mode {
        OutputPathMode::AsGiven => dir.to_path_buf(),
        OutputPathMode::Absolute => dir.canonicalize()?,
    };
    check_writable(&resolved)?;
    Ok(resolved)
}

/// Create and remove a scratch file in `dir`
fn check_writable(dir: &Path) -> Result<()> {
    let path = dir.join(WRITE_CHECK_FILE);
    File::create(&path)
        .and_then(|_| fs::remove_file(&path))
        .map_err(|e| ExtractError::Storage {
            path: dir.display().to_string(),
            reason: format!("output directory is not writable: {e}"),
        })?;
    debug!("Output directory {} is writable", dir.display());
    Ok(())
}

/// Write one `.npy` file per layer, in layer order
///
/// Returns the written paths. Stops at the first failure; files written
/// before it stay intact.
pub fn write_layers(
    dir: &Path,
    model: &str,
    tag: &str,
    layers: &[Array2<f32>],
) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ExtractError::OutputDirMissing {
            path: dir.display().to_string(),
        });
    }

    let mut written = Vec::with_capacity(layers.len());
    for (index, matrix) in layers.iter().enumerate() {
        let path = dir.join(layer_file_name(model, index, tag));
        write_layer(&path, matrix)?;
        debug!("Wrote layer {} {:?} to {}", index, matrix.dim(), path.display());
        written.push(path);
    }

    info!("Wrote {} layer files to {}", written.len(), dir.display());
    Ok(written)
}

/// Write a single matrix atomically
pub fn write_layer(path: &Path, matrix: &Array2<f32>) -> Result<()> {
    let storage_err = |reason: String| ExtractError::Storage {
        path: path.display().to_string(),
        reason,
    };

    let file_name = path
        .file_name()
        .ok_or_else(|| storage_err("path has no file name".to_string()))?;
    let mut tmp_name = file_name.to_os_string();
    tmp_name.push(".partial");
    let tmp_path = path.with_file_name(tmp_name);

    let result = (|| -> Result<()> {
        let mut writer = BufWriter::new(File::create(&tmp_path)?);
        // .npy requires a standard-layout array
        matrix
            .as_standard_layout()
            .write_npy(&mut writer)
            .map_err(|e| storage_err(e.to_string()))?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
        Ok(())
    })();

    match result {
        Ok(()) => {
            fs::rename(&tmp_path, path)?;
            Ok(())
        }
        Err(e) => {
            let _ = fs::remove_file(&tmp_path);
            Err(e)
        }
    }
}

/// Read a layer matrix back
pub fn read_layer(path: &Path) -> Result<Array2<f32>> {
    let file = File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => ExtractError::FileNotFound {
            path: path.display().to_string(),
            source: Some(e),
        },
        _ => ExtractError::Io(e),
    })?;

    Array2::<f32>::read_npy(BufReader::new(file)).map_err(|e| ExtractError::Storage {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}
