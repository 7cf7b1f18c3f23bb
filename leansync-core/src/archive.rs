//! Zip packaging of converted files.

use crate::error::PersistenceError;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// Package `csv_path` as `{ticker-lowercase}.zip` in the same directory.
///
/// The archive holds one deflated entry named `{ticker-lowercase}.csv`. The
/// source file stays in place and an existing archive is replaced.
pub fn archive(csv_path: &Path, ticker: &str) -> Result<PathBuf, PersistenceError> {
    let lower = ticker.to_lowercase();
    let dir = csv_path.parent().unwrap_or_else(|| Path::new("."));
    let zip_path = dir.join(format!("{lower}.zip"));
    let tmp_path = zip_path.with_extension("zip.tmp");

    if let Err(e) = write_archive(csv_path, &tmp_path, &format!("{lower}.csv")) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e);
    }
    fs::rename(&tmp_path, &zip_path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        PersistenceError::io(&zip_path, e)
    })?;

    debug!(ticker, path = %zip_path.display(), "wrote archive");
    Ok(zip_path)
}

fn write_archive(source: &Path, target: &Path, entry_name: &str) -> Result<(), PersistenceError> {
    let input = File::open(source).map_err(|e| PersistenceError::io(source, e))?;
    let output = File::create(target).map_err(|e| PersistenceError::io(target, e))?;

    let mut zip = ZipWriter::new(BufWriter::new(output));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(entry_name, options)
        .map_err(|e| PersistenceError::archive(target, e))?;
    io::copy(&mut BufReader::new(input), &mut zip).map_err(|e| PersistenceError::io(source, e))?;
    let mut out = zip.finish().map_err(|e| PersistenceError::archive(target, e))?;
    out.flush().map_err(|e| PersistenceError::io(target, e))
}
