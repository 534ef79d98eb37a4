use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use listado_core::SearchRequest;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("output directory missing or not writable: {0}")]
    OutputDir(String),
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Writes a header plus rows to a tabular file. The trait exists so tests
/// can capture what would be written without touching the filesystem.
pub trait SpreadsheetWriter: Send + Sync {
    fn write(
        &self,
        path: &Path,
        columns: &[&str],
        rows: &[Vec<String>],
    ) -> Result<PathBuf, ExportError>;
}

/// RFC 4180 CSV output, written atomically: a temp file in the target
/// directory, renamed into place once complete. An interrupted export never
/// leaves a half-written file at the target path.
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvWriter;

impl SpreadsheetWriter for CsvWriter {
    fn write(
        &self,
        path: &Path,
        columns: &[&str],
        rows: &[Vec<String>],
    ) -> Result<PathBuf, ExportError> {
        let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
        let dir = dir.map(Path::to_path_buf).unwrap_or_else(|| ".".into());
        ensure_output_dir(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        write_record(&mut tmp, columns.iter().copied())?;
        for row in rows {
            write_record(&mut tmp, row.iter().map(String::as_str))?;
        }
        tmp.flush()?;
        tmp.as_file_mut().sync_all()?;

        if path.exists() {
            fs::remove_file(path)?;
        }
        tmp.persist(path).map_err(|e| ExportError::Io(e.error))?;
        Ok(path.to_path_buf())
    }
}

/// Ensure output directory exists; create if missing.
pub fn ensure_output_dir(dir: &Path) -> Result<(), ExportError> {
    if dir.exists() {
        let meta = fs::metadata(dir).map_err(|e| ExportError::OutputDir(e.to_string()))?;
        if !meta.is_dir() {
            return Err(ExportError::OutputDir("path is not a directory".into()));
        }
    } else {
        fs::create_dir_all(dir).map_err(|e| ExportError::OutputDir(e.to_string()))?;
    }
    // Basic writability probe: try creating a temp file.
    NamedTempFile::new_in(dir).map_err(|e| ExportError::OutputDir(e.to_string()))?;
    Ok(())
}

/// Deterministic export path for a search:
/// `exports/listado_{country}_{slug}_{short_hash}.csv`. The hash covers the
/// full query so two searches with the same truncated slug never collide.
pub fn default_export_path(request: &SearchRequest) -> PathBuf {
    let query = request.query();
    let slug = sanitize_slug(&query);
    let hash = short_hash(&format!("{}|{query}", request.country.code()));
    PathBuf::from("exports").join(format!(
        "listado_{}_{slug}_{hash}.csv",
        request.country.code()
    ))
}

fn sanitize_slug(input: &str) -> String {
    let mut slug = String::with_capacity(input.len());
    let mut prev_dash = false;
    for c in input.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            prev_dash = false;
        } else if !prev_dash && !slug.is_empty() {
            slug.push('-');
            prev_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    if slug.is_empty() {
        slug.push_str("busqueda");
    }
    if slug.len() > 40 {
        slug.truncate(40);
    }
    slug
}

fn short_hash(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    let digest = hasher.finalize();
    let mut hex = String::with_capacity(8);
    for byte in digest.iter().take(4) {
        use std::fmt::Write;
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn write_record<'a, W, I>(out: &mut W, fields: I) -> io::Result<()>
where
    W: Write,
    I: Iterator<Item = &'a str>,
{
    let mut first = true;
    for field in fields {
        if !first {
            out.write_all(b",")?;
        }
        first = false;
        if needs_quoting(field) {
            out.write_all(b"\"")?;
            out.write_all(field.replace('"', "\"\"").as_bytes())?;
            out.write_all(b"\"")?;
        } else {
            out.write_all(field.as_bytes())?;
        }
    }
    out.write_all(b"\r\n")
}

fn needs_quoting(field: &str) -> bool {
    field.contains([',', '"', '\r', '\n'])
}
