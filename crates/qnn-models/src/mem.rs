//! `$readmemh`-style hex text files.
//!
//! One value per line. Blank lines and `//` comment lines are skipped, which
//! is what the hardware test bench loader accepts. Every other line must hold
//! exactly the digit count of its width; anything else is a format error
//! carrying the file path and the 1-based line number.

use crate::codec::{FixedWidthCodec, Width};
use crate::error::{QnnModelError, Result};
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

fn open(path: &Path) -> Result<BufReader<File>> {
    if !path.exists() {
        return Err(QnnModelError::FileNotFound {
            path: path.to_path_buf(),
        });
    }
    Ok(BufReader::new(File::open(path)?))
}

/// Non-blank, non-comment lines with their 1-based line numbers
fn value_lines(path: &Path) -> Result<Vec<(usize, String)>> {
    let mut out = Vec::new();
    for (i, line) in open(path)?.lines().enumerate() {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }
        out.push((i + 1, trimmed.to_string()));
    }
    Ok(out)
}

/// Read every value of a `.mem` file at `width`.
///
/// # Errors
///
/// Returns `FileNotFound`, `Io`, or `Format` with the offending line.
pub fn read_mem(path: impl AsRef<Path>, width: Width) -> Result<Vec<i32>> {
    let path = path.as_ref();
    let codec = FixedWidthCodec::new(width);
    let values = value_lines(path)?
        .into_iter()
        .map(|(line, text)| {
            codec
                .parse_hex(&text)
                .map_err(|e| QnnModelError::format(path, line, e.to_string()))
        })
        .collect::<Result<Vec<_>>>()?;
    tracing::debug!("Read {} {width} values from {}", values.len(), path.display());
    Ok(values)
}

/// Read a file of single hex nibbles (labels, predictions).
///
/// # Errors
///
/// Returns `Format` for any line that is not one hex digit.
pub fn read_nibbles(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    value_lines(path)?
        .into_iter()
        .map(|(line, text)| {
            let digit = match text.as_bytes() {
                [b] if b.is_ascii_hexdigit() => char::from(*b).to_digit(16),
                _ => None,
            };
            digit
                .and_then(|d| u8::try_from(d).ok())
                .ok_or_else(|| {
                    QnnModelError::format(path, line, format!("expected one hex digit, got '{text}'"))
                })
        })
        .collect()
}

/// Write `values` one per line at `width`.
///
/// # Errors
///
/// Returns `OutOfRange` for values that do not fit, or `Io`.
pub fn write_values<W: Write>(out: &mut W, values: &[i32], width: Width) -> Result<()> {
    let codec = FixedWidthCodec::new(width);
    for &v in values {
        writeln!(out, "{}", codec.to_hex(v)?)?;
    }
    Ok(())
}

/// Write `values` to a new `.mem` file at `path`.
///
/// # Errors
///
/// Returns `OutOfRange` for values that do not fit, or `Io`.
pub fn write_mem(path: impl AsRef<Path>, values: &[i32], width: Width) -> Result<()> {
    let mut out = BufWriter::new(File::create(path)?);
    write_values(&mut out, values, width)?;
    out.flush()?;
    Ok(())
}

/// Result of one `.mem` → `.bin` conversion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemConversion {
    /// Source file
    pub source: PathBuf,
    /// Written binary file
    pub target: PathBuf,
    /// Detected width
    pub width: Width,
    /// Values converted
    pub values: usize,
    /// Bytes written
    pub bytes: usize,
}

/// Detect the value width of a `.mem` file from its first value line.
///
/// # Errors
///
/// Returns `Format` if the file is empty or the first value is neither 2 nor
/// 8 digits wide.
pub fn detect_width(path: impl AsRef<Path>) -> Result<Width> {
    let path = path.as_ref();
    let lines = value_lines(path)?;
    let (line, text) = lines
        .first()
        .ok_or_else(|| QnnModelError::format(path, 1, "no values"))?;
    Width::from_hex_digits(text.len()).ok_or_else(|| {
        QnnModelError::format(
            path,
            *line,
            format!("{} hex digits is neither int8 nor int32", text.len()),
        )
    })
}

/// Convert a `.mem` file to packed little-endian binary, auto-detecting the
/// width (2 digits → 1 byte, 8 digits → 4 bytes per value).
///
/// # Errors
///
/// Returns `Format` for undetectable or inconsistent files, or `Io`.
pub fn mem_to_bin(source: impl AsRef<Path>, target: impl AsRef<Path>) -> Result<MemConversion> {
    let (source, target) = (source.as_ref(), target.as_ref());
    let width = detect_width(source)?;
    let values = read_mem(source, width)?;
    let codec = FixedWidthCodec::new(width);
    let mut bytes = Vec::with_capacity(values.len() * width.byte_len());
    for &v in &values {
        codec.write_le(v, &mut bytes)?;
    }
    fs::write(target, &bytes)?;
    tracing::info!(
        "{} -> {} ({} x {width}, {} bytes)",
        source.display(),
        target.display(),
        values.len(),
        bytes.len()
    );
    Ok(MemConversion {
        source: source.to_path_buf(),
        target: target.to_path_buf(),
        width,
        values: values.len(),
        bytes: bytes.len(),
    })
}

/// Convert every `*.mem` file in `input_dir` into `output_dir`, in name order.
///
/// Files whose width cannot be detected are skipped with a warning; other
/// errors stop the conversion.
///
/// # Errors
///
/// Returns `Io` if a directory cannot be read or created, or the first
/// conversion error that is not a width-detection failure.
pub fn convert_dir(input_dir: impl AsRef<Path>, output_dir: impl AsRef<Path>) -> Result<Vec<MemConversion>> {
    let (input_dir, output_dir) = (input_dir.as_ref(), output_dir.as_ref());
    fs::create_dir_all(output_dir)?;
    let mut sources: Vec<PathBuf> = fs::read_dir(input_dir)?
        .filter_map(std::result::Result::ok)
        .map(|e| e.path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "mem"))
        .collect();
    sources.sort();

    let mut done = Vec::with_capacity(sources.len());
    for source in sources {
        if let Err(e) = detect_width(&source) {
            tracing::warn!("Skipping {}: {e}", source.display());
            continue;
        }
        let target = output_dir.join(source.with_extension("bin").file_name().unwrap_or_default());
        done.push(mem_to_bin(&source, target)?);
    }
    Ok(done)
}
