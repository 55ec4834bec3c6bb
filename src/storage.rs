use chrono::{DateTime, Utc};
use ndarray::Array2;
use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::period::STAMP_FORMAT;

/// Errors from the raw field storage collaborator.
#[derive(Error, Debug)]
pub enum FieldError {
    #[error("field not found: {param} level {level} at {stamp}")]
    Missing {
        param: String,
        level: i64,
        stamp: DateTime<Utc>,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid npy file {path}: {reason}")]
    InvalidNpy { path: PathBuf, reason: String },
}

/// Capability consumed by the sample assembler: resolve one raw 2-D
/// field of native grid shape for a (parameter, level, timestamp) key.
/// Implementations must be shareable read-only across worker threads.
pub trait FieldSource: Send + Sync {
    fn load_field(
        &self,
        param: &str,
        level: i64,
        stamp: DateTime<Utc>,
    ) -> Result<Array2<f32>, FieldError>;

    /// Probe for presence without loading the data.
    fn exists(&self, param: &str, level: i64, stamp: DateTime<Utc>) -> bool;
}

/// In-memory field source for tests and demos.
#[derive(Debug, Default)]
pub struct MemFieldSource {
    fields: HashMap<(String, i64, DateTime<Utc>), Array2<f32>>,
}

impl MemFieldSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, param: &str, level: i64, stamp: DateTime<Utc>, field: Array2<f32>) {
        self.fields.insert((param.to_string(), level, stamp), field);
    }
}

impl FieldSource for MemFieldSource {
    fn load_field(
        &self,
        param: &str,
        level: i64,
        stamp: DateTime<Utc>,
    ) -> Result<Array2<f32>, FieldError> {
        self.fields
            .get(&(param.to_string(), level, stamp))
            .cloned()
            .ok_or_else(|| FieldError::Missing {
                param: param.to_string(),
                level,
                stamp,
            })
    }

    fn exists(&self, param: &str, level: i64, stamp: DateTime<Utc>) -> bool {
        self.fields.contains_key(&(param.to_string(), level, stamp))
    }
}

/// Directory-backed field source: one `.npy` file per (parameter, level,
/// timestamp), named `<param>_<level>_<YYYYMMDDHH>.npy`, little-endian
/// f32, C order, native grid shape.
#[derive(Debug, Clone)]
pub struct NpyDirSource {
    root: PathBuf,
}

impl NpyDirSource {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn field_path(&self, param: &str, level: i64, stamp: DateTime<Utc>) -> PathBuf {
        self.root
            .join(format!("{param}_{level}_{}.npy", stamp.format(STAMP_FORMAT)))
    }

    /// Write a field to disk in the layout `load_field` expects. Used by
    /// ingestion tooling and tests.
    pub fn write_field(
        &self,
        param: &str,
        level: i64,
        stamp: DateTime<Utc>,
        field: &Array2<f32>,
    ) -> Result<(), FieldError> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.field_path(param, level, stamp);
        let file = File::create(path)?;
        let mut w = BufWriter::new(file);
        write_npy(&mut w, field)?;
        w.flush()?;
        Ok(())
    }
}

impl FieldSource for NpyDirSource {
    fn load_field(
        &self,
        param: &str,
        level: i64,
        stamp: DateTime<Utc>,
    ) -> Result<Array2<f32>, FieldError> {
        let path = self.field_path(param, level, stamp);
        if !path.exists() {
            return Err(FieldError::Missing {
                param: param.to_string(),
                level,
                stamp,
            });
        }
        let file = File::open(&path)?;
        let mut r = BufReader::new(file);
        read_npy(&mut r, &path)
    }

    fn exists(&self, param: &str, level: i64, stamp: DateTime<Utc>) -> bool {
        self.field_path(param, level, stamp).exists()
    }
}

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

fn write_npy<W: Write>(w: &mut W, field: &Array2<f32>) -> Result<(), FieldError> {
    let (rows, cols) = field.dim();
    let mut header = format!(
        "{{'descr': '<f4', 'fortran_order': False, 'shape': ({rows}, {cols}), }}"
    );
    // Pad so that magic + version + length + header is a multiple of 64,
    // terminated by a newline, per the npy version 1.0 format.
    let unpadded = NPY_MAGIC.len() + 2 + 2 + header.len() + 1;
    let padding = (64 - unpadded % 64) % 64;
    header.extend(std::iter::repeat(' ').take(padding));
    header.push('\n');

    w.write_all(NPY_MAGIC)?;
    w.write_all(&[1u8, 0u8])?;
    w.write_all(&(header.len() as u16).to_le_bytes())?;
    w.write_all(header.as_bytes())?;
    for &v in field.iter() {
        w.write_all(&v.to_le_bytes())?;
    }
    Ok(())
}

fn read_npy<R: Read>(r: &mut R, path: &Path) -> Result<Array2<f32>, FieldError> {
    let invalid = |reason: &str| FieldError::InvalidNpy {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    };

    let mut magic = [0u8; 6];
    r.read_exact(&mut magic)?;
    if &magic != NPY_MAGIC {
        return Err(invalid("bad magic"));
    }
    let mut version = [0u8; 2];
    r.read_exact(&mut version)?;
    if version[0] != 1 {
        return Err(invalid("unsupported npy version"));
    }
    let mut len_bytes = [0u8; 2];
    r.read_exact(&mut len_bytes)?;
    let header_len = u16::from_le_bytes(len_bytes) as usize;
    let mut header = vec![0u8; header_len];
    r.read_exact(&mut header)?;
    let header = String::from_utf8(header).map_err(|_| invalid("header is not UTF-8"))?;

    if !header.contains("'descr': '<f4'") {
        return Err(invalid("dtype must be little-endian f32 ('<f4')"));
    }
    if !header.contains("'fortran_order': False") {
        return Err(invalid("fortran-order arrays are not supported"));
    }
    let (rows, cols) = parse_shape(&header).ok_or_else(|| invalid("malformed shape"))?;

    let mut data = vec![0u8; rows * cols * 4];
    r.read_exact(&mut data)?;
    let values: Vec<f32> = data
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect();
    Array2::from_shape_vec((rows, cols), values).map_err(|_| invalid("shape/data mismatch"))
}

fn parse_shape(header: &str) -> Option<(usize, usize)> {
    let start = header.find("'shape':")?;
    let rest = &header[start..];
    let open = rest.find('(')?;
    let close = rest.find(')')?;
    let dims: Vec<usize> = rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse().ok())
        .collect::<Option<Vec<_>>>()?;
    match dims[..] {
        [rows, cols] => Some((rows, cols)),
        _ => None,
    }
}
