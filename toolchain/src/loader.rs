// loader.rs — Numeric data loader
//
// Reads a JSON array literal of arbitrary nesting (rectangular or ragged)
// and flattens it depth-first into one f64 sequence.
//
// Preconditions: source is UTF-8 JSON.
// Postconditions: `NumericBuffer::len()` equals the number of numeric leaves;
//                 leaves keep their order at every nesting level.
// Failure modes: unreadable file, invalid JSON, non-numeric leaf.
// Side effects: one file read in `load`.

use std::fmt;
use std::path::{Path, PathBuf};

use serde_json::Value;

use crate::diag::{codes, DiagCode};
use crate::files::{self, FileError};

/// Flattened numeric data, in source order.
#[derive(Debug, Clone, PartialEq)]
pub struct NumericBuffer {
    values: Vec<f64>,
}

impl NumericBuffer {
    pub fn from_values(values: Vec<f64>) -> Self {
        NumericBuffer { values }
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug)]
pub enum LoadError {
    File(FileError),
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    /// A leaf that is neither a number nor an array.
    Malformed {
        path: PathBuf,
        /// JSON pointer to the leaf, e.g. `/1/0`.
        pointer: String,
        value: String,
    },
}

impl LoadError {
    pub fn code(&self) -> DiagCode {
        match self {
            LoadError::File(_) => codes::E0002,
            LoadError::Json { .. } => codes::E0202,
            LoadError::Malformed { .. } => codes::E0201,
        }
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadError::File(e) => write!(f, "{}", e),
            LoadError::Json { path, source } => {
                write!(f, "{}: invalid JSON: {}", path.display(), source)
            }
            LoadError::Malformed {
                path,
                pointer,
                value,
            } => {
                let at = if pointer.is_empty() { "/" } else { pointer };
                write!(
                    f,
                    "{}: non-numeric value {} at {}",
                    path.display(),
                    value,
                    at
                )
            }
        }
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LoadError::File(e) => Some(e),
            LoadError::Json { source, .. } => Some(source),
            LoadError::Malformed { .. } => None,
        }
    }
}

/// Load and flatten a numeric source file.
pub fn load(path: &Path) -> Result<NumericBuffer, LoadError> {
    let text = files::read_to_string(path).map_err(LoadError::File)?;
    load_str(&text, path)
}

/// Flatten numeric source text; `path` is only used in errors.
pub fn load_str(text: &str, path: &Path) -> Result<NumericBuffer, LoadError> {
    let value: Value = serde_json::from_str(text).map_err(|e| LoadError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mut values = Vec::new();
    let mut pointer = String::new();
    flatten_into(&value, &mut pointer, &mut values).map_err(|(pointer, value)| {
        LoadError::Malformed {
            path: path.to_path_buf(),
            pointer,
            value,
        }
    })?;
    Ok(NumericBuffer::from_values(values))
}

/// Depth-first flatten. On failure returns (pointer, offending value).
pub fn flatten(value: &Value) -> Result<Vec<f64>, (String, String)> {
    let mut values = Vec::new();
    flatten_into(value, &mut String::new(), &mut values)?;
    Ok(values)
}

fn flatten_into(
    value: &Value,
    pointer: &mut String,
    out: &mut Vec<f64>,
) -> Result<(), (String, String)> {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(v) => {
                out.push(v);
                Ok(())
            }
            None => Err((pointer.clone(), value.to_string())),
        },
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                let len = pointer.len();
                pointer.push('/');
                pointer.push_str(&i.to_string());
                flatten_into(item, pointer, out)?;
                pointer.truncate(len);
            }
            Ok(())
        }
        other => Err((pointer.clone(), other.to_string())),
    }
}
