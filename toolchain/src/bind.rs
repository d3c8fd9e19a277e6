// bind.rs — Argument binder
//
// Matches command-line argument tokens against a routine declaration.
// Numerals bind to `int` parameters and `@file` tokens bind to non-output
// `float*` parameters, each class in declaration order, so the two classes
// may be interleaved freely on the command line.
//
// Preconditions: the declaration has had output detection applied.
// Postconditions: on success, `Binding::values` holds one value per
//                 non-output parameter, in declaration order.
// Failure modes: see `BindError`; checks run in a fixed order and the first
//                failure is returned.
// Side effects: reads each referenced array file (through the loader).

use std::fmt;
use std::path::{Path, PathBuf};

use crate::decl::{Declaration, OutputSlot, ParamKind, Parameter};
use crate::diag::{codes, DiagCode};
use crate::loader::{self, LoadError, NumericBuffer};
use crate::registry::Registry;

/// Marks an argument token as an array file reference.
pub const ARRAY_SENTINEL: char = '@';

// ── Tokens ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArgToken {
    Numeral(i32),
    Array(PathBuf),
}

/// Classify one raw argument token.
pub fn classify(raw: &str) -> Result<ArgToken, BindError> {
    if let Some(path) = raw.strip_prefix(ARRAY_SENTINEL) {
        if path.is_empty() {
            return Err(BindError::InvalidArgument {
                token: raw.to_string(),
                reason: "array reference has no path",
            });
        }
        return Ok(ArgToken::Array(PathBuf::from(path)));
    }
    raw.parse::<i32>()
        .map(ArgToken::Numeral)
        .map_err(|_| BindError::InvalidArgument {
            token: raw.to_string(),
            reason: "expected an int numeral or @file.json",
        })
}

// ── Binding ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
    Scalar(i32),
    Buffer(NumericBuffer),
}

/// A declaration with a concrete value for every non-output parameter.
#[derive(Debug, Clone)]
pub struct Binding {
    pub declaration: Declaration,
    /// One entry per non-output parameter, in declaration order.
    pub values: Vec<BoundValue>,
    /// Index of the output parameter in `declaration.params`.
    pub output_index: usize,
    pub output_size: usize,
}

impl Binding {
    /// Non-output parameters paired with their bound values.
    pub fn inputs(&self) -> impl Iterator<Item = (&Parameter, &BoundValue)> {
        self.declaration
            .params
            .iter()
            .filter(|p| !p.is_output)
            .zip(self.values.iter())
    }

    pub fn output_param(&self) -> &Parameter {
        &self.declaration.params[self.output_index]
    }

    pub fn scalar_count(&self) -> usize {
        self.values
            .iter()
            .filter(|v| matches!(v, BoundValue::Scalar(_)))
            .count()
    }

    pub fn buffer_count(&self) -> usize {
        self.values.len() - self.scalar_count()
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum BindError {
    NotFound {
        name: String,
        available: Vec<String>,
    },
    AmbiguousOutput {
        function: String,
        by_name: String,
        by_position: String,
    },
    NoOutputParameter {
        function: String,
    },
    InvalidArgument {
        token: String,
        reason: &'static str,
    },
    IntCountMismatch {
        expected: usize,
        got: usize,
    },
    ArrayCountMismatch {
        expected: usize,
        got: usize,
    },
    /// `--output-size` absent (`None`) or not positive.
    MissingOutputSize {
        got: Option<i64>,
    },
    Load {
        path: PathBuf,
        source: LoadError,
    },
    EmptyArray {
        path: PathBuf,
        param: String,
    },
}

impl BindError {
    pub fn code(&self) -> DiagCode {
        match self {
            BindError::NotFound { .. } => codes::E0101,
            BindError::IntCountMismatch { .. } => codes::E0102,
            BindError::ArrayCountMismatch { .. } => codes::E0103,
            BindError::MissingOutputSize { .. } => codes::E0104,
            BindError::InvalidArgument { .. } => codes::E0105,
            BindError::AmbiguousOutput { .. } => codes::E0106,
            BindError::NoOutputParameter { .. } => codes::E0107,
            BindError::EmptyArray { .. } => codes::E0108,
            BindError::Load { source, .. } => source.code(),
        }
    }

    /// Remediation hint for the CLI, where one exists.
    pub fn hint(&self) -> Option<String> {
        match self {
            BindError::NotFound { available, .. } if available.is_empty() => {
                Some("the registry is empty; check --lib-dir".to_string())
            }
            BindError::NotFound { available, .. } => {
                Some(format!("available functions: {}", available.join(", ")))
            }
            BindError::AmbiguousOutput { .. } => {
                Some("choose one with --output-rule last-array or --output-rule by-name".to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::NotFound { name, .. } => write!(f, "Function '{}' not found", name),
            BindError::AmbiguousOutput {
                function,
                by_name,
                by_position,
            } => write!(
                f,
                "{}: output parameter is ambiguous: '{}' by name, '{}' by position",
                function, by_name, by_position
            ),
            BindError::NoOutputParameter { function } => {
                write!(f, "{}: no float* parameter to receive the output", function)
            }
            BindError::InvalidArgument { token, reason } => {
                write!(f, "Invalid argument '{}': {}", token, reason)
            }
            BindError::IntCountMismatch { expected, got } => {
                write!(f, "Expected {} int arguments, got {}", expected, got)
            }
            BindError::ArrayCountMismatch { expected, got } => {
                write!(f, "Expected {} array arguments, got {}", expected, got)
            }
            BindError::MissingOutputSize { got: None } => {
                write!(f, "Missing --output-size")
            }
            BindError::MissingOutputSize { got: Some(n) } => {
                write!(f, "--output-size must be positive, got {}", n)
            }
            BindError::Load { path, source } => {
                write!(f, "cannot load array @{}: {}", path.display(), source)
            }
            BindError::EmptyArray { path, param } => write!(
                f,
                "array @{} for parameter '{}' has no elements",
                path.display(),
                param
            ),
        }
    }
}

impl std::error::Error for BindError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BindError::Load { source, .. } => Some(source),
            _ => None,
        }
    }
}

// ── Entry points ────────────────────────────────────────────────────────────

/// Look `name` up in the registry and bind against it.
pub fn lookup_and_bind<S: AsRef<str>>(
    registry: &Registry,
    name: &str,
    raw_args: &[S],
    output_size: Option<i64>,
) -> Result<Binding, BindError> {
    let decl = registry.lookup(name).ok_or_else(|| BindError::NotFound {
        name: name.to_string(),
        available: registry.names().map(str::to_string).collect(),
    })?;
    bind(decl, raw_args, output_size)
}

/// Bind raw argument tokens against `decl`, loading array files from disk.
pub fn bind<S: AsRef<str>>(
    decl: &Declaration,
    raw_args: &[S],
    output_size: Option<i64>,
) -> Result<Binding, BindError> {
    bind_with(decl, raw_args, output_size, loader::load)
}

/// `bind` with an injectable array loader.
pub fn bind_with<S, L>(
    decl: &Declaration,
    raw_args: &[S],
    output_size: Option<i64>,
    mut load: L,
) -> Result<Binding, BindError>
where
    S: AsRef<str>,
    L: FnMut(&Path) -> Result<NumericBuffer, LoadError>,
{
    let output_index = match decl.output {
        OutputSlot::Param(i) => i,
        OutputSlot::Ambiguous {
            by_name,
            by_position,
        } => {
            return Err(BindError::AmbiguousOutput {
                function: decl.name.clone(),
                by_name: decl.params[by_name].name.clone(),
                by_position: decl.params[by_position].name.clone(),
            })
        }
        OutputSlot::Missing => {
            return Err(BindError::NoOutputParameter {
                function: decl.name.clone(),
            })
        }
    };

    let mut numerals = Vec::new();
    let mut arrays = Vec::new();
    for raw in raw_args {
        match classify(raw.as_ref())? {
            ArgToken::Numeral(n) => numerals.push(n),
            ArgToken::Array(path) => arrays.push(path),
        }
    }

    let expected_ints = decl.scalar_count();
    if numerals.len() != expected_ints {
        return Err(BindError::IntCountMismatch {
            expected: expected_ints,
            got: numerals.len(),
        });
    }

    let expected_arrays = decl.input_array_count();
    if arrays.len() != expected_arrays {
        return Err(BindError::ArrayCountMismatch {
            expected: expected_arrays,
            got: arrays.len(),
        });
    }

    let output_size = match output_size {
        Some(n) if n > 0 => n as usize,
        got => return Err(BindError::MissingOutputSize { got }),
    };

    let mut buffers = Vec::with_capacity(arrays.len());
    for (param, path) in decl.params.iter().filter(|p| p.is_input_array()).zip(arrays) {
        let buffer = load(&path).map_err(|source| BindError::Load {
            path: path.clone(),
            source,
        })?;
        if buffer.is_empty() {
            return Err(BindError::EmptyArray {
                path,
                param: param.name.clone(),
            });
        }
        log::debug!(
            "bound {} element(s) from {} to '{}'",
            buffer.len(),
            path.display(),
            param.name
        );
        buffers.push(buffer);
    }

    // Counts match, so each class iterator yields exactly once per slot.
    let mut numerals = numerals.into_iter();
    let mut buffers = buffers.into_iter();
    let values = decl
        .params
        .iter()
        .filter(|p| !p.is_output)
        .filter_map(|p| match p.kind {
            ParamKind::ScalarInt => numerals.next().map(BoundValue::Scalar),
            ParamKind::FloatArray => buffers.next().map(BoundValue::Buffer),
        })
        .collect();

    Ok(Binding {
        declaration: decl.clone(),
        values,
        output_index,
        output_size,
    })
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::OutputRule;

    fn registry(src: &str) -> Registry {
        let mut reg = Registry::new();
        reg.load_source(src, Path::new("lib.h"), OutputRule::Strict);
        reg
    }

    fn blurtwo() -> Declaration {
        registry("void blurtwo(float* v, int M, int N, float* output);")
            .lookup("blurtwo")
            .unwrap()
            .clone()
    }

    /// Loader that fabricates `n` elements for a path named `n.json`.
    fn sized_loader(path: &Path) -> Result<NumericBuffer, LoadError> {
        let n: usize = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(1);
        Ok(NumericBuffer::from_values((0..n).map(|i| i as f64).collect()))
    }

    #[test]
    fn classify_tokens() {
        assert_eq!(classify("4").unwrap(), ArgToken::Numeral(4));
        assert_eq!(classify("-12").unwrap(), ArgToken::Numeral(-12));
        assert_eq!(
            classify("@data/x.json").unwrap(),
            ArgToken::Array(PathBuf::from("data/x.json"))
        );
        assert!(matches!(
            classify("2.5"),
            Err(BindError::InvalidArgument { .. })
        ));
        assert!(matches!(classify("@"), Err(BindError::InvalidArgument { .. })));
        assert!(matches!(
            classify("99999999999"),
            Err(BindError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn blurtwo_scenario() {
        let b = bind_with(&blurtwo(), &["4", "5", "@20.json"], Some(20), sized_loader).unwrap();
        assert_eq!(b.scalar_count(), 2);
        assert_eq!(b.buffer_count(), 1);
        assert_eq!(b.output_size, 20);
        assert_eq!(b.output_param().name, "output");
        match &b.values[0] {
            BoundValue::Buffer(buf) => assert_eq!(buf.len(), 20),
            other => panic!("expected buffer for v, got {:?}", other),
        }
        assert_eq!(b.values[1], BoundValue::Scalar(4));
        assert_eq!(b.values[2], BoundValue::Scalar(5));
    }

    #[test]
    fn token_classes_may_interleave() {
        let a = bind_with(&blurtwo(), &["@3.json", "4", "5"], Some(1), sized_loader).unwrap();
        let b = bind_with(&blurtwo(), &["4", "@3.json", "5"], Some(1), sized_loader).unwrap();
        assert_eq!(a.values, b.values);
    }

    #[test]
    fn arrays_bind_in_declaration_order() {
        let d = registry("void im2col(float* x, int A, float* w, float* output);")
            .lookup("im2col")
            .unwrap()
            .clone();
        let b = bind_with(&d, &["@2.json", "@5.json", "7"], Some(3), sized_loader).unwrap();
        let shapes: Vec<_> = b
            .inputs()
            .map(|(p, v)| match v {
                BoundValue::Buffer(buf) => format!("{}:{}", p.name, buf.len()),
                BoundValue::Scalar(n) => format!("{}={}", p.name, n),
            })
            .collect();
        assert_eq!(shapes, vec!["x:2", "A=7", "w:5"]);
    }

    #[test]
    fn too_few_ints() {
        let err = bind_with(&blurtwo(), &["4", "@20.json"], Some(20), sized_loader).unwrap_err();
        assert_eq!(err.to_string(), "Expected 2 int arguments, got 1");
        assert_eq!(err.code(), codes::E0102);
    }

    #[test]
    fn too_many_arrays() {
        let err = bind_with(
            &blurtwo(),
            &["4", "5", "@1.json", "@2.json"],
            Some(20),
            sized_loader,
        )
        .unwrap_err();
        assert_eq!(err.to_string(), "Expected 1 array arguments, got 2");
        assert_eq!(err.code(), codes::E0103);
    }

    #[test]
    fn int_count_checked_before_array_count() {
        let err = bind_with(&blurtwo(), &["4"], Some(20), sized_loader).unwrap_err();
        assert!(matches!(err, BindError::IntCountMismatch { expected: 2, got: 1 }));
    }

    #[test]
    fn output_size_required_and_positive() {
        let err = bind_with(&blurtwo(), &["4", "5", "@2.json"], None, sized_loader).unwrap_err();
        assert!(matches!(err, BindError::MissingOutputSize { got: None }));
        let err =
            bind_with(&blurtwo(), &["4", "5", "@2.json"], Some(0), sized_loader).unwrap_err();
        assert_eq!(err.to_string(), "--output-size must be positive, got 0");
        assert_eq!(err.code(), codes::E0104);
    }

    #[test]
    fn not_found_lists_available() {
        let reg = registry("void a(float* out);\nvoid b(float* out);");
        let err = lookup_and_bind(&reg, "c", &["1"], Some(1)).unwrap_err();
        assert_eq!(err.to_string(), "Function 'c' not found");
        assert_eq!(err.hint().as_deref(), Some("available functions: a, b"));
        assert_eq!(err.code(), codes::E0101);
    }

    #[test]
    fn empty_registry_lookup_fails() {
        let reg = Registry::new();
        let err = lookup_and_bind::<&str>(&reg, "blurtwo", &[], Some(1)).unwrap_err();
        assert!(matches!(err, BindError::NotFound { .. }));
    }

    #[test]
    fn ambiguous_output_is_refused() {
        let d = registry("void k(float* out, float* scratch);")
            .lookup("k")
            .unwrap()
            .clone();
        let err = bind_with::<&str, _>(&d, &[], Some(1), sized_loader).unwrap_err();
        assert_eq!(
            err.to_string(),
            "k: output parameter is ambiguous: 'out' by name, 'scratch' by position"
        );
        assert!(err.hint().is_some());
    }

    #[test]
    fn declaration_without_array_is_refused() {
        let d = registry("int count(int n);").lookup("count").unwrap().clone();
        let err = bind_with(&d, &["1"], Some(1), sized_loader).unwrap_err();
        assert!(matches!(err, BindError::NoOutputParameter { .. }));
    }

    #[test]
    fn loader_failure_is_wrapped_with_path() {
        let err = bind_with(&blurtwo(), &["4", "5", "@bad.json"], Some(1), |p: &Path| {
            Err(LoadError::Malformed {
                path: p.to_path_buf(),
                pointer: "/0".to_string(),
                value: "true".to_string(),
            })
        })
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "cannot load array @bad.json: bad.json: non-numeric value true at /0"
        );
        assert_eq!(err.code(), codes::E0201);
    }

    #[test]
    fn empty_array_is_refused() {
        let err = bind_with(&blurtwo(), &["4", "5", "@0.json"], Some(1), sized_loader).unwrap_err();
        assert!(matches!(err, BindError::EmptyArray { .. }));
    }

    #[test]
    fn bind_reads_files_from_disk() {
        let dir = std::env::temp_dir().join("atlkit_bind_disk");
        std::fs::create_dir_all(&dir).unwrap();
        let data = dir.join("v.json");
        std::fs::write(&data, "[[1, 2], [3, 4]]").unwrap();
        let token = format!("@{}", data.display());
        let b = bind(&blurtwo(), &["2".to_string(), "2".to_string(), token], Some(4)).unwrap();
        assert_eq!(
            b.values[0],
            BoundValue::Buffer(NumericBuffer::from_values(vec![1.0, 2.0, 3.0, 4.0]))
        );
        std::fs::remove_dir_all(&dir).ok();
    }
}
