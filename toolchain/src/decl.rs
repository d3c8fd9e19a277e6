// decl.rs — Declaration data model
//
// The signature of one generated routine as recovered from its header:
// return kind, ordered parameters, and which parameter receives the output.
//
// Preconditions: none (types only).
// Postconditions: `Declaration::resolve_output` leaves at most one parameter
//                 with `is_output` set.
// Failure modes: none.
// Side effects: none.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Scalar base of a C type as accepted by the declaration grammar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BaseType {
    Void,
    Int,
    Float,
}

impl fmt::Display for BaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BaseType::Void => write!(f, "void"),
            BaseType::Int => write!(f, "int"),
            BaseType::Float => write!(f, "float"),
        }
    }
}

/// Return type: base plus pointer depth (`float*` is `Float` / 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReturnKind {
    pub base: BaseType,
    pub pointer_depth: usize,
}

impl fmt::Display for ReturnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.base, "*".repeat(self.pointer_depth))
    }
}

/// The two parameter kinds generated routines use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ParamKind {
    /// `int n`
    #[serde(rename = "scalar_int")]
    ScalarInt,
    /// `float *x`
    #[serde(rename = "array_of_float")]
    FloatArray,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Parameter {
    pub kind: ParamKind,
    pub name: String,
    pub is_const: bool,
    pub is_output: bool,
}

impl Parameter {
    pub fn is_array(&self) -> bool {
        self.kind == ParamKind::FloatArray
    }

    /// Input array: an array parameter that does not receive the output.
    pub fn is_input_array(&self) -> bool {
        self.is_array() && !self.is_output
    }

    fn has_output_name(&self) -> bool {
        self.name.eq_ignore_ascii_case("output") || self.name.eq_ignore_ascii_case("out")
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_const {
            write!(f, "const ")?;
        }
        match self.kind {
            ParamKind::ScalarInt => write!(f, "int {}", self.name),
            ParamKind::FloatArray => write!(f, "float* {}", self.name),
        }
    }
}

/// How the output parameter is chosen among the array parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputRule {
    /// Positional and name rules must agree; disagreement is an error at
    /// bind time.
    #[default]
    Strict,
    /// The final array parameter, names ignored.
    LastArray,
    /// An array parameter named `output`/`out` (any case); falls back to the
    /// final array parameter when no name matches.
    ByName,
}

/// Outcome of output-parameter detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputSlot {
    /// Parameter index receiving the output.
    Param(usize),
    /// The name rule and the positional rule picked different parameters.
    Ambiguous { by_name: usize, by_position: usize },
    /// The declaration has no array parameter.
    Missing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Declaration {
    pub name: String,
    pub return_kind: ReturnKind,
    pub params: Vec<Parameter>,
    pub output: OutputSlot,
    /// Header the declaration was read from.
    #[serde(skip)]
    pub source: PathBuf,
    /// `#include` path of `source`, relative to the scanned directory.
    #[serde(skip)]
    pub include: String,
}

impl Declaration {
    /// Build a declaration with output detection not yet applied.
    pub fn new(name: String, return_kind: ReturnKind, params: Vec<Parameter>) -> Self {
        Declaration {
            name,
            return_kind,
            params,
            output: OutputSlot::Missing,
            source: PathBuf::new(),
            include: String::new(),
        }
    }

    /// Record the originating header. `root` is the directory handed to the
    /// compiler as `-I`; without one the bare file name is included.
    pub fn with_source(mut self, path: &Path, root: Option<&Path>) -> Self {
        let relative = root
            .and_then(|r| path.strip_prefix(r).ok())
            .filter(|rel| rel.components().count() > 0);
        let include = match relative {
            Some(rel) => rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/"),
            None => path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
        };
        self.source = path.to_path_buf();
        self.include = include;
        self
    }

    /// Apply output-parameter detection under `rule`.
    pub fn resolve_output(&mut self, rule: OutputRule) {
        let by_position = self.params.iter().rposition(Parameter::is_array);
        let by_name = self
            .params
            .iter()
            .rposition(|p| p.is_array() && p.has_output_name());

        self.output = match (rule, by_name, by_position) {
            (_, _, None) => OutputSlot::Missing,
            (OutputRule::LastArray, _, Some(pos)) => OutputSlot::Param(pos),
            (OutputRule::ByName, Some(named), _) => OutputSlot::Param(named),
            (OutputRule::ByName, None, Some(pos)) => OutputSlot::Param(pos),
            (OutputRule::Strict, Some(named), Some(pos)) if named != pos => {
                OutputSlot::Ambiguous {
                    by_name: named,
                    by_position: pos,
                }
            }
            (OutputRule::Strict, _, Some(pos)) => OutputSlot::Param(pos),
        };

        for (i, p) in self.params.iter_mut().enumerate() {
            p.is_output = self.output == OutputSlot::Param(i);
        }
    }

    pub fn output_param(&self) -> Option<&Parameter> {
        match self.output {
            OutputSlot::Param(i) => self.params.get(i),
            _ => None,
        }
    }

    pub fn scalar_count(&self) -> usize {
        self.params
            .iter()
            .filter(|p| p.kind == ParamKind::ScalarInt)
            .count()
    }

    /// Array parameters excluding the output parameter.
    pub fn input_array_count(&self) -> usize {
        self.params.iter().filter(|p| p.is_input_array()).count()
    }

    /// Path of the originating header as written in `#include "..."`.
    pub fn header_name(&self) -> String {
        if self.include.is_empty() {
            format!("{}.h", self.name)
        } else {
            self.include.clone()
        }
    }

    /// SHA-256 of the declaration's canonical JSON, as lowercase hex.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        let mut hex = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write;
            let _ = write!(hex, "{:02x}", b);
        }
        hex
    }
}

/// Renders as a C prototype: `void blurtwo(float* v, int M, float* output);`
impl fmt::Display for Declaration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}(", self.return_kind, self.name)?;
        if self.params.is_empty() {
            write!(f, "void")?;
        }
        for (i, p) in self.params.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", p)?;
        }
        write!(f, ");")
    }
}
