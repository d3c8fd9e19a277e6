// registry.rs — Routine signature registry
//
// Builds a name-keyed catalog of routine declarations by parsing every
// header in a library directory. The registry is an owned value built once
// per invocation; nothing is cached across runs.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::decl::{Declaration, OutputRule};
use crate::diag::{codes, DiagCode};
use crate::files::{self, FileError};
use crate::parser;

// ── Options ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct RegistryOptions {
    /// Header extensions to scan (without the dot).
    pub extensions: Vec<String>,
    /// Descend into subdirectories.
    pub recursive: bool,
    pub output_rule: OutputRule,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        RegistryOptions {
            extensions: vec!["h".to_string()],
            recursive: false,
            output_rule: OutputRule::default(),
        }
    }
}

// ── Errors ──────────────────────────────────────────────────────────────────

/// Errors that can occur during registry loading.
#[derive(Debug)]
pub enum RegistryError {
    File(FileError),
    /// No declaration found in any scanned file.
    NoDeclarations { dir: PathBuf, files_scanned: usize },
}

impl RegistryError {
    pub fn code(&self) -> DiagCode {
        match self {
            RegistryError::File(_) => codes::E0002,
            RegistryError::NoDeclarations { .. } => codes::E0001,
        }
    }
}

impl fmt::Display for RegistryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryError::File(e) => write!(f, "{}", e),
            RegistryError::NoDeclarations { dir, files_scanned } => write!(
                f,
                "no declarations found in {} ({} file(s) scanned)",
                dir.display(),
                files_scanned
            ),
        }
    }
}

impl std::error::Error for RegistryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RegistryError::File(e) => Some(e),
            RegistryError::NoDeclarations { .. } => None,
        }
    }
}

impl From<FileError> for RegistryError {
    fn from(e: FileError) -> Self {
        RegistryError::File(e)
    }
}

// ── Registry ────────────────────────────────────────────────────────────────

/// Declaration registry. Populated by scanning header files.
#[derive(Debug, Default)]
pub struct Registry {
    declarations: BTreeMap<String, Declaration>,
    files_scanned: usize,
    /// Directory include paths are made relative to.
    root: Option<PathBuf>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose headers are included relative to `root`.
    pub fn rooted(root: &Path) -> Self {
        Registry {
            root: Some(root.to_path_buf()),
            ..Self::default()
        }
    }

    /// Load declarations from one header. Returns the number found.
    ///
    /// A name already present is replaced: the last-parsed declaration wins.
    pub fn load_header(&mut self, path: &Path, rule: OutputRule) -> Result<usize, RegistryError> {
        let source = files::read_to_string(path)?;
        self.files_scanned += 1;
        Ok(self.load_source(&source, path, rule))
    }

    /// Load declarations from header text already in memory.
    pub fn load_source(&mut self, source: &str, path: &Path, rule: OutputRule) -> usize {
        let parsed = parser::parse_declarations(source);
        for skipped in &parsed.skipped {
            log::debug!(
                "{}:{}: skipped statement: {}",
                path.display(),
                crate::diag::line_of(source, skipped.span.start),
                skipped.reason
            );
        }

        let count = parsed.declarations.len();
        for decl in parsed.declarations {
            let mut decl = decl.with_source(path, self.root.as_deref());
            decl.resolve_output(rule);
            self.insert(decl);
        }
        count
    }

    /// Insert a declaration, returning the one it replaced.
    pub fn insert(&mut self, decl: Declaration) -> Option<Declaration> {
        let replaced = self.declarations.insert(decl.name.clone(), decl);
        if let Some(old) = &replaced {
            let new = &self.declarations[&old.name];
            log::warn!(
                "declaration '{}' from {} replaces the one from {}",
                old.name,
                new.source.display(),
                old.source.display()
            );
        }
        replaced
    }

    pub fn lookup(&self, name: &str) -> Option<&Declaration> {
        self.declarations.get(name)
    }

    /// Declarations in name order.
    pub fn declarations(&self) -> impl Iterator<Item = &Declaration> {
        self.declarations.values()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.declarations.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.declarations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.declarations.is_empty()
    }

    pub fn files_scanned(&self) -> usize {
        self.files_scanned
    }

    /// Compact JSON of all declarations in name order.
    pub fn canonical_json(&self) -> String {
        let all: Vec<&Declaration> = self.declarations.values().collect();
        serde_json::to_string(&all).unwrap_or_default()
    }

    /// SHA-256 of `canonical_json()`, as lowercase hex.
    pub fn fingerprint(&self) -> String {
        use sha2::{Digest, Sha256};

        let digest = Sha256::digest(self.canonical_json().as_bytes());
        let mut hex = String::with_capacity(64);
        for b in digest.iter() {
            use std::fmt::Write;
            let _ = write!(hex, "{:02x}", b);
        }
        hex
    }
}

/// Build a registry from every matching header under `dir`.
///
/// An empty result is not an error here; callers decide whether an empty
/// catalog is fatal (lookups against it fail with not-found).
pub fn produce_registry(dir: &Path, options: &RegistryOptions) -> Result<Registry, RegistryError> {
    let extensions: Vec<&str> = options.extensions.iter().map(String::as_str).collect();
    let headers = files::discover(dir, &extensions, options.recursive)?;

    let mut registry = Registry::rooted(dir);
    for header in &headers {
        let n = registry.load_header(header, options.output_rule)?;
        log::debug!("loaded {} declaration(s) from {}", n, header.display());
    }
    Ok(registry)
}

// ── Tests ───────────────────────────────────────────────────────────────────
