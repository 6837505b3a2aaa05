//! Module Loader (spec.md §4.10): resolves `import`/`export` specifiers
//! to files on disk, parses each exactly once, and tolerates cycles by
//! handing a cycle partner a partial export record instead of
//! recursing forever.
//!
//! Grounded in the reference workspace's `resolver::ModuleGraph` for the
//! overall shape (a path-keyed cache plus an explicit import stack for
//! cycle detection), narrowed to this engine's simpler single-pass
//! parse (no incremental re-parsing) and its flat, process-wide
//! function registry rather than the reference workspace's per-module
//! scoping.

use crate::error::{CircularImportWarning, GotsError, ModuleNotFoundError};
use crate::parser::ast::{Program, Stmt};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};

/// Hex-encoded SHA-256 of a module's source text, used as the cache-key
/// annotation a re-run can compare against to tell a genuine edit from a
/// filesystem touch with unchanged content (watch mode's debounce loop
/// still re-runs either way; this is for diagnostics, not a skip path).
pub fn checksum(source: &str) -> String {
    let digest = Sha256::digest(source.as_bytes());
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    Loading,
    Loaded,
    /// Terminal state for a module that was observed by a cycle partner
    /// while still loading. Distinct from `Loaded` only for diagnostics;
    /// its export table is exactly as complete as a `Loaded` module's.
    Partial,
    Error,
}

#[derive(Debug, Clone)]
pub enum ExportedItem {
    Function(String),
    Class(String),
    Value(String),
}

#[derive(Debug, Clone)]
pub struct ModuleRecord {
    pub path: PathBuf,
    pub state: LoadState,
    pub ast: Option<Program>,
    /// Exported-name → export table entry, populated statement-by-statement
    /// as the module's own top level is walked (spec.md §4.10: an importer
    /// that observes this module mid-load sees only entries already
    /// declared at that point).
    pub exports: FxHashMap<String, ExportedItem>,
    pub exports_partial: bool,
    pub error: Option<String>,
    /// Hex SHA-256 of the source text this record was parsed from; `None`
    /// until the source has been read (a record still `Loading` another
    /// cycle partner observed it through hasn't been read yet).
    pub checksum: Option<String>,
}

impl ModuleRecord {
    fn loading(path: PathBuf) -> Self {
        ModuleRecord {
            path,
            state: LoadState::Loading,
            ast: None,
            exports: FxHashMap::default(),
            exports_partial: false,
            error: None,
            checksum: None,
        }
    }
}

/// Process-wide module cache plus the import stack used to detect
/// cycles while a load is in progress (spec.md §5: one mutex per shared
/// resource; the module-loader lock is outermost in the lock order).
pub struct ModuleLoader {
    cache: Mutex<FxHashMap<PathBuf, ModuleRecord>>,
    cycle_edges: Mutex<Vec<(PathBuf, PathBuf)>>,
}

impl ModuleLoader {
    pub fn new() -> Self {
        ModuleLoader {
            cache: Mutex::new(FxHashMap::default()),
            cycle_edges: Mutex::new(Vec::new()),
        }
    }

    /// `resolve(path, importer)` (spec.md §4.10): relative specifiers are
    /// joined against the importer's directory; the path is tried as
    /// given, then with `.gts`, `.ts`, `.js` appended, first hit wins.
    pub fn resolve(&self, specifier: &str, importer: &Path) -> Result<PathBuf, ModuleNotFoundError> {
        let base = if specifier.starts_with("./") || specifier.starts_with("../") {
            importer
                .parent()
                .unwrap_or_else(|| Path::new("."))
                .join(specifier)
        } else {
            PathBuf::from(specifier)
        };

        let mut tried = vec![base.clone()];
        if base.is_file() {
            return Ok(base);
        }
        for ext in ["gts", "ts", "js"] {
            let candidate = PathBuf::from(format!("{}.{ext}", base.display()));
            if candidate.is_file() {
                return Ok(candidate);
            }
            tried.push(candidate);
        }
        Err(ModuleNotFoundError {
            path: specifier.to_string(),
            tried,
            import_stack: Vec::new(),
        })
    }

    /// Loads `path` (already resolved) from the outermost entry point.
    pub fn load(&self, path: &Path) -> Result<ModuleRecord, GotsError> {
        let mut stack = Vec::new();
        self.load_inner(path, &mut stack)
    }

    pub fn import_cycle_edges(&self) -> Vec<(PathBuf, PathBuf)> {
        self.cycle_edges.lock().clone()
    }

    pub fn state_of(&self, path: &Path) -> Option<LoadState> {
        self.cache.lock().get(path).map(|r| r.state)
    }

    fn load_inner(&self, path: &Path, stack: &mut Vec<PathBuf>) -> Result<ModuleRecord, GotsError> {
        if let Some(record) = self.cache.lock().get(path) {
            match record.state {
                LoadState::Loaded | LoadState::Partial => return Ok(record.clone()),
                LoadState::Error => {
                    return Err(GotsError::ModuleNotFound(ModuleNotFoundError {
                        path: path.display().to_string(),
                        tried: vec![path.to_path_buf()],
                        import_stack: stack.clone(),
                    }))
                }
                LoadState::Loading => {
                    if let Some(importer) = stack.last() {
                        let warning = CircularImportWarning {
                            importer: importer.clone(),
                            target: path.to_path_buf(),
                        };
                        tracing::warn!(%warning, "circular import detected");
                        self.cycle_edges.lock().push((importer.clone(), path.to_path_buf()));
                    }
                    let mut cache = self.cache.lock();
                    let record = cache.get_mut(path).expect("checked present above");
                    record.exports_partial = true;
                    return Ok(record.clone());
                }
            }
        }

        let source = fs::read_to_string(path).map_err(GotsError::Io)?;
        let source_checksum = checksum(&source);
        self.cache.lock().insert(path.to_path_buf(), ModuleRecord::loading(path.to_path_buf()));
        stack.push(path.to_path_buf());

        let program = match crate::parser::parse_source(&source) {
            Ok(p) => p,
            Err(e) => {
                let err: GotsError = e.into();
                if let Some(record) = self.cache.lock().get_mut(path) {
                    record.state = LoadState::Error;
                    record.error = Some(err.to_string());
                }
                stack.pop();
                return Err(err);
            }
        };

        for stmt in &program.statements {
            match stmt {
                Stmt::Import { source: specifier, .. } => {
                    let resolved = self.resolve(specifier, path).map_err(|mut e| {
                        e.import_stack = stack.clone();
                        GotsError::ModuleNotFound(e)
                    })?;
                    self.load_inner(&resolved, stack)?;
                }
                Stmt::Export { is_default, name, inner } => {
                    let item = inner.as_deref().and_then(export_item_of);
                    if let Some(item) = item {
                        let key = if *is_default {
                            "default".to_string()
                        } else {
                            name.clone().unwrap_or_else(|| "default".to_string())
                        };
                        if let Some(record) = self.cache.lock().get_mut(path) {
                            record.exports.insert(key, item);
                        }
                    }
                }
                _ => {}
            }
        }

        stack.pop();
        let mut cache = self.cache.lock();
        let record = cache.get_mut(path).expect("just inserted");
        record.ast = Some(program);
        record.checksum = Some(source_checksum);
        record.state = if record.exports_partial {
            LoadState::Partial
        } else {
            LoadState::Loaded
        };
        Ok(record.clone())
    }
}

impl Default for ModuleLoader {
    fn default() -> Self {
        ModuleLoader::new()
    }
}

fn export_item_of(stmt: &Stmt) -> Option<ExportedItem> {
    match stmt {
        Stmt::FunctionDecl { name, .. } => Some(ExportedItem::Function(name.clone())),
        Stmt::ClassDecl(c) => Some(ExportedItem::Class(c.name.clone())),
        Stmt::VarDecl { name, .. } => Some(ExportedItem::Value(name.clone())),
        _ => None,
    }
}

/// Flattens an entry module and every module it transitively imports
/// into one program, imported modules first (dependency order), so the
/// pipeline can lower and register every declaration through one flat
/// function registry. A module with only named exports (spec.md §6)
/// contributes those declarations directly rather than through a
/// synthesized default-export wrapper object, since this engine has no
/// namespace-import member-access codegen yet — recorded as an open
/// design point in the grounding ledger.
pub fn flatten_program(loader: &ModuleLoader, entry: &Path) -> Result<Program, GotsError> {
    let mut seen = Vec::new();
    let mut statements = Vec::new();
    flatten_inner(loader, entry, &mut seen, &mut statements)?;
    Ok(Program { statements })
}

fn flatten_inner(
    loader: &ModuleLoader,
    path: &Path,
    seen: &mut Vec<PathBuf>,
    out: &mut Vec<Stmt>,
) -> Result<(), GotsError> {
    let canonical = path.to_path_buf();
    if seen.contains(&canonical) {
        return Ok(());
    }
    seen.push(canonical.clone());

    let record = loader.load(path)?;
    let program = record.ast.expect("loaded record always carries its AST");
    for stmt in &program.statements {
        if let Stmt::Import { source: specifier, .. } = stmt {
            let resolved = loader
                .resolve(specifier, path)
                .map_err(GotsError::ModuleNotFound)?;
            flatten_inner(loader, &resolved, seen, out)?;
        }
    }
    for stmt in program.statements {
        if !matches!(stmt, Stmt::Import { .. }) {
            out.push(stmt);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(dir: &tempfile::TempDir, name: &str, contents: &str) -> PathBuf {
        let path = dir.path().join(name);
        let mut f = fs::File::create(&path).unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        path
    }

    #[test]
    fn resolve_tries_suffixes_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let target = write_temp(&dir, "helper.gts", "export function f() {}");
        let importer = dir.path().join("main.gts");
        let loader = ModuleLoader::new();
        let resolved = loader.resolve("./helper", &importer).unwrap();
        assert_eq!(resolved, target);
    }

    #[test]
    fn resolve_fails_with_module_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let importer = dir.path().join("main.gts");
        let loader = ModuleLoader::new();
        let err = loader.resolve("./missing", &importer).unwrap_err();
        assert_eq!(err.tried.len(), 4);
    }

    #[test]
    fn loading_the_same_module_twice_hits_the_cache() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_temp(&dir, "a.gts", "export function f() { return 1; }");
        let loader = ModuleLoader::new();
        let first = loader.load(&path).unwrap();
        let second = loader.load(&path).unwrap();
        assert_eq!(first.state, LoadState::Loaded);
        assert_eq!(second.state, LoadState::Loaded);
        assert!(first.exports.contains_key("f"));
        assert!(first.checksum.is_some());
        assert_eq!(first.checksum, second.checksum);
    }

    #[test]
    fn checksum_changes_with_source_text() {
        let a = checksum("export function f() { return 1; }");
        let b = checksum("export function f() { return 2; }");
        assert_ne!(a, b);
        assert_eq!(a, checksum("export function f() { return 1; }"));
    }

    #[test]
    fn circular_import_resolves_to_a_partial_record_instead_of_looping() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(&dir, "a.gts", "import { b } from \"./b\";\nexport function a() { return 1; }");
        write_temp(&dir, "b.gts", "import { a } from \"./a\";\nexport function b() { return 2; }");
        let loader = ModuleLoader::new();
        let a_path = dir.path().join("a.gts");
        let record = loader.load(&a_path).unwrap();
        assert!(matches!(record.state, LoadState::Loaded | LoadState::Partial));
        assert_eq!(loader.import_cycle_edges().len(), 1);
    }

    #[test]
    fn flatten_program_orders_dependencies_before_the_importer() {
        let dir = tempfile::tempdir().unwrap();
        write_temp(&dir, "leaf.gts", "export function leaf() { return 1; }");
        write_temp(&dir, "main.gts", "import { leaf } from \"./leaf\";\nfunction main() { return leaf(); }");
        let loader = ModuleLoader::new();
        let main_path = dir.path().join("main.gts");
        let program = flatten_program(&loader, &main_path).unwrap();
        let names: Vec<&str> = program
            .statements
            .iter()
            .filter_map(|s| match s {
                Stmt::FunctionDecl { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(names, vec!["leaf", "main"]);
    }
}
