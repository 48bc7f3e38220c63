use std::collections::HashSet;
use std::path::{Path, PathBuf};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::facade::{FacadeError, ResolvedSymbol};
use crate::session::SessionSnapshot;

/// Per-file declared-symbol cache plus a reverse `name -> files` index.
///
/// Invariant: `f` is in `by_name[n]` iff some symbol named `n` is cached for `f`. Updates for a
/// file hold that file's entry in `symbols` while the reverse index is adjusted, so concurrent
/// updates of the same file cannot interleave; different files proceed independently.
///
/// Each entry remembers the session generation that produced it and is never overwritten by
/// results from an older generation.
#[derive(Debug, Default)]
pub struct FileIndex {
    symbols: DashMap<PathBuf, IndexedFile>,
    by_name: DashMap<String, HashSet<PathBuf>>,
}

#[derive(Debug)]
struct IndexedFile {
    generation: u64,
    symbols: Vec<ResolvedSymbol>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Re-query the declared symbols of `path` and update both maps.
    ///
    /// A failed query is logged and indexed as "no symbols", so stale names never linger.
    /// Results from a disposed snapshot, or one older than the cached entry, are dropped.
    /// Returns the number of symbols now cached for the file, or `None` if nothing changed.
    pub fn update_file(&self, path: &Path, snapshot: &SessionSnapshot) -> Option<usize> {
        let symbols = match snapshot.query(|facade| facade.file_symbols(path)) {
            Ok(symbols) => symbols,
            Err(FacadeError::Disposed) => {
                tracing::debug!(
                    target: "kestrel.workspace",
                    path = %path.display(),
                    generation = snapshot.generation(),
                    "skipping symbols from a disposed session"
                );
                return None;
            }
            Err(err) => {
                tracing::warn!(
                    target: "kestrel.workspace",
                    path = %path.display(),
                    generation = snapshot.generation(),
                    error = %err,
                    "failed to compute file symbols"
                );
                Vec::new()
            }
        };
        if snapshot.is_disposed() {
            return None;
        }
        let count = symbols.len();
        self.replace_symbols(path, snapshot.generation(), symbols).then_some(count)
    }

    /// Replace the cached symbols of `path` with `symbols` computed by session `generation`.
    ///
    /// Returns `false`, leaving the entry untouched, if it came from a newer generation.
    pub fn replace_symbols(
        &self,
        path: &Path,
        generation: u64,
        symbols: Vec<ResolvedSymbol>,
    ) -> bool {
        match self.symbols.entry(path.to_path_buf()) {
            Entry::Occupied(mut entry) => {
                if entry.get().generation > generation {
                    return false;
                }
                let old_names = names(&entry.get().symbols);
                let new_names = names(&symbols);
                for name in old_names.difference(&new_names) {
                    self.unlink(name, path);
                }
                for name in new_names.difference(&old_names) {
                    self.link(name, path);
                }
                entry.insert(IndexedFile {
                    generation,
                    symbols,
                });
            }
            Entry::Vacant(entry) => {
                for name in names(&symbols) {
                    self.link(name, path);
                }
                entry.insert(IndexedFile {
                    generation,
                    symbols,
                });
            }
        }
        true
    }

    /// Forget everything about `path`. Removing an unknown file is a no-op.
    pub fn remove_file(&self, path: &Path) {
        if let Entry::Occupied(entry) = self.symbols.entry(path.to_path_buf()) {
            for name in names(&entry.get().symbols) {
                self.unlink(name, path);
            }
            entry.remove();
        }
    }

    pub fn find_files_by_symbol_name(&self, name: &str) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self
            .by_name
            .get(name)
            .map(|files| files.iter().cloned().collect())
            .unwrap_or_default();
        files.sort();
        files
    }

    pub fn get_symbols(&self, path: &Path) -> Vec<ResolvedSymbol> {
        self.symbols
            .get(path)
            .map(|entry| entry.symbols.clone())
            .unwrap_or_default()
    }

    /// Every cached symbol named exactly `name`, across files.
    pub fn symbols_named(&self, name: &str) -> Vec<ResolvedSymbol> {
        self.find_files_by_symbol_name(name)
            .into_iter()
            .flat_map(|file| {
                self.get_symbols(&file)
                    .into_iter()
                    .filter(|symbol| symbol.name == name)
            })
            .collect()
    }

    pub fn indexed_files(&self) -> Vec<PathBuf> {
        let mut files: Vec<PathBuf> = self.symbols.iter().map(|e| e.key().clone()).collect();
        files.sort();
        files
    }

    pub fn is_empty(&self) -> bool {
        self.symbols.is_empty()
    }

    /// Drop everything. Used when the owning session is rebuilt.
    pub fn clear(&self) {
        self.symbols.clear();
        self.by_name.clear();
    }

    fn link(&self, name: &str, path: &Path) {
        self.by_name
            .entry(name.to_string())
            .or_default()
            .insert(path.to_path_buf());
    }

    fn unlink(&self, name: &str, path: &Path) {
        if let Entry::Occupied(mut entry) = self.by_name.entry(name.to_string()) {
            entry.get_mut().remove(path);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
    }
}

fn names(symbols: &[ResolvedSymbol]) -> HashSet<&str> {
    symbols.iter().map(|s| s.name.as_str()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facade::SymbolKind;
    use kestrel_core::SourceLocation;

    fn symbol(path: &str, name: &str) -> ResolvedSymbol {
        ResolvedSymbol::new(name, SymbolKind::Class, SourceLocation::new(path, 0, 0))
    }

    /// `f in by_name[n]` iff `n` is declared in `symbols[f]`.
    fn assert_consistent(index: &FileIndex) {
        for entry in index.by_name.iter() {
            assert!(!entry.value().is_empty(), "empty set kept for {}", entry.key());
            for file in entry.value() {
                let symbols = index.get_symbols(file);
                assert!(
                    symbols.iter().any(|s| &s.name == entry.key()),
                    "{} listed for {} but not declared",
                    file.display(),
                    entry.key()
                );
            }
        }
        for entry in index.symbols.iter() {
            for symbol in &entry.value().symbols {
                assert!(index
                    .find_files_by_symbol_name(&symbol.name)
                    .contains(entry.key()));
            }
        }
    }

    #[test]
    fn replacing_symbols_moves_reverse_entries() {
        let index = FileIndex::new();
        let a = Path::new("/ws/A.kt");
        let b = Path::new("/ws/B.kt");

        index.replace_symbols(a, 1, vec![symbol("/ws/A.kt", "Foo"), symbol("/ws/A.kt", "Bar")]);
        index.replace_symbols(b, 1, vec![symbol("/ws/B.kt", "Foo")]);
        assert_eq!(
            index.find_files_by_symbol_name("Foo"),
            vec![a.to_path_buf(), b.to_path_buf()]
        );
        assert_consistent(&index);

        index.replace_symbols(a, 1, vec![symbol("/ws/A.kt", "Baz"), symbol("/ws/A.kt", "Bar")]);
        assert_eq!(index.find_files_by_symbol_name("Foo"), vec![b.to_path_buf()]);
        assert_eq!(index.find_files_by_symbol_name("Baz"), vec![a.to_path_buf()]);
        assert_consistent(&index);

        index.replace_symbols(b, 1, Vec::new());
        assert!(index.find_files_by_symbol_name("Foo").is_empty());
        assert!(!index.by_name.contains_key("Foo"));
        assert_consistent(&index);
    }

    #[test]
    fn duplicate_names_in_one_file_link_once() {
        let index = FileIndex::new();
        let a = Path::new("/ws/A.kt");
        index.replace_symbols(a, 1, vec![symbol("/ws/A.kt", "run"), symbol("/ws/A.kt", "run")]);
        assert_eq!(index.get_symbols(a).len(), 2);
        assert_eq!(index.find_files_by_symbol_name("run"), vec![a.to_path_buf()]);
        assert_eq!(index.symbols_named("run").len(), 2);

        index.remove_file(a);
        index.remove_file(a);
        assert!(index.is_empty());
        assert!(index.by_name.is_empty());
    }

    #[test]
    fn older_generations_never_overwrite_newer_entries() {
        let index = FileIndex::new();
        let a = Path::new("/ws/A.kt");

        assert!(index.replace_symbols(a, 2, vec![symbol("/ws/A.kt", "Fresh")]));
        assert!(!index.replace_symbols(a, 1, Vec::new()));
        assert_eq!(index.find_files_by_symbol_name("Fresh"), vec![a.to_path_buf()]);

        assert!(index.replace_symbols(a, 3, vec![symbol("/ws/A.kt", "Newer")]));
        assert!(index.find_files_by_symbol_name("Fresh").is_empty());
        assert_consistent(&index);
    }

    #[test]
    fn concurrent_updates_keep_the_index_consistent() {
        let index = std::sync::Arc::new(FileIndex::new());
        let threads: Vec<_> = (0..8)
            .map(|t| {
                let index = index.clone();
                std::thread::spawn(move || {
                    for round in 0..200 {
                        let path = format!("/ws/F{}.kt", (t + round) % 4);
                        let names = [format!("S{}", round % 3), format!("T{t}")];
                        let symbols = names.iter().map(|n| symbol(&path, n)).collect();
                        index.replace_symbols(Path::new(&path), 1, symbols);
                        if round % 7 == 0 {
                            index.remove_file(Path::new(&path));
                        }
                    }
                })
            })
            .collect();
        for thread in threads {
            thread.join().unwrap();
        }
        assert_consistent(&index);
    }
}
