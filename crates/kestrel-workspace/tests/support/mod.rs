#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use kestrel_build_model::ProjectModel;
use kestrel_core::{FileEdit, Position, Range, SourceLocation, SourceRange, TextEdit};
use kestrel_workspace::{
    CompletionCandidate, DiagnosticInfo, FacadeError, FacadeFactory, FacadeResult,
    MessageLevel, PublicationSink, RenameContext, ResolvedSymbol, SemanticFacade, Severity,
    SymbolKind, TypeInfo,
};
use url::Url;

/// Blocks `diagnostics` until released, reporting when a computation has started.
pub struct Gate {
    entered: Mutex<Sender<()>>,
    release: Mutex<Receiver<()>>,
}

pub struct GateHandle {
    pub entered: Receiver<()>,
    pub release: Sender<()>,
}

pub fn gate() -> (Arc<Gate>, GateHandle) {
    let (entered_tx, entered_rx) = channel();
    let (release_tx, release_rx) = channel();
    (
        Arc::new(Gate {
            entered: Mutex::new(entered_tx),
            release: Mutex::new(release_rx),
        }),
        GateHandle {
            entered: entered_rx,
            release: release_tx,
        },
    )
}

/// Poll `condition` until it holds, failing the test after five seconds.
pub fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        std::thread::sleep(Duration::from_millis(5));
    }
}

/// A toy engine: every `class Name` / `fun name` line declares a symbol, every line containing
/// `error` produces a diagnostic.
pub struct FakeFacade {
    pub label: String,
    pub module_count: usize,
    texts: Mutex<HashMap<PathBuf, String>>,
    pub fail_symbols: AtomicBool,
    pub panic_diagnostics: AtomicBool,
    pub gate: Mutex<Option<Arc<Gate>>>,
    pub disposed: AtomicUsize,
    pub updates: AtomicUsize,
}

impl FakeFacade {
    pub fn new(label: impl Into<String>, model: &ProjectModel) -> Self {
        Self {
            label: label.into(),
            module_count: model.modules.len(),
            texts: Mutex::new(HashMap::new()),
            fail_symbols: AtomicBool::new(false),
            panic_diagnostics: AtomicBool::new(false),
            gate: Mutex::new(None),
            disposed: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn set_text(&self, path: &Path, text: &str) {
        self.texts
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), text.to_string());
    }

    fn text(&self, path: &Path) -> String {
        self.texts
            .lock()
            .unwrap()
            .get(path)
            .cloned()
            .unwrap_or_default()
    }

    fn declarations(&self, path: &Path) -> Vec<ResolvedSymbol> {
        let text = self.text(path);
        let mut out = Vec::new();
        for (line, content) in text.lines().enumerate() {
            for (keyword, kind) in [("class ", SymbolKind::Class), ("fun ", SymbolKind::Function)] {
                if let Some(idx) = content.find(keyword) {
                    let rest = &content[idx + keyword.len()..];
                    let name: String = rest
                        .chars()
                        .take_while(|c| c.is_alphanumeric() || *c == '_')
                        .collect();
                    if !name.is_empty() {
                        let column = (idx + keyword.len()) as u32;
                        let mut symbol = ResolvedSymbol::new(
                            name.clone(),
                            kind,
                            SourceLocation::new(path, line as u32, column),
                        );
                        symbol.fully_qualified_name = Some(format!("sample.{name}"));
                        out.push(symbol);
                    }
                }
            }
        }
        out
    }

    fn symbol_at(&self, path: &Path, position: Position) -> Option<ResolvedSymbol> {
        self.declarations(path).into_iter().find(|s| {
            s.location.line == position.line
                && position.column >= s.location.column
                && position.column <= s.location.column + s.name.len() as u32
        })
    }
}

impl SemanticFacade for FakeFacade {
    fn diagnostics(&self, path: &Path) -> FacadeResult<Vec<DiagnosticInfo>> {
        let gate = self.gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let _ = gate.entered.lock().unwrap().send(());
            let _ = gate.release.lock().unwrap().recv();
        }
        if self.panic_diagnostics.load(Ordering::SeqCst) {
            panic!("diagnostics engine crashed");
        }

        let text = self.text(path);
        Ok(text
            .lines()
            .enumerate()
            .filter(|(_, l)| l.contains("error"))
            .map(|(line, content)| {
                let line = line as u32;
                DiagnosticInfo::new(
                    Severity::Error,
                    format!("{}: unexpected token", self.label),
                    Range::new(Position::new(line, 0), Position::new(line, content.len() as u32)),
                )
                .with_code("SYNTAX")
            })
            .collect())
    }

    fn resolve_at_position(
        &self,
        path: &Path,
        position: Position,
    ) -> FacadeResult<Option<ResolvedSymbol>> {
        Ok(self.symbol_at(path, position))
    }

    fn type_at(&self, path: &Path, position: Position) -> FacadeResult<Option<TypeInfo>> {
        Ok(self.symbol_at(path, position).map(|s| TypeInfo {
            display: s.name.clone(),
            fully_qualified_name: s.fully_qualified_name.clone(),
            nullable: false,
        }))
    }

    fn file_symbols(&self, path: &Path) -> FacadeResult<Vec<ResolvedSymbol>> {
        if self.fail_symbols.load(Ordering::SeqCst) {
            return Err(FacadeError::engine("symbol table unavailable"));
        }
        Ok(self.declarations(path))
    }

    fn completions(
        &self,
        path: &Path,
        _position: Position,
    ) -> FacadeResult<Vec<CompletionCandidate>> {
        Ok(self
            .declarations(path)
            .into_iter()
            .map(|s| CompletionCandidate {
                label: s.name,
                kind: Some(s.kind),
                detail: None,
                insert_text: None,
            })
            .collect())
    }

    fn find_references(&self, symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>> {
        Ok(vec![symbol.location.clone()])
    }

    fn find_implementations(&self, _symbol: &ResolvedSymbol) -> FacadeResult<Vec<SourceLocation>> {
        Err(FacadeError::engine("implementations are not indexed"))
    }

    fn type_definition_location(
        &self,
        path: &Path,
        position: Position,
    ) -> FacadeResult<Option<SourceLocation>> {
        Ok(self.symbol_at(path, position).map(|s| s.location))
    }

    fn prepare_rename(
        &self,
        path: &Path,
        position: Position,
    ) -> FacadeResult<Option<RenameContext>> {
        Ok(self.symbol_at(path, position).map(|symbol| {
            let start = symbol.location.position();
            let end = Position::new(start.line, start.column + symbol.name.len() as u32);
            RenameContext {
                range: SourceRange::new(symbol.location.path.clone(), Range::new(start, end)),
                symbol,
            }
        }))
    }

    fn compute_rename(
        &self,
        context: &RenameContext,
        new_name: &str,
    ) -> FacadeResult<Vec<FileEdit>> {
        Ok(vec![FileEdit::new(
            &context.range.path,
            TextEdit::new(context.range.range, new_name),
        )])
    }

    fn documentation(&self, symbol: &ResolvedSymbol) -> FacadeResult<Option<String>> {
        Ok(Some(format!("Docs for {}", symbol.name)))
    }

    fn update_file_content(&self, path: &Path, text: &str) -> FacadeResult<()> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        self.set_text(path, text);
        Ok(())
    }

    fn dispose(&self) {
        self.disposed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Creates `facade-1`, `facade-2`, ... and remembers every instance.
#[derive(Default)]
pub struct FakeFactory {
    pub created: Mutex<Vec<Arc<FakeFacade>>>,
    pub fail_next: AtomicBool,
    /// Document texts carried over into every new facade, like an engine reading from disk.
    pub seed: Mutex<HashMap<PathBuf, String>>,
}

impl FakeFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn facade(&self, index: usize) -> Arc<FakeFacade> {
        Arc::clone(&self.created.lock().unwrap()[index])
    }

    pub fn latest(&self) -> Arc<FakeFacade> {
        let created = self.created.lock().unwrap();
        Arc::clone(created.last().unwrap())
    }

    pub fn count(&self) -> usize {
        self.created.lock().unwrap().len()
    }
}

impl FacadeFactory for FakeFactory {
    fn create(&self, model: &ProjectModel) -> FacadeResult<Arc<dyn SemanticFacade>> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(FacadeError::Construction("compiler environment unavailable".into()));
        }
        let mut created = self.created.lock().unwrap();
        let facade = Arc::new(FakeFacade::new(format!("facade-{}", created.len() + 1), model));
        for (path, text) in self.seed.lock().unwrap().iter() {
            facade.set_text(path, text);
        }
        created.push(Arc::clone(&facade));
        Ok(facade)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SinkEvent {
    Publish { uri: Url, diagnostics: Vec<DiagnosticInfo> },
    Clear { uri: Url },
    Log { level: MessageLevel, message: String },
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<SinkEvent>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<SinkEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn published(&self, uri: &Url) -> Vec<Vec<DiagnosticInfo>> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Publish { uri: u, diagnostics } if &u == uri => Some(diagnostics),
                _ => None,
            })
            .collect()
    }

    pub fn cleared(&self, uri: &Url) -> bool {
        self.events()
            .iter()
            .any(|event| matches!(event, SinkEvent::Clear { uri: u } if u == uri))
    }

    pub fn logs(&self) -> Vec<(MessageLevel, String)> {
        self.events()
            .into_iter()
            .filter_map(|event| match event {
                SinkEvent::Log { level, message } => Some((level, message)),
                _ => None,
            })
            .collect()
    }
}

impl PublicationSink for RecordingSink {
    fn publish(&self, uri: &Url, diagnostics: &[DiagnosticInfo]) {
        self.events.lock().unwrap().push(SinkEvent::Publish {
            uri: uri.clone(),
            diagnostics: diagnostics.to_vec(),
        });
    }

    fn clear(&self, uri: &Url) {
        self.events
            .lock()
            .unwrap()
            .push(SinkEvent::Clear { uri: uri.clone() });
    }

    fn log(&self, level: MessageLevel, message: &str) {
        self.events.lock().unwrap().push(SinkEvent::Log {
            level,
            message: message.to_string(),
        });
    }
}

pub fn uri(path: &Path) -> Url {
    Url::from_file_path(path).unwrap()
}
