//! Signature dispatch
//!
//! An ordered list of `(matcher, handler)` rules. A file is classified, the
//! rules are scanned in declaration order and the first match handles it;
//! exact and pattern matchers share the same order. Handlers may hand back
//! newly discovered files (archive members), which are pushed onto an
//! explicit work stack and dispatched in turn, so nesting depth never grows
//! the call stack.
//!
//! ```text
//! dispatch(archive.zip)
//!   classify -> "Zip archive data"      -> ArchiveHandler(zip)
//!     pending: a.csv, inner.tgz
//!   classify(a.csv) -> "ASCII text"     -> DelimitedHandler
//!   classify(inner.tgz) -> "gzip ..."   -> ArchiveHandler(tgz)
//!     pending: b.csv
//!   classify(b.csv) -> "ASCII text"     -> DelimitedHandler
//! ```
//!
//! Handler failures never escape: they are logged and recorded on the
//! entity (`processed = false`, `error`), and the remaining work continues.

use crate::config::IngestConfig;
use crate::dialect::DialectRegistry;
use crate::error::{IngestError, Result};
use crate::graph::{keys, EntityGraph, EntityId};
use crate::handlers::{ArchiveHandler, ArchiveKind, DelimitedHandler};
use crate::signature::Classifier;
use async_trait::async_trait;
use futures::future::join_all;
use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// A file waiting to be dispatched, already registered as an entity
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingFile {
    pub path: PathBuf,
    pub entity: EntityId,
}

#[async_trait]
pub trait SignatureHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process `file`, returning any files it produced for further dispatch
    async fn handle(&self, file: &Path, entity: EntityId) -> Result<Vec<PendingFile>>;
}

#[derive(Debug, Clone)]
pub enum SignatureMatcher {
    Exact(String),
    /// Anchored at the start of the signature
    Pattern(Regex),
}

impl SignatureMatcher {
    pub fn exact(signature: impl Into<String>) -> Self {
        Self::Exact(signature.into())
    }

    /// Compile `pattern`, anchoring it at the start of the signature
    pub fn pattern(pattern: &str) -> Result<Self> {
        let anchored = if pattern.starts_with('^') {
            pattern.to_string()
        } else {
            format!("^(?:{})", pattern)
        };
        Regex::new(&anchored)
            .map(Self::Pattern)
            .map_err(|e| IngestError::config(format!("Invalid signature pattern {}: {}", pattern, e)))
    }

    pub fn matches(&self, signature: &str) -> bool {
        match self {
            Self::Exact(expected) => expected == signature,
            Self::Pattern(regex) => regex.is_match(signature),
        }
    }
}

#[derive(Clone)]
pub struct DispatchRule {
    pub matcher: SignatureMatcher,
    pub handler: Arc<dyn SignatureHandler>,
}

impl DispatchRule {
    pub fn new(matcher: SignatureMatcher, handler: Arc<dyn SignatureHandler>) -> Self {
        Self { matcher, handler }
    }
}

impl std::fmt::Debug for DispatchRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchRule")
            .field("matcher", &self.matcher)
            .field("handler", &self.handler.name())
            .finish()
    }
}

#[derive(Debug)]
struct WorkItem {
    file: PendingFile,
    depth: usize,
}

pub struct Dispatcher {
    classifier: Arc<dyn Classifier>,
    rules: Vec<DispatchRule>,
    graph: EntityGraph,
    workers: usize,
    max_depth: usize,
}

impl Dispatcher {
    pub fn new(
        classifier: Arc<dyn Classifier>,
        rules: Vec<DispatchRule>,
        graph: EntityGraph,
        workers: usize,
        max_depth: usize,
    ) -> Self {
        Self {
            classifier,
            rules,
            graph,
            workers: workers.max(1),
            max_depth,
        }
    }

    /// The standard rule table: self-extracting executables and zip files,
    /// gzip (tar or single stream), plain tar, then delimited text (newer
    /// libmagic reports CSV files as `CSV text`)
    pub fn with_default_rules(
        classifier: Arc<dyn Classifier>,
        graph: EntityGraph,
        dialects: DialectRegistry,
        config: &IngestConfig,
    ) -> Result<Self> {
        let timeout = config.extract_timeout();
        let zip: Arc<dyn SignatureHandler> =
            Arc::new(ArchiveHandler::new(graph.clone(), ArchiveKind::Zip, timeout));
        let gzip: Arc<dyn SignatureHandler> =
            Arc::new(ArchiveHandler::new(graph.clone(), ArchiveKind::Gzip, timeout));
        let tar: Arc<dyn SignatureHandler> =
            Arc::new(ArchiveHandler::new(graph.clone(), ArchiveKind::Tar, timeout));
        let text: Arc<dyn SignatureHandler> =
            Arc::new(DelimitedHandler::new(graph.clone(), dialects));

        let rules = vec![
            DispatchRule::new(SignatureMatcher::pattern(r"PE32 executable.*for MS Windows")?, zip.clone()),
            DispatchRule::new(SignatureMatcher::pattern("Zip")?, zip),
            DispatchRule::new(SignatureMatcher::pattern("gzip compressed data")?, gzip),
            DispatchRule::new(SignatureMatcher::pattern("POSIX tar archive")?, tar),
            DispatchRule::new(SignatureMatcher::pattern("CSV")?, text.clone()),
            DispatchRule::new(SignatureMatcher::pattern("ASCII")?, text.clone()),
            DispatchRule::new(SignatureMatcher::pattern("Non-ISO extended-ASCII")?, text.clone()),
            DispatchRule::new(SignatureMatcher::pattern("UTF-8")?, text.clone()),
            DispatchRule::new(SignatureMatcher::pattern("Unicode text, UTF-8")?, text),
        ];

        Ok(Self::new(
            classifier,
            rules,
            graph,
            config.dispatch_workers,
            config.max_archive_depth,
        ))
    }

    pub fn graph(&self) -> &EntityGraph {
        &self.graph
    }

    pub fn rules(&self) -> &[DispatchRule] {
        &self.rules
    }

    /// First rule matching `signature`, in declaration order
    pub fn select(&self, signature: &str) -> Option<&DispatchRule> {
        self.rules.iter().find(|rule| rule.matcher.matches(signature))
    }

    /// Classify and handle `path`, then everything it expands into
    ///
    /// Returns the signature of `path` itself. Only a failure to classify or
    /// record that top-level file is returned as an error.
    #[instrument(skip_all, fields(path = %path.display(), entity = %entity))]
    pub async fn dispatch(&self, path: &Path, entity: EntityId) -> Result<String> {
        let root = PendingFile {
            path: path.to_path_buf(),
            entity,
        };
        let (signature, pending) = self.process(&root).await?;

        let mut stack: Vec<WorkItem> = Vec::new();
        push_children(&mut stack, pending, 1);

        while !stack.is_empty() {
            let wave: Vec<WorkItem> = (0..self.workers).map_while(|_| stack.pop()).collect();
            let results = join_all(wave.iter().map(|item| self.process_nested(item))).await;

            for (item, children) in wave.into_iter().zip(results) {
                push_children(&mut stack, children, item.depth + 1);
            }
        }

        Ok(signature)
    }

    async fn process_nested(&self, item: &WorkItem) -> Vec<PendingFile> {
        let file = &item.file;

        if item.depth > self.max_depth {
            warn!(
                path = %file.path.display(),
                depth = item.depth,
                max_depth = self.max_depth,
                "Archive nesting too deep, not dispatching"
            );
            self.record_failure(file.entity, &format!("archive nesting exceeds depth {}", self.max_depth));
            return Vec::new();
        }

        match self.process(file).await {
            Ok((_, children)) => children,
            Err(e) => {
                error!(path = %file.path.display(), error = %e, "Dispatch failed");
                self.record_failure(file.entity, &e.to_string());
                Vec::new()
            },
        }
    }

    async fn process(&self, file: &PendingFile) -> Result<(String, Vec<PendingFile>)> {
        let classifier = self.classifier.clone();
        let path = file.path.clone();
        let signature = tokio::task::spawn_blocking(move || classifier.classify(&path)).await??;
        self.graph.set_fact(file.entity, keys::SIGNATURE, signature.as_str())?;

        let Some(rule) = self.select(&signature) else {
            warn!(path = %file.path.display(), signature = %signature, "No handler for signature");
            self.graph.set_fact(file.entity, keys::PROCESSED, false)?;
            return Ok((signature, Vec::new()));
        };

        info!(
            handler = rule.handler.name(),
            signature = %signature,
            path = %file.path.display(),
            "Calling handler"
        );

        match rule.handler.handle(&file.path, file.entity).await {
            Ok(children) => {
                debug!(handler = rule.handler.name(), discovered = children.len(), "Handler finished");
                self.graph.set_fact(file.entity, keys::PROCESSED, true)?;
                Ok((signature, children))
            },
            Err(e) => {
                error!(
                    handler = rule.handler.name(),
                    path = %file.path.display(),
                    error = %e,
                    "Handler failed"
                );
                self.record_failure(file.entity, &e.to_string());
                Ok((signature, Vec::new()))
            },
        }
    }

    fn record_failure(&self, entity: EntityId, reason: &str) {
        let recorded = self
            .graph
            .set_fact(entity, keys::PROCESSED, false)
            .and_then(|_| self.graph.set_fact(entity, keys::ERROR, reason));
        if let Err(e) = recorded {
            warn!(entity = %entity, error = %e, "Failed to record dispatch failure");
        }
    }
}

/// Push so the first child is popped first
fn push_children(stack: &mut Vec<WorkItem>, children: Vec<PendingFile>, depth: usize) {
    stack.extend(
        children
            .into_iter()
            .rev()
            .map(|file| WorkItem { file, depth }),
    );
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("classifier", &self.classifier.name())
            .field("rules", &self.rules)
            .field("workers", &self.workers)
            .field("max_depth", &self.max_depth)
            .finish()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::graph::FactValue;
    use crate::store::Store;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Uses the file's content as its signature
    struct ContentClassifier;

    impl Classifier for ContentClassifier {
        fn name(&self) -> &'static str {
            "content"
        }

        fn classify(&self, path: &Path) -> Result<String> {
            Ok(std::fs::read_to_string(path)?.trim().to_string())
        }
    }

    #[derive(Default)]
    struct Recorder {
        name: &'static str,
        calls: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl SignatureHandler for Recorder {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn handle(&self, file: &Path, _entity: EntityId) -> Result<Vec<PendingFile>> {
            self.calls.lock().unwrap().push(file.to_path_buf());
            Ok(Vec::new())
        }
    }

    struct Failing;

    #[async_trait]
    impl SignatureHandler for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn handle(&self, _file: &Path, _entity: EntityId) -> Result<Vec<PendingFile>> {
            Err(IngestError::synthesis("no header record"))
        }
    }

    /// Every file it handles "contains" one more nested file of the same kind
    struct Nesting {
        graph: EntityGraph,
        dir: PathBuf,
    }

    #[async_trait]
    impl SignatureHandler for Nesting {
        fn name(&self) -> &'static str {
            "nesting"
        }

        async fn handle(&self, file: &Path, entity: EntityId) -> Result<Vec<PendingFile>> {
            let path = self.dir.join(format!("{}.n", file.file_name().unwrap().to_string_lossy()));
            std::fs::write(&path, "nested")?;
            let child = self.graph.get_or_create_child(&path.display().to_string(), entity)?;
            Ok(vec![PendingFile { path, entity: child }])
        }
    }

    fn setup(content: &str) -> (tempfile::TempDir, EntityGraph, PathBuf, EntityId) {
        let dir = tempfile::tempdir().unwrap();
        let graph = EntityGraph::new(Store::open_in_memory().unwrap());
        let path = dir.path().join("input");
        std::fs::write(&path, content).unwrap();
        let entity = graph.get_or_create(&path.display().to_string()).unwrap();
        (dir, graph, path, entity)
    }

    #[test]
    fn test_matchers() {
        assert!(SignatureMatcher::pattern("Zip").unwrap().matches("Zip archive data"));
        assert!(!SignatureMatcher::pattern("Zip").unwrap().matches("Not a Zip"));
        assert!(SignatureMatcher::exact("empty").matches("empty"));
        assert!(!SignatureMatcher::exact("empty").matches("empty file"));
        assert!(SignatureMatcher::pattern("(").is_err());
    }

    #[tokio::test]
    async fn test_first_match_wins() {
        let (_dir, graph, path, entity) = setup("ASCII text");
        let first = Arc::new(Recorder { name: "first", ..Default::default() });
        let second = Arc::new(Recorder { name: "second", ..Default::default() });

        let dispatcher = Dispatcher::new(
            Arc::new(ContentClassifier),
            vec![
                DispatchRule::new(SignatureMatcher::pattern("ASCII").unwrap(), first.clone()),
                DispatchRule::new(SignatureMatcher::exact("ASCII text"), second.clone()),
            ],
            graph.clone(),
            2,
            8,
        );

        let signature = dispatcher.dispatch(&path, entity).await.unwrap();

        assert_eq!(signature, "ASCII text");
        assert_eq!(first.calls.lock().unwrap().len(), 1);
        assert!(second.calls.lock().unwrap().is_empty());
        assert_eq!(graph.fact(entity, keys::PROCESSED).unwrap(), Some(FactValue::Bool(true)));
    }

    #[tokio::test]
    async fn test_unhandled_signature_is_recorded() {
        let (_dir, graph, path, entity) = setup("PDF document, version 1.4");
        let recorder = Arc::new(Recorder { name: "text", ..Default::default() });
        let dispatcher = Dispatcher::new(
            Arc::new(ContentClassifier),
            vec![DispatchRule::new(SignatureMatcher::pattern("ASCII").unwrap(), recorder.clone())],
            graph.clone(),
            1,
            8,
        );

        let signature = dispatcher.dispatch(&path, entity).await.unwrap();

        assert_eq!(signature, "PDF document, version 1.4");
        assert!(recorder.calls.lock().unwrap().is_empty());
        let entity = graph.entity(entity).unwrap();
        assert_eq!(entity.text(keys::SIGNATURE), Some("PDF document, version 1.4"));
        assert_eq!(entity.fact(keys::PROCESSED), Some(&FactValue::Bool(false)));
    }

    #[tokio::test]
    async fn test_handler_failure_is_isolated() {
        let (_dir, graph, path, entity) = setup("ASCII text");
        let dispatcher = Dispatcher::new(
            Arc::new(ContentClassifier),
            vec![DispatchRule::new(SignatureMatcher::pattern("ASCII").unwrap(), Arc::new(Failing))],
            graph.clone(),
            1,
            8,
        );

        assert_eq!(dispatcher.dispatch(&path, entity).await.unwrap(), "ASCII text");

        let entity = graph.entity(entity).unwrap();
        assert_eq!(entity.fact(keys::PROCESSED), Some(&FactValue::Bool(false)));
        assert!(entity.text(keys::ERROR).unwrap().contains("no header record"));
    }

    #[tokio::test]
    async fn test_nesting_stops_at_max_depth() {
        let (dir, graph, path, entity) = setup("nested");
        let handler = Arc::new(Nesting {
            graph: graph.clone(),
            dir: dir.path().to_path_buf(),
        });
        let dispatcher = Dispatcher::new(
            Arc::new(ContentClassifier),
            vec![DispatchRule::new(SignatureMatcher::exact("nested"), handler)],
            graph.clone(),
            4,
            3,
        );

        dispatcher.dispatch(&path, entity).await.unwrap();

        let mut chain = vec![entity];
        while let Some(child) = graph.child_at(*chain.last().unwrap(), 0).unwrap() {
            chain.push(child);
        }
        // root plus three expanded levels plus the one left undispatched
        assert_eq!(chain.len(), 5);

        let deepest = graph.entity(*chain.last().unwrap()).unwrap();
        assert_eq!(deepest.fact(keys::PROCESSED), Some(&FactValue::Bool(false)));
        assert!(deepest.fact(keys::SIGNATURE).is_none());
        assert!(deepest.text(keys::ERROR).unwrap().contains("depth 3"));
    }

    /// Always reports the same signature
    struct Fixed(&'static str);

    impl Classifier for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn classify(&self, _path: &Path) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_default_rules_route_signatures() {
        let graph = EntityGraph::new(Store::open_in_memory().unwrap());
        let dispatcher = Dispatcher::with_default_rules(
            Arc::new(Fixed("data")),
            graph,
            DialectRegistry::default(),
            &IngestConfig::default(),
        )
        .unwrap();
        let handler = |signature: &str| dispatcher.select(signature).map(|rule| rule.handler.name());

        assert_eq!(handler("CSV text"), Some("delimited"));
        assert_eq!(handler("CSV ASCII text, with CRLF line terminators"), Some("delimited"));
        assert_eq!(handler("ASCII text"), Some("delimited"));
        assert_eq!(handler("UTF-8 Unicode text"), Some("delimited"));
        assert_eq!(handler("Zip archive data, at least v2.0 to extract"), Some("zip"));
        assert_eq!(handler("PE32 executable (GUI) Intel 80386, for MS Windows"), Some("zip"));
        assert_eq!(handler("gzip compressed data"), Some("gzip"));
        assert_eq!(handler("POSIX tar archive"), Some("tar"));
        assert_eq!(handler("PNG image data"), None);
    }

    #[tokio::test]
    async fn test_csv_signature_is_synthesized() {
        let (_dir, graph, path, entity) = setup("name,value\nfoo,1\nbar,2\n");
        let dispatcher = Dispatcher::with_default_rules(
            Arc::new(Fixed("CSV text")),
            graph.clone(),
            DialectRegistry::default(),
            &IngestConfig::default(),
        )
        .unwrap();

        assert_eq!(dispatcher.dispatch(&path, entity).await.unwrap(), "CSV text");

        let entity = graph.entity(entity).unwrap();
        assert_eq!(entity.fact(keys::PROCESSED), Some(&FactValue::Bool(true)));
        assert_eq!(entity.fact(keys::ROW_COUNT), Some(&FactValue::Number(2.0)));
        assert!(entity.text(keys::TABLE_NAME).is_some());
    }

    #[tokio::test]
    async fn test_missing_file_is_an_error_at_top_level() {
        let (dir, graph, _path, entity) = setup("ASCII text");
        let dispatcher =
            Dispatcher::new(Arc::new(ContentClassifier), Vec::new(), graph, 1, 8);

        assert!(dispatcher.dispatch(&dir.path().join("missing"), entity).await.is_err());
    }
}
