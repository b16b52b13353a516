//! Archive expansion handler
//!
//! Extracts an archive, moves its members into a directory of their own next
//! to it (`<archive file name>.d/`), registers each member as a child entity
//! of the archive and hands the members back to the dispatcher. Sibling
//! archives holding members of the same name therefore never share a path
//! or an entity. The archive itself is deleted once every member has been
//! recorded; if extraction fails it is left in place and no children are
//! created.

use super::extract::{self, ArchiveKind};
use crate::dispatch::{PendingFile, SignatureHandler};
use crate::error::Result;
use crate::graph::{keys, EntityGraph, EntityId};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

const MEMBER_DIR_SUFFIX: &str = ".d";

/// Directory the members of `archive` are moved into
pub fn member_dir(archive: &Path) -> PathBuf {
    let mut name = archive.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(MEMBER_DIR_SUFFIX);
    archive.with_file_name(name)
}

pub struct ArchiveHandler {
    graph: EntityGraph,
    kind: ArchiveKind,
    timeout: Duration,
}

impl ArchiveHandler {
    pub fn new(graph: EntityGraph, kind: ArchiveKind, timeout: Duration) -> Self {
        Self {
            graph,
            kind,
            timeout,
        }
    }
}

#[async_trait]
impl SignatureHandler for ArchiveHandler {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    async fn handle(&self, file: &Path, entity: EntityId) -> Result<Vec<PendingFile>> {
        let extraction = extract::extract(self.kind, file, self.timeout).await?;
        self.graph.set_fact(entity, keys::FORMAT, extraction.format)?;

        let dir = member_dir(file);
        let mut pending = Vec::with_capacity(extraction.members.len());

        for member in &extraction.members {
            let target = dir.join(member);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)?;
            }
            if target.is_file() {
                std::fs::remove_file(&target)?;
            }
            std::fs::rename(extraction.staged(member), &target)?;

            let name = target.display().to_string();
            let child = self.graph.get_or_create_child(&name, entity)?;
            self.graph.set_fact(child, keys::FILENAME, name.as_str())?;
            pending.push(PendingFile {
                path: target,
                entity: child,
            });
        }
        drop(extraction);

        if let Err(e) = std::fs::remove_file(file) {
            warn!(archive = %file.display(), error = %e, "Failed to remove expanded archive");
        }

        info!(
            archive = %file.display(),
            format = self.kind.name(),
            members = pending.len(),
            "Expanded archive"
        );
        Ok(pending)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::error::IngestError;
    use crate::graph::FactValue;
    use crate::store::Store;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use pretty_assertions::assert_eq;
    use std::fs::File;
    use std::io::Write;

    fn write_zip(path: &Path, files: &[(&str, &str)]) {
        let mut zip = zip::ZipWriter::new(File::create(path).unwrap());
        for (name, content) in files {
            zip.start_file(*name, zip::write::SimpleFileOptions::default()).unwrap();
            zip.write_all(content.as_bytes()).unwrap();
        }
        zip.finish().unwrap();
    }

    fn setup(dir: &Path, archive: &Path) -> (EntityGraph, EntityId, ArchiveHandler) {
        let graph = EntityGraph::new(Store::open_in_memory().unwrap());
        let root = graph.get_or_create(&dir.display().to_string()).unwrap();
        let entity = graph.get_or_create_child(&archive.display().to_string(), root).unwrap();
        let handler = ArchiveHandler::new(graph.clone(), ArchiveKind::Zip, Duration::from_secs(30));
        (graph, entity, handler)
    }

    #[tokio::test]
    async fn test_members_become_children() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("994.zip");
        write_zip(&archive, &[("rows.csv", "name,value\nfoo,1\n"), ("readme.txt", "hello\n")]);
        let (graph, entity, handler) = setup(dir.path(), &archive);

        let pending = handler.handle(&archive, entity).await.unwrap();

        assert_eq!(pending.len(), 2);
        assert!(!archive.exists());
        assert_eq!(graph.children(entity).unwrap(), vec![pending[0].entity, pending[1].entity]);

        let member = dir.path().join("994.zip.d").join("rows.csv");
        assert_eq!(pending[0].path, member);
        assert_eq!(
            graph.fact(pending[0].entity, keys::FILENAME).unwrap(),
            Some(FactValue::from(member.display().to_string()))
        );
        assert_eq!(graph.fact(entity, keys::FORMAT).unwrap(), Some(FactValue::from("zip")));
    }

    #[tokio::test]
    async fn test_reextraction_reuses_children() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("994.zip");
        write_zip(&archive, &[("rows.csv", "name,value\nfoo,1\n")]);
        let (graph, entity, handler) = setup(dir.path(), &archive);

        let first = handler.handle(&archive, entity).await.unwrap();
        write_zip(&archive, &[("rows.csv", "name,value\nfoo,1\n")]);
        let second = handler.handle(&archive, entity).await.unwrap();

        assert_eq!(first[0].entity, second[0].entity);
        assert_eq!(graph.children(entity).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sibling_archives_keep_members_apart() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("a.zip");
        let second = dir.path().join("b.zip");
        write_zip(&first, &[("rows.csv", "name,value\nalpha,1\n")]);
        write_zip(&second, &[("rows.csv", "name,value\nbeta,2\nbeta,3\n")]);
        let (graph, first_entity, handler) = setup(dir.path(), &first);
        let second_entity = graph
            .get_or_create_child(&second.display().to_string(), graph.parent(first_entity).unwrap().unwrap())
            .unwrap();

        let from_first = handler.handle(&first, first_entity).await.unwrap();
        let from_second = handler.handle(&second, second_entity).await.unwrap();

        assert_ne!(from_first[0].entity, from_second[0].entity);
        assert_eq!(graph.children(first_entity).unwrap(), vec![from_first[0].entity]);
        assert_eq!(graph.children(second_entity).unwrap(), vec![from_second[0].entity]);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("a.zip.d/rows.csv")).unwrap(),
            "name,value\nalpha,1\n"
        );
        assert_eq!(
            std::fs::read_to_string(dir.path().join("b.zip.d/rows.csv")).unwrap(),
            "name,value\nbeta,2\nbeta,3\n"
        );
    }

    #[test]
    fn test_member_dir() {
        assert_eq!(member_dir(Path::new("/data/994.zip")), PathBuf::from("/data/994.zip.d"));
        assert_eq!(member_dir(Path::new("rows.csv.gz")), PathBuf::from("rows.csv.gz.d"));
    }

    #[tokio::test]
    async fn test_extraction_timeout_leaves_archive_intact() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("big.csv.gz");
        {
            let mut encoder = GzEncoder::new(File::create(&archive).unwrap(), Compression::fast());
            let block = vec![b'0'; 1 << 20];
            for _ in 0..32 {
                encoder.write_all(&block).unwrap();
            }
            encoder.finish().unwrap();
        }
        let graph = EntityGraph::new(Store::open_in_memory().unwrap());
        let entity = graph.get_or_create(&archive.display().to_string()).unwrap();
        let handler = ArchiveHandler::new(graph.clone(), ArchiveKind::Gzip, Duration::ZERO);

        let err = handler.handle(&archive, entity).await.unwrap_err();

        assert!(matches!(err, IngestError::Timeout { .. }));
        assert!(archive.exists());
        assert!(graph.children(entity).unwrap().is_empty());
        assert!(graph.fact(entity, keys::FORMAT).unwrap().is_none());

        // the abandoned extraction removes its staging directory once it stops
        let mut leftovers = usize::MAX;
        for _ in 0..100 {
            leftovers = std::fs::read_dir(dir.path()).unwrap().count();
            if leftovers == 1 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(leftovers, 1);
    }

    #[tokio::test]
    async fn test_corrupt_archive_left_intact() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("broken.zip");
        std::fs::write(&archive, b"PK\x03\x04 not really a zip").unwrap();
        let (graph, entity, handler) = setup(dir.path(), &archive);

        assert!(handler.handle(&archive, entity).await.is_err());
        assert!(archive.exists());
        assert!(graph.children(entity).unwrap().is_empty());

        let leftovers: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(leftovers.len(), 1);
    }
}
