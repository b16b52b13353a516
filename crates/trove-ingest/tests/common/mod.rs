//! Shared fixtures for trove-ingest integration tests

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use flate2::write::GzEncoder;
use flate2::Compression;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use trove_ingest::graph::keys;
use trove_ingest::tables::{SynthesizedTable, TableRegistry};
use trove_ingest::{EntityGraph, EntityId, IngestConfig, Ingestor, Store};

/// An ingestor over an in-memory store with scratch source and data dirs
pub struct TestEnv {
    pub source: TempDir,
    pub data: TempDir,
    pub ingestor: Ingestor,
}

impl TestEnv {
    pub fn new() -> Self {
        let source = tempfile::tempdir().unwrap();
        let data = tempfile::tempdir().unwrap();
        let config = IngestConfig {
            data_dir: data.path().to_path_buf(),
            ..IngestConfig::default()
        };
        let graph = EntityGraph::new(Store::open_in_memory().unwrap());
        let ingestor = Ingestor::with_graph(config, graph).unwrap();

        Self {
            source,
            data,
            ingestor,
        }
    }

    pub fn graph(&self) -> &EntityGraph {
        self.ingestor.graph()
    }

    pub fn tables(&self) -> TableRegistry {
        TableRegistry::from_graph(self.graph())
    }

    /// Write a file into the source directory
    pub fn source_file(&self, name: &str, content: &[u8]) -> PathBuf {
        let path = self.source.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(&path, content).unwrap();
        path
    }

    /// Where a local candidate lands in the data directory
    pub fn stored(&self, relative: &str) -> PathBuf {
        self.data.path().join("localhost").join(relative)
    }

    pub fn source_url(&self) -> String {
        self.source.path().display().to_string()
    }

    pub fn entity(&self, name: impl AsRef<Path>) -> EntityId {
        let name = name.as_ref().display().to_string();
        self.graph()
            .find(&name)
            .unwrap()
            .unwrap_or_else(|| panic!("no entity named {}", name))
    }

    pub fn table(&self, entity: EntityId) -> SynthesizedTable {
        self.tables().for_entity(entity).unwrap().expect("entity has no table")
    }

    pub fn rows(&self, entity: EntityId) -> Vec<Vec<String>> {
        let table = self.table(entity);
        self.tables().rows(&table).unwrap()
    }

    pub fn text(&self, entity: EntityId, key: &str) -> Option<String> {
        self.graph()
            .fact(entity, key)
            .unwrap()
            .and_then(|v| v.as_text().map(str::to_string))
    }

    pub fn processed(&self, entity: EntityId) -> Option<bool> {
        self.graph()
            .fact(entity, keys::PROCESSED)
            .unwrap()
            .and_then(|v| v.as_bool())
    }
}

pub fn zip_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut zip = zip::ZipWriter::new(std::io::Cursor::new(Vec::new()));
    for (name, content) in files {
        zip.start_file(*name, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(content).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

pub fn tgz_bytes(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (name, content) in files {
        let mut header = tar::Header::new_ustar();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content).unwrap();
    }
    let tar = builder.into_inner().unwrap();

    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&tar).unwrap();
    encoder.finish().unwrap()
}

pub fn write(path: &Path, content: &[u8]) {
    File::create(path).unwrap().write_all(content).unwrap();
}
