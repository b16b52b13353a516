//! Content signature classification
//!
//! A signature is a libmagic-style description of a file's content, derived
//! from its leading bytes and never from its name. Two backends:
//!
//! - [`MagicClassifier`]: in-process sniffing of the formats the pipeline
//!   cares about
//! - [`FileCommandClassifier`]: shells out to `file -b`; the binary must be
//!   present at startup or construction fails with a configuration error

use crate::config::{ClassifierBackend, IngestConfig};
use crate::error::{IngestError, Result};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tracing::debug;

/// Number of leading bytes inspected by the built-in sniffer
pub const SNIFF_LEN: usize = 64 * 1024;

const CRLF_SUFFIX: &str = ", with CRLF line terminators";
const CR_SUFFIX: &str = ", with CR line terminators";

pub trait Classifier: Send + Sync {
    fn name(&self) -> &'static str;

    /// Describe the content of the file at `path`
    fn classify(&self, path: &Path) -> Result<String>;
}

/// Build the classifier selected by configuration
pub fn from_config(config: &IngestConfig) -> Result<Arc<dyn Classifier>> {
    Ok(match config.classifier {
        ClassifierBackend::Builtin => Arc::new(MagicClassifier),
        ClassifierBackend::FileCommand => Arc::new(FileCommandClassifier::new()?),
    })
}

/// Built-in magic-number sniffer
#[derive(Debug, Clone, Copy, Default)]
pub struct MagicClassifier;

impl Classifier for MagicClassifier {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn classify(&self, path: &Path) -> Result<String> {
        let file = std::fs::File::open(path).map_err(|e| IngestError::Classification {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        let mut head = Vec::with_capacity(SNIFF_LEN);
        file.take(SNIFF_LEN as u64).read_to_end(&mut head)?;

        let signature = describe(&head);
        debug!(path = %path.display(), signature = %signature, "Classified file");
        Ok(signature)
    }
}

/// Describe a buffer holding the first bytes of a file
pub fn describe(head: &[u8]) -> String {
    if head.is_empty() {
        return "empty".to_string();
    }

    if let Some(binary) = describe_binary(head) {
        return binary;
    }

    describe_text(head).unwrap_or_else(|| "data".to_string())
}

fn describe_binary(head: &[u8]) -> Option<String> {
    if head.starts_with(b"PK\x03\x04") {
        let version = read_u16(head, 4).unwrap_or(20);
        return Some(format!(
            "Zip archive data, at least v{}.{} to extract",
            version / 10,
            version % 10
        ));
    }
    if head.starts_with(b"PK\x05\x06") {
        return Some("Zip archive data (empty)".to_string());
    }
    if head.starts_with(&[0x1f, 0x8b]) {
        return Some("gzip compressed data".to_string());
    }
    if head.starts_with(b"BZh") {
        return Some("bzip2 compressed data".to_string());
    }
    if let Some(magic) = head.get(257..265) {
        if magic == b"ustar  \0" {
            return Some("POSIX tar archive (GNU)".to_string());
        }
        if magic.starts_with(b"ustar") {
            return Some("POSIX tar archive".to_string());
        }
    }
    if head.starts_with(b"MZ") {
        return Some(describe_executable(head));
    }
    if let Some(rest) = head.strip_prefix(b"%PDF-") {
        let version: String = rest
            .iter()
            .take_while(|b| b.is_ascii_digit() || **b == b'.')
            .map(|b| *b as char)
            .collect();
        return Some(format!("PDF document, version {}", version));
    }
    if head.starts_with(b"\x89PNG\r\n\x1a\n") {
        return Some("PNG image data".to_string());
    }
    if head.starts_with(&[0xff, 0xd8, 0xff]) {
        return Some("JPEG image data".to_string());
    }
    if head.starts_with(b"GIF87a") || head.starts_with(b"GIF89a") {
        return Some(format!("GIF image data, version {}", String::from_utf8_lossy(&head[3..6])));
    }
    None
}

fn describe_executable(head: &[u8]) -> String {
    let dos = "MS-DOS executable".to_string();

    let Some(offset) = read_u32(head, 0x3c).map(|o| o as usize) else {
        return dos;
    };
    if head.get(offset..offset + 4) != Some(b"PE\0\0") {
        return dos;
    }

    let machine = match read_u16(head, offset + 4) {
        Some(0x014c) => "Intel 80386",
        Some(0x8664) => "x86-64",
        Some(0xaa64) => "Aarch64",
        _ => "unknown processor",
    };

    let optional = offset + 24;
    let format = match read_u16(head, optional) {
        Some(0x020b) => "PE32+",
        _ => "PE32",
    };
    let subsystem = match read_u16(head, optional + 68) {
        Some(2) => "(GUI)",
        Some(3) => "(console)",
        _ => "",
    };

    let mut out = format!("{} executable", format);
    if !subsystem.is_empty() {
        out.push(' ');
        out.push_str(subsystem);
    }
    out.push_str(&format!(" {}, for MS Windows", machine));
    out
}

fn describe_text(head: &[u8]) -> Option<String> {
    let (body, bom) = match head.strip_prefix(b"\xef\xbb\xbf") {
        Some(body) => (body, true),
        None => (head, false),
    };

    if body.iter().any(|&b| is_binary_control(b)) {
        return None;
    }

    let encoding = if body.is_ascii() && !bom {
        "ASCII text"
    } else if is_utf8_prefix(body) {
        if bom {
            "UTF-8 Unicode (with BOM) text"
        } else {
            "UTF-8 Unicode text"
        }
    } else {
        "Non-ISO extended-ASCII text"
    };

    let trimmed = body.trim_ascii_start();
    let lower: Vec<u8> = trimmed.iter().take(15).map(u8::to_ascii_lowercase).collect();
    let mut out = if lower.starts_with(b"<?xml") {
        "XML document text".to_string()
    } else if lower.starts_with(b"<!doctype html") || lower.starts_with(b"<html") {
        "HTML document text".to_string()
    } else {
        encoding.to_string()
    };

    if body.windows(2).any(|w| w == b"\r\n") {
        out.push_str(CRLF_SUFFIX);
    } else if body.contains(&b'\r') {
        out.push_str(CR_SUFFIX);
    }

    Some(out)
}

/// Control bytes that never appear in text files (tab, newlines, form feed,
/// escape and backspace are allowed)
fn is_binary_control(b: u8) -> bool {
    matches!(b, 0x00..=0x06 | 0x0e..=0x1a | 0x1c..=0x1f | 0x7f)
}

/// Valid UTF-8, allowing a sequence cut short by the sniff window
fn is_utf8_prefix(bytes: &[u8]) -> bool {
    match std::str::from_utf8(bytes) {
        Ok(_) => true,
        Err(e) => e.error_len().is_none() && bytes.len() >= SNIFF_LEN - 3,
    }
}

fn read_u16(buf: &[u8], at: usize) -> Option<u16> {
    buf.get(at..at + 2).map(|b| u16::from_le_bytes([b[0], b[1]]))
}

fn read_u32(buf: &[u8], at: usize) -> Option<u32> {
    buf.get(at..at + 4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
}

/// Classifier backed by the system `file` utility
#[derive(Debug, Clone)]
pub struct FileCommandClassifier {
    program: PathBuf,
}

impl FileCommandClassifier {
    /// Locate `file` on the PATH
    pub fn new() -> Result<Self> {
        let program = which::which("file").map_err(|e| {
            IngestError::config(format!("content sniffing unavailable, `file` not found: {}", e))
        })?;
        Ok(Self { program })
    }
}

impl Classifier for FileCommandClassifier {
    fn name(&self) -> &'static str {
        "file-command"
    }

    fn classify(&self, path: &Path) -> Result<String> {
        let output = Command::new(&self.program).arg("-b").arg(path).output()?;

        if !output.status.success() {
            return Err(IngestError::Classification {
                path: path.display().to_string(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let signature = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!(path = %path.display(), signature = %signature, "Classified file");
        Ok(signature)
    }
}
