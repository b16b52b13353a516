//! Signature handlers registered in the default dispatch table

pub mod archive;
pub mod delimited;
pub mod extract;

pub use archive::ArchiveHandler;
pub use delimited::{DelimitedHandler, SynthesisOutcome, TableSynthesizer};
pub use extract::ArchiveKind;
