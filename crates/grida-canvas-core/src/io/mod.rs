//! Serialization gateway: archives, interchange JSON and SVG import.

pub mod archive;
pub mod json;
pub mod svg;

pub use archive::{ArchiveError, Manifest, SCHEMA_VERSION, pack, unpack};
pub use json::DocumentInit;
pub use svg::{SvgError, create_node_from_svg};
