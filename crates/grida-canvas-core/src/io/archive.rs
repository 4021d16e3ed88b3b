//! `.grida` archive container.
//!
//! ```text
//! archive.grida (zip)
//! ├── manifest.json      { document_file, version, images }
//! ├── document.json      { version, document }
//! └── images/<hash>      asset bytes, keyed by content hash
//! ```
//!
//! Packing is deterministic: entries are written in sorted order with a fixed
//! timestamp, so the same document always produces the same bytes.

use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipArchive, ZipWriter};

use crate::document::{Assets, Document, asset_hash};

/// Schema version written into new archives.
pub const SCHEMA_VERSION: &str = "0.0.1-beta.2+20251201";

pub const MANIFEST_FILE: &str = "manifest.json";
pub const DOCUMENT_FILE: &str = "document.json";
const IMAGES_DIR: &str = "images/";

/// Errors raised while packing or unpacking archives.
#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("archive schema {found} is newer than supported {supported}")]
    VersionUnsupported { found: String, supported: String },
    #[error("corrupt archive: {0}")]
    Corrupt(String),
    #[error("archive is missing {0}")]
    MissingEntry(String),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageEntry {
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub document_file: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub images: BTreeMap<String, ImageEntry>,
}

#[derive(Serialize)]
struct SnapshotRef<'a> {
    version: &'a str,
    document: &'a Document,
}

/// The persisted JSON snapshot.
#[derive(Debug, Deserialize)]
pub struct Snapshot {
    #[serde(default)]
    pub version: Option<String>,
    pub document: Document,
}

fn major(version: &str) -> Option<u64> {
    version.split(['.', '-', '+']).next()?.parse().ok()
}

/// Reject schemas with a newer major version. Missing or unparsable versions
/// are treated as legacy and accepted.
pub fn check_version(version: Option<&str>) -> Result<(), ArchiveError> {
    let (Some(found), Some(supported)) = (version.and_then(major), major(SCHEMA_VERSION)) else {
        return Ok(());
    };
    if found > supported {
        return Err(ArchiveError::VersionUnsupported {
            found: version.unwrap_or_default().to_string(),
            supported: SCHEMA_VERSION.to_string(),
        });
    }
    Ok(())
}

/// Serialize the document snapshot (`{version, document}`).
pub fn snapshot_json(doc: &Document) -> Result<String, ArchiveError> {
    Ok(serde_json::to_string(&SnapshotRef {
        version: SCHEMA_VERSION,
        document: doc,
    })?)
}

/// Parse a snapshot, checking its schema version first.
pub fn parse_snapshot(json: &str) -> Result<Snapshot, ArchiveError> {
    #[derive(Deserialize)]
    struct VersionHeader {
        #[serde(default)]
        version: Option<String>,
    }
    let header: VersionHeader = serde_json::from_str(json)?;
    check_version(header.version.as_deref())?;
    Ok(serde_json::from_str(json)?)
}

/// Pack a document and its assets into a `.grida` archive.
pub fn pack(doc: &Document) -> Result<Vec<u8>, ArchiveError> {
    let manifest = Manifest {
        document_file: DOCUMENT_FILE.to_string(),
        version: Some(SCHEMA_VERSION.to_string()),
        images: doc
            .assets()
            .iter()
            .map(|(hash, bytes)| (hash.clone(), ImageEntry { bytes: bytes.len() }))
            .collect(),
    };

    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));

    zip.start_file(DOCUMENT_FILE, options)?;
    zip.write_all(snapshot_json(doc)?.as_bytes())?;
    for (hash, bytes) in doc.assets() {
        zip.start_file(format!("{IMAGES_DIR}{hash}"), options)?;
        zip.write_all(bytes)?;
    }
    zip.start_file(MANIFEST_FILE, options)?;
    zip.write_all(serde_json::to_string(&manifest)?.as_bytes())?;

    Ok(zip.finish()?.into_inner())
}

/// Whether `bytes` look like a zip container.
pub fn is_zip(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

/// Read a `.grida` archive, or a raw JSON snapshot.
///
/// Never returns a partially loaded document: any failure leaves the caller's
/// current document untouched.
pub fn unpack(bytes: &[u8]) -> Result<Document, ArchiveError> {
    if !is_zip(bytes) {
        let json = std::str::from_utf8(bytes)
            .map_err(|e| ArchiveError::Corrupt(format!("not a zip or utf-8 json: {e}")))?;
        log::debug!("reading raw json snapshot");
        return Ok(parse_snapshot(json)?.document);
    }

    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let manifest: Manifest = serde_json::from_str(&read_entry(&mut archive, MANIFEST_FILE)?)?;
    check_version(manifest.version.as_deref())?;

    let snapshot = parse_snapshot(&read_entry(&mut archive, &manifest.document_file)?)?;
    let mut doc = snapshot.document;

    let mut assets = Assets::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let Some(hash) = file.name().strip_prefix(IMAGES_DIR).map(str::to_string) else {
            continue;
        };
        if hash.is_empty() || file.is_dir() {
            continue;
        }
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;
        if asset_hash(&data) != hash {
            return Err(ArchiveError::Corrupt(format!("asset {hash} does not match its content")));
        }
        assets.insert(hash, data);
    }
    for hash in manifest.images.keys() {
        if !assets.contains_key(hash) {
            return Err(ArchiveError::MissingEntry(format!("{IMAGES_DIR}{hash}")));
        }
    }
    doc.set_assets(assets);
    Ok(doc)
}

fn read_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, name: &str) -> Result<String, ArchiveError> {
    let mut file = match archive.by_name(name) {
        Ok(file) => file,
        Err(zip::result::ZipError::FileNotFound) => {
            return Err(ArchiveError::MissingEntry(name.to_string()));
        }
        Err(e) => return Err(e.into()),
    };
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    Ok(contents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{self, Command};
    use crate::document::Fragment;
    use crate::node::{BoxData, ImageData, Node, NodeKind};

    fn sample() -> Document {
        let mut doc = Document::with_default_scene();
        let hash = doc.add_asset(vec![1, 2, 3, 4]);
        let image = Node::new(
            "img",
            NodeKind::Image(ImageData {
                image_ref: hash,
                width: 4.0,
                height: 4.0,
            }),
        );
        let rect = Node::new("rect", NodeKind::Rectangle(BoxData::new(10.0, 20.0))).with_name("Box");
        for node in [image, rect] {
            command::apply(
                &mut doc,
                Command::Insert {
                    fragment: Fragment::single(node),
                    parent: None,
                    index: None,
                },
            )
            .unwrap();
        }
        doc
    }

    #[test]
    fn test_pack_unpack_roundtrip() {
        let doc = sample();
        let bytes = pack(&doc).unwrap();
        assert!(is_zip(&bytes));
        assert_eq!(unpack(&bytes).unwrap(), doc);
    }

    #[test]
    fn test_pack_is_deterministic() {
        let doc = sample();
        assert_eq!(pack(&doc).unwrap(), pack(&doc).unwrap());
    }

    #[test]
    fn test_raw_json_snapshot_is_accepted() {
        let doc = sample();
        let mut expected = doc.clone();
        expected.set_assets(Assets::new());
        let json = snapshot_json(&doc).unwrap();
        assert_eq!(unpack(json.as_bytes()).unwrap(), expected);
    }

    #[test]
    fn test_legacy_snapshot_without_version() {
        let json = r#"{"document":{"scenes_ref":["s"],"links":{"s":[]},"nodes":{"s":{"id":"s","type":"scene"}}}}"#;
        let doc = unpack(json.as_bytes()).unwrap();
        assert_eq!(doc.scenes_ref(), &[crate::node::NodeId::from("s")]);
    }

    #[test]
    fn test_newer_major_is_rejected() {
        let json = r#"{"version":"1.0.0","document":{}}"#;
        assert!(matches!(
            unpack(json.as_bytes()),
            Err(ArchiveError::VersionUnsupported { .. })
        ));
        assert!(check_version(Some("0.9.0")).is_ok());
    }

    #[test]
    fn test_missing_document_entry() {
        let options = SimpleFileOptions::default();
        let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
        zip.start_file(MANIFEST_FILE, options).unwrap();
        zip.write_all(br#"{"document_file":"document.json"}"#).unwrap();
        let bytes = zip.finish().unwrap().into_inner();
        assert!(matches!(unpack(&bytes), Err(ArchiveError::MissingEntry(_))));
    }

    #[test]
    fn test_garbage_is_corrupt() {
        assert!(unpack(&[0xff, 0xfe, 0x00]).is_err());
    }
}
