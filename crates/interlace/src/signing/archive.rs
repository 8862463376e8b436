//! Gzipped tarballs carrying a manifest as the signed message.

use std::io::Read;
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use crate::error::SigningError;
use crate::workspace::MANIFEST_FILE_NAME;

type Result<T> = std::result::Result<T, SigningError>;

const ENTRY_MODE: u32 = 0o644;

/// Packs `manifest` as a single `manifest.yaml` entry with fixed metadata.
pub fn pack_manifest(manifest: &[u8]) -> Result<Vec<u8>> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);

    let mut header = tar::Header::new_gnu();
    header.set_size(manifest.len() as u64);
    header.set_mode(ENTRY_MODE);
    header.set_mtime(0);
    header.set_entry_type(tar::EntryType::Regular);
    builder
        .append_data(&mut header, MANIFEST_FILE_NAME, manifest)
        .map_err(|e| SigningError::Encode(format!("failed to archive manifest: {}", e)))?;

    let encoder = builder
        .into_inner()
        .map_err(|e| SigningError::Encode(format!("failed to finish archive: {}", e)))?;
    encoder
        .finish()
        .map_err(|e| SigningError::Encode(format!("failed to compress archive: {}", e)))
}

/// Concatenates every `.yaml`/`.yml` entry of a gzipped tarball, in archive order.
pub fn unpack_yamls(blob: &[u8]) -> Result<String> {
    let mut archive = tar::Archive::new(GzDecoder::new(blob));
    let entries = archive
        .entries()
        .map_err(|e| SigningError::Encode(format!("invalid archive: {}", e)))?;

    let mut docs = Vec::new();
    for entry in entries {
        let mut entry =
            entry.map_err(|e| SigningError::Encode(format!("invalid archive entry: {}", e)))?;
        if !entry.header().entry_type().is_file() {
            continue;
        }
        let is_yaml = entry
            .path()
            .ok()
            .as_deref()
            .and_then(Path::extension)
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext == "yaml" || ext == "yml");
        if !is_yaml {
            continue;
        }

        let mut content = String::new();
        entry
            .read_to_string(&mut content)
            .map_err(|e| SigningError::Encode(format!("unreadable archive entry: {}", e)))?;
        docs.push(content);
    }

    Ok(crate::manifest::concat_documents(docs))
}
