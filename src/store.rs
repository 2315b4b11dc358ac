use crate::FlatDict;
use anyhow::Context;
use flate2::{Compression, GzBuilder, read::GzDecoder};
use serde::{Serialize, de::DeserializeOwned};
use std::{
    fs,
    hash::Hash,
    io::{Read, Write},
    path::Path,
};

/// On-disk encodings for a persisted dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreFormat {
    Json5,
    GzipJson5,
}

/// Detects the encoding from the file extension, falling back to the gzip
/// magic bytes so a renamed `.gz` file still loads.
pub fn detect_format(path: &Path, bytes: &[u8]) -> StoreFormat {
    if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        return StoreFormat::GzipJson5;
    }
    // Gzip magic: 1F 8B
    if bytes.len() >= 2 && bytes[0] == 0x1F && bytes[1] == 0x8B {
        return StoreFormat::GzipJson5;
    }
    StoreFormat::Json5
}

/// Loads a dictionary from a JSON5 file, gunzipping if needed.
///
/// A duplicate-key load succeeds with the returned dictionary flagged invalid;
/// a key/value length mismatch fails the parse (headless contexts treat
/// malformed wire data as fatal).
pub fn load_path<K, V>(path: &Path) -> anyhow::Result<FlatDict<K, V>>
where
    K: DeserializeOwned + Hash + Eq + Clone,
    V: DeserializeOwned + Clone,
{
    let bytes = fs::read(path).with_context(|| format!("reading {path:?}"))?;
    from_slice(path, &bytes)
}

/// Parses already-read bytes, using `path` only for format detection and
/// error context.
pub fn from_slice<K, V>(path: &Path, bytes: &[u8]) -> anyhow::Result<FlatDict<K, V>>
where
    K: DeserializeOwned + Hash + Eq + Clone,
    V: DeserializeOwned + Clone,
{
    let text_bytes = match detect_format(path, bytes) {
        StoreFormat::Json5 => bytes.to_vec(),
        StoreFormat::GzipJson5 => {
            let mut decoder = GzDecoder::new(bytes);
            let mut out = Vec::new();
            decoder.read_to_end(&mut out).context("gzip decompress")?;
            out
        }
    };

    let text = std::str::from_utf8(&text_bytes).context("store file is not valid UTF-8")?;
    json5::from_str(text).context("parsing JSON5")
}

/// Saves a dictionary to `path`, gzipping when the extension is `.gz`.
pub fn save_path<K, V>(dict: &FlatDict<K, V>, path: &Path) -> anyhow::Result<()>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
{
    let target_format = if path.extension().and_then(|e| e.to_str()) == Some("gz") {
        StoreFormat::GzipJson5
    } else {
        StoreFormat::Json5
    };

    let bytes = to_bytes(dict, target_format)?;
    fs::write(path, &bytes).with_context(|| format!("writing {path:?}"))?;
    Ok(())
}

/// Encodes a dictionary for a format. Gzip output uses a zeroed mtime so
/// identical input produces identical bytes.
pub fn to_bytes<K, V>(dict: &FlatDict<K, V>, format: StoreFormat) -> anyhow::Result<Vec<u8>>
where
    K: Serialize + Hash + Eq,
    V: Serialize,
{
    let text = json5::to_string(dict).context("encoding JSON5")?;
    let text_bytes = text.as_bytes();

    match format {
        StoreFormat::Json5 => Ok(text_bytes.to_vec()),
        StoreFormat::GzipJson5 => {
            let mut encoder = GzBuilder::new()
                .mtime(0)
                .write(Vec::new(), Compression::default());
            encoder.write_all(text_bytes).context("gzip compress")?;
            let bytes = encoder.finish().context("gzip finish")?;
            Ok(bytes)
        }
    }
}
