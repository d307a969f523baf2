//! Archive header fingerprints recorded in `Info.plist`.

use crate::merger::{
    asar::header::read_raw_header,
    checksum::sha256_hex,
    error::Result,
    files::{AppFileType, get_all_app_files},
    macho::NativeBinaryInspector,
    utils::glob::to_slash,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Property-list key holding the integrity map.
pub const INTEGRITY_KEY: &str = "ElectronAsarIntegrity";

/// Hash algorithm identifier.
pub const INTEGRITY_ALGORITHM: &str = "SHA256";

/// Fingerprint of one archive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AsarIntegrity {
    /// Always [`INTEGRITY_ALGORITHM`]
    pub algorithm: String,
    /// Hex SHA-256 of the archive's header JSON
    pub hash: String,
}

impl AsarIntegrity {
    fn to_plist(&self) -> plist::Value {
        let mut dict = plist::Dictionary::new();
        dict.insert("algorithm".to_string(), self.algorithm.clone().into());
        dict.insert("hash".to_string(), self.hash.clone().into());
        plist::Value::Dictionary(dict)
    }
}

/// `Resources/<path>` to fingerprint, sorted by key.
pub type IntegrityMap = BTreeMap<String, AsarIntegrity>;

/// Fingerprints the archive at `asar` from its header alone.
pub async fn generate_asar_integrity(asar: &Path) -> Result<AsarIntegrity> {
    let raw = read_raw_header(asar).await?;
    Ok(AsarIntegrity {
        algorithm: INTEGRITY_ALGORITHM.to_string(),
        hash: sha256_hex(raw.header_string.as_bytes()),
    })
}

/// Fingerprints every archive under `<contents>/Resources`.
pub async fn compute_integrity_data<I: NativeBinaryInspector>(
    contents: &Path,
    inspector: &I,
) -> Result<IntegrityMap> {
    let resources = contents.join("Resources");
    let files = get_all_app_files(&resources, None, inspector).await?;

    let mut map = IntegrityMap::new();
    for file in files
        .iter()
        .filter(|f| f.file_type == AppFileType::ArchiveCode)
    {
        let key = format!("Resources/{}", to_slash(&file.relative_path));
        let integrity = generate_asar_integrity(&resources.join(&file.relative_path)).await?;
        log::debug!("integrity {} = {}", key, integrity.hash);
        map.insert(key, integrity);
    }

    Ok(map)
}

/// The map as a property-list dictionary value.
pub fn integrity_to_plist(map: &IntegrityMap) -> plist::Value {
    let dict: plist::Dictionary = map
        .iter()
        .map(|(key, integrity)| (key.clone(), integrity.to_plist()))
        .collect();
    plist::Value::Dictionary(dict)
}
