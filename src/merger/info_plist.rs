//! `Info.plist` comparison and integrity injection.

use crate::merger::{
    error::{Error, ErrorExt, Result},
    integrity::{INTEGRITY_KEY, IntegrityMap, integrity_to_plist},
    utils::glob::GlobRule,
};
use std::path::Path;

/// A property list whose root is a dictionary.
#[derive(Clone, Debug, PartialEq)]
pub struct InfoPlist {
    dict: plist::Dictionary,
}

impl InfoPlist {
    /// Parses the XML or binary property list at `path`.
    pub async fn read(path: &Path) -> Result<Self> {
        let bytes = tokio::fs::read(path).await.fs_context("reading plist", path)?;
        let value = plist::Value::from_reader(std::io::Cursor::new(bytes))?;
        let dict = value.into_dictionary().ok_or_else(|| {
            Error::GenericError(format!("{} is not a dictionary plist", path.display()))
        })?;
        Ok(Self { dict })
    }

    /// Whether an integrity map is present.
    pub fn has_integrity(&self) -> bool {
        self.dict.contains_key(INTEGRITY_KEY)
    }

    /// Copy without the integrity key, keeping key order.
    pub fn without_integrity(&self) -> Self {
        let dict = self
            .dict
            .iter()
            .filter(|(key, _)| key.as_str() != INTEGRITY_KEY)
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        Self { dict }
    }

    /// Copy with `integrity` stored under the integrity key.
    pub fn with_integrity(&self, integrity: &IntegrityMap) -> Self {
        let mut merged = self.without_integrity();
        merged
            .dict
            .insert(INTEGRITY_KEY.to_string(), integrity_to_plist(integrity));
        merged
    }

    /// Underlying dictionary.
    pub fn as_dictionary(&self) -> &plist::Dictionary {
        &self.dict
    }

    /// Writes the plist as XML.
    pub async fn write(&self, path: &Path) -> Result<()> {
        let mut bytes = Vec::new();
        plist::Value::Dictionary(self.dict.clone()).to_writer_xml(&mut bytes)?;
        tokio::fs::write(path, bytes).await.fs_context("writing plist", path)
    }
}

/// Reconciles one `Info.plist` and writes the result into the scratch bundle.
///
/// Both inputs must agree on every key but the integrity key. Unless
/// `ignore` matches `relative_path`, `integrity` is injected. An ignored plist
/// whose x64 copy carries no integrity key is left untouched.
pub async fn inject_integrity(
    relative_path: &Path,
    x64_app: &Path,
    arm64_app: &Path,
    tmp_app: &Path,
    integrity: &IntegrityMap,
    ignore: Option<&GlobRule>,
) -> Result<()> {
    let x64 = InfoPlist::read(&x64_app.join(relative_path)).await?;
    let arm64 = InfoPlist::read(&arm64_app.join(relative_path)).await?;

    let x64_stripped = x64.without_integrity();
    if x64_stripped != arm64.without_integrity() {
        return Err(Error::PlistFieldMismatch {
            path: relative_path.to_path_buf(),
        });
    }

    let ignored = ignore.is_some_and(|rule| rule.matches(relative_path));
    let destination = tmp_app.join(relative_path);
    if !ignored {
        log::debug!("injecting archive integrity into {}", relative_path.display());
        x64.with_integrity(integrity).write(&destination).await
    } else if x64.has_integrity() {
        log::debug!("stripping archive integrity from {}", relative_path.display());
        x64_stripped.write(&destination).await
    } else {
        log::debug!("leaving {} unchanged", relative_path.display());
        Ok(())
    }
}
