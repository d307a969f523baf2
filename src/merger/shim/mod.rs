//! Arch-dispatch entry points for payloads that cannot be merged.
//!
//! Both variants move the x64 payload to an arch-suffixed sibling, copy the
//! arm64 payload next to it, and pack a small entry (`index.js` plus the
//! original `package.json` with `main` overridden) into
//! `Contents/Resources/app.asar`.

pub mod templates;

use crate::merger::{
    asar::{Archive, PackOptions, create_package},
    error::{Error, ErrorExt, Result},
    layout::{self, APP_NAME, ASAR_EXTENSION},
    settings::Arch,
    utils::fs,
};
use handlebars::Handlebars;
use std::path::Path;

/// Entry file name written into the shim.
pub const SHIM_ENTRY: &str = "index.js";

/// Which payload the shim dispatches to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum ShimKind {
    /// `app-x64.asar` / `app-arm64.asar`
    Asar,
    /// `app-x64` / `app-arm64` folders
    Loose,
}

impl ShimKind {
    fn extension(&self) -> Option<&'static str> {
        match self {
            ShimKind::Asar => Some(ASAR_EXTENSION),
            ShimKind::Loose => None,
        }
    }

    fn template(&self) -> &'static str {
        match self {
            ShimKind::Asar => templates::ASAR_SHIM_TEMPLATE,
            ShimKind::Loose => templates::LOOSE_SHIM_TEMPLATE,
        }
    }

    /// Arch-suffixed payload name, e.g. `app-arm64.asar`.
    pub fn payload_name(&self, arch: Arch) -> String {
        arch.suffixed(APP_NAME, self.extension())
    }
}

/// Renders the shim `index.js` for `kind`.
pub fn render_entry(kind: ShimKind) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string(SHIM_ENTRY, kind.template())
        .map_err(|e| Error::GenericError(format!("failed to register shim template: {}", e)))?;

    let data = serde_json::json!({
        "x64": kind.payload_name(Arch::X64),
        "arm64": kind.payload_name(Arch::Arm64),
    });
    handlebars
        .render(SHIM_ENTRY, &data)
        .map_err(|e| Error::GenericError(format!("failed to render shim template: {}", e)))
}

/// Rewrites `package.json` so `main` points at the shim entry.
pub fn shim_package_json(original: &[u8]) -> Result<String> {
    let mut package: serde_json::Value = serde_json::from_slice(original)?;
    let object = package
        .as_object_mut()
        .ok_or_else(|| Error::GenericError("package.json is not a JSON object".into()))?;
    object.insert("main".to_string(), SHIM_ENTRY.into());
    Ok(serde_json::to_string(&package)?)
}

/// Writes the entry into `entry_dir` and packs it as `app.asar` of `tmp_app`.
async fn pack_entry(kind: ShimKind, package_json: &[u8], entry_dir: &Path, tmp_app: &Path) -> Result<()> {
    fs::remove_dir_all(entry_dir).await?;
    tokio::fs::create_dir_all(entry_dir)
        .await
        .fs_context("creating shim directory", entry_dir)?;

    let index = entry_dir.join(SHIM_ENTRY);
    tokio::fs::write(&index, render_entry(kind)?)
        .await
        .fs_context("writing shim entry", &index)?;
    let package = entry_dir.join("package.json");
    tokio::fs::write(&package, shim_package_json(package_json)?)
        .await
        .fs_context("writing shim package.json", &package)?;

    create_package(entry_dir, &layout::app_asar(tmp_app), &PackOptions::default()).await?;
    log::info!("✓ Generated {:?} entry shim", kind);
    Ok(())
}

/// Shims the loose `Contents/Resources/app` folders.
///
/// The scratch bundle's folder becomes `app-x64`, the arm64 folder is copied
/// in as `app-arm64`, and the entry's `package.json` comes from
/// `x64_input`'s folder.
pub async fn generate_loose_shim(
    tmp_app: &Path,
    arm64_app: &Path,
    x64_input: &Path,
    entry_dir: &Path,
) -> Result<()> {
    let resources = layout::resources_dir(tmp_app);
    let kind = ShimKind::Loose;

    fs::move_path(
        &layout::app_dir(tmp_app),
        &resources.join(kind.payload_name(Arch::X64)),
    )
    .await?;
    fs::copy_dir(
        &layout::app_dir(arm64_app),
        &resources.join(kind.payload_name(Arch::Arm64)),
    )
    .await?;

    let package_path = layout::app_dir(x64_input).join("package.json");
    let package_json = tokio::fs::read(&package_path)
        .await
        .fs_context("reading package.json", &package_path)?;

    pack_entry(kind, &package_json, entry_dir, tmp_app).await
}

/// Relocates `app.asar` (and its unpacked side directory) of `from_app` to
/// the arch-suffixed name inside `tmp_app`, moving or copying.
async fn relocate_archive(from_app: &Path, tmp_app: &Path, arch: Arch, move_files: bool) -> Result<()> {
    let source = layout::app_asar(from_app);
    let destination = layout::resources_dir(tmp_app).join(ShimKind::Asar.payload_name(arch));

    let pairs = [
        (source.clone(), destination.clone()),
        (layout::unpacked_dir(&source), layout::unpacked_dir(&destination)),
    ];
    for (from, to) in pairs {
        if !fs::path_exists(&from).await {
            continue;
        }
        if move_files {
            fs::move_path(&from, &to).await?;
        } else if tokio::fs::metadata(&from).await.fs_context("reading metadata", &from)?.is_dir() {
            fs::copy_dir(&from, &to).await?;
        } else {
            fs::copy_file(&from, &to).await?;
        }
    }
    Ok(())
}

/// Shims differing `app.asar` archives.
///
/// The scratch bundle's archive becomes `app-x64.asar`, the arm64 archive is
/// copied in as `app-arm64.asar`, and the entry's `package.json` is read
/// from the x64 archive.
pub async fn generate_asar_shim(tmp_app: &Path, arm64_app: &Path, entry_dir: &Path) -> Result<()> {
    let x64_archive = Archive::open(layout::app_asar(tmp_app)).await?;
    let package_json = x64_archive.read_file("package.json").await?;

    relocate_archive(tmp_app, tmp_app, Arch::X64, true).await?;
    relocate_archive(arm64_app, tmp_app, Arch::Arm64, false).await?;

    pack_entry(ShimKind::Asar, &package_json, entry_dir, tmp_app).await
}
