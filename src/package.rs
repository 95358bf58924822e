//! Template packages: `template.json` plus an `assets/` directory,
//! shipped as a zip archive (or a plain directory with the same shape).
//!
//! Loading clears the content store and fills it with every `assets/`
//! entry keyed by its path relative to `assets/`. Entries that are OS
//! noise (`__MACOSX/`, `.DS_Store`, `Thumbs.db`, AppleDouble `._*` files)
//! are skipped. A package without `template.json` fails with
//! [`PackageError::MissingTemplateDefinition`].

use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

use tracing::debug;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::ZipWriter;
use zip::read::ZipArchive;
use zip::write::SimpleFileOptions;

use thiserror::Error;

use crate::content::ContentStore;
use crate::template::{Template, TemplateError};

/// Name of the template document inside a package.
pub const TEMPLATE_FILENAME: &str = "template.json";
/// Directory prefix for package assets.
pub const ASSETS_PREFIX: &str = "assets/";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("package has no {TEMPLATE_FILENAME}")]
    MissingTemplateDefinition,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
    #[error("template error: {0}")]
    Template(#[from] TemplateError),
}

/// Whether an archive entry is filesystem noise to skip.
fn is_os_noise(name: &str) -> bool {
    name.split('/').any(|part| {
        part == "__MACOSX" || part == ".DS_Store" || part == "Thumbs.db" || part.starts_with("._")
    })
}

/// Load a template package from a zip archive, replacing the store's
/// contents with the package assets.
pub fn load_package<R: Read + Seek>(
    reader: R,
    store: &mut ContentStore,
) -> Result<Template, PackageError> {
    let mut archive = ZipArchive::new(reader)?;

    let mut template_json: Option<String> = None;
    let mut assets: Vec<(String, Vec<u8>)> = Vec::new();

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let name = entry.name().to_string();
        if name.ends_with('/') || is_os_noise(&name) {
            continue;
        }
        if name == TEMPLATE_FILENAME {
            let mut json = String::new();
            entry.read_to_string(&mut json)?;
            template_json = Some(json);
        } else if let Some(asset_name) = name.strip_prefix(ASSETS_PREFIX) {
            let mut bytes = Vec::new();
            entry.read_to_end(&mut bytes)?;
            assets.push((asset_name.to_string(), bytes));
        }
    }

    let json = template_json.ok_or(PackageError::MissingTemplateDefinition)?;
    let template = Template::from_json(&json)?;

    store.clear();
    for (name, bytes) in assets {
        store.insert(name, bytes);
    }
    debug!(template = %template.name, assets = store.len(), "package loaded");
    Ok(template)
}

/// Load a package zip from disk.
pub fn load_package_path(path: &Path, store: &mut ContentStore) -> Result<Template, PackageError> {
    let file = File::open(path)?;
    load_package(file, store)
}

/// Load a package laid out as a plain directory (`template.json` at the
/// root, assets under `assets/`).
pub fn load_package_dir(dir: &Path, store: &mut ContentStore) -> Result<Template, PackageError> {
    let template_path = dir.join(TEMPLATE_FILENAME);
    if !template_path.exists() {
        return Err(PackageError::MissingTemplateDefinition);
    }
    let json = std::fs::read_to_string(&template_path)?;
    let template = Template::from_json(&json)?;

    store.clear();
    let assets_dir = dir.join("assets");
    if assets_dir.is_dir() {
        for entry in WalkDir::new(&assets_dir)
            .into_iter()
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_file())
        {
            let Ok(relative) = entry.path().strip_prefix(&assets_dir) else {
                continue;
            };
            let relative = relative.to_string_lossy().replace('\\', "/");
            if is_os_noise(&relative) {
                continue;
            }
            store.insert(relative, std::fs::read(entry.path())?);
        }
    }
    debug!(template = %template.name, assets = store.len(), "package directory loaded");
    Ok(template)
}

/// Write the inverse archive: `template.json` plus every store entry
/// under `assets/`.
pub fn save_package<W: Write + Seek>(
    template: &Template,
    store: &ContentStore,
    writer: W,
) -> Result<(), PackageError> {
    let mut zip = ZipWriter::new(writer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    zip.start_file(TEMPLATE_FILENAME, options)?;
    zip.write_all(template.to_json()?.as_bytes())?;

    for (name, bytes) in store.iter() {
        zip.start_file(format!("{ASSETS_PREFIX}{name}"), options)?;
        zip.write_all(bytes.as_slice())?;
    }
    zip.finish()?;
    Ok(())
}
