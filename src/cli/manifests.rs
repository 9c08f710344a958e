//! Manifest loading for `vmimport run`.
//!
//! Every `*.json` file in the manifest directory holds one object or an
//! array of objects. Each object names its kind in a top-level `kind` field;
//! objects without a namespace land in `default`.

use crate::resources::{
    ConfigMap, NetworkAttachmentDefinition, Resource, ResourceMapping, Secret, StorageClass,
    VirtualMachineImport,
};
use crate::store::{ObjectStore, StoreError};
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;

const DEFAULT_NAMESPACE: &str = "default";

/// Errors from loading a manifest directory.
#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid manifest {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Manifest {path} has an object without a kind")]
    MissingKind { path: PathBuf },

    #[error("Manifest {path}: unsupported kind '{kind}'")]
    UnsupportedKind { path: PathBuf, kind: String },

    #[error("Manifest {path}: {source}")]
    Store {
        path: PathBuf,
        #[source]
        source: StoreError,
    },
}

/// Load every manifest in `dir` into the store. Returns the number of objects created.
///
/// Files are loaded in name order so later files can rely on earlier ones.
pub fn load_manifests(dir: &Path, store: &ObjectStore) -> Result<usize, ManifestError> {
    let io_error = |source| ManifestError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .map_err(io_error)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| path.extension().is_some_and(|ext| ext == "json"))
        .collect();
    files.sort();

    let mut created = 0;
    for path in files {
        created += load_file(&path, store)?;
    }
    Ok(created)
}

fn load_file(path: &Path, store: &ObjectStore) -> Result<usize, ManifestError> {
    let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value = serde_json::from_str(&content).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let objects = match value {
        Value::Array(items) => items,
        other => vec![other],
    };
    let count = objects.len();
    for object in objects {
        create_object(path, object, store)?;
    }
    tracing::debug!(path = %path.display(), objects = count, "Manifest loaded");
    Ok(count)
}

fn create_object(path: &Path, mut object: Value, store: &ObjectStore) -> Result<(), ManifestError> {
    let kind = object
        .as_object_mut()
        .and_then(|map| map.remove("kind"))
        .and_then(|kind| kind.as_str().map(str::to_string))
        .ok_or_else(|| ManifestError::MissingKind {
            path: path.to_path_buf(),
        })?;

    match kind.as_str() {
        VirtualMachineImport::KIND => create_typed::<VirtualMachineImport>(path, object, store),
        ResourceMapping::KIND => create_typed::<ResourceMapping>(path, object, store),
        Secret::KIND => create_typed::<Secret>(path, object, store),
        ConfigMap::KIND => create_typed::<ConfigMap>(path, object, store),
        NetworkAttachmentDefinition::KIND => {
            create_typed::<NetworkAttachmentDefinition>(path, object, store)
        }
        StorageClass::KIND => create_typed::<StorageClass>(path, object, store),
        _ => Err(ManifestError::UnsupportedKind {
            path: path.to_path_buf(),
            kind,
        }),
    }
}

fn create_typed<R: Resource>(
    path: &Path,
    object: Value,
    store: &ObjectStore,
) -> Result<(), ManifestError> {
    let mut resource: R = serde_json::from_value(object).map_err(|e| ManifestError::Parse {
        path: path.to_path_buf(),
        message: format!("{}: {}", R::KIND, e),
    })?;
    let meta = resource.metadata_mut();
    if R::NAMESPACED && meta.namespace.is_empty() {
        meta.namespace = DEFAULT_NAMESPACE.to_string();
    }

    store.create(&resource).map_err(|source| ManifestError::Store {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
