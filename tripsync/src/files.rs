use crate::error::{Error, Result};
use bytes::Bytes;
use rand::{distributions::Alphanumeric, Rng};
use std::path::{Component, Path, PathBuf};
use tokio::fs;
use tracing::debug;

/// Filesystem-backed object store. Objects are addressed by slash-separated
/// paths and served below `<public_base>/objects/`.
#[derive(Debug, Clone)]
pub struct ObjectStore {
    root: PathBuf,
    public_base: String,
}

/// Random id for an uploaded object file name.
pub fn random_object_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(16)
        .map(char::from)
        .collect()
}

impl ObjectStore {
    pub fn new(root: impl Into<PathBuf>, public_origin: &str) -> Self {
        Self {
            root: root.into(),
            public_base: format!("{}/objects", public_origin.trim_end_matches('/')),
        }
    }

    /// Resolve an object path to its file, rejecting anything that could
    /// escape the store root.
    pub fn local_path(&self, object_path: &str) -> Result<PathBuf> {
        let invalid = || Error::validation(format!("invalid object path {object_path:?}"));
        if object_path.is_empty() {
            return Err(invalid());
        }
        let mut out = self.root.clone();
        for segment in object_path.split('/') {
            if segment.is_empty() || segment.contains('\\') || segment.contains('\0') {
                return Err(invalid());
            }
            let mut parts = Path::new(segment).components();
            match (parts.next(), parts.next()) {
                (Some(Component::Normal(_)), None) => out.push(segment),
                _ => return Err(invalid()),
            }
        }
        Ok(out)
    }

    pub fn url_for(&self, object_path: &str) -> String {
        format!("{}/{}", self.public_base, object_path)
    }

    /// Object path of a URL produced by [`ObjectStore::url_for`], if it is one.
    pub fn path_from_url<'a>(&self, url: &'a str) -> Option<&'a str> {
        url.strip_prefix(self.public_base.as_str())?
            .strip_prefix('/')
            .filter(|p| !p.is_empty())
    }

    /// Write an object and return its public URL.
    pub async fn put(&self, object_path: &str, data: Bytes) -> Result<String> {
        let path = self.local_path(object_path)?;
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).await?;
        }
        fs::write(&path, &data).await?;
        debug!(object_path, bytes = data.len(), "object stored");
        Ok(self.url_for(object_path))
    }

    /// Remove an object. Returns whether something was deleted.
    pub async fn delete(&self, object_path: &str) -> Result<bool> {
        let path = self.local_path(object_path)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}
