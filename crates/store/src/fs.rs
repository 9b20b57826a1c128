use super::{Error, ObjectMeta, ObjectStore, Result};
use bytes::Bytes;
use std::path::{Path, PathBuf};

/// Object store backed by a local directory: keys are `/`-separated paths
/// below `root`. Used for local operation of the agent binary.
#[derive(Debug, Clone)]
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, key: &str) -> Result<PathBuf> {
        if key.is_empty() || key.split('/').any(|part| matches!(part, "" | "." | "..")) {
            return Err(Error::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(key))
    }
}

/// Recursively collect files below `dir` as `/`-separated keys relative
/// to `root`.
fn walk(root: &Path, dir: &Path, out: &mut Vec<ObjectMeta>) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let meta = entry.metadata()?;
        let path = entry.path();

        if meta.is_dir() {
            walk(root, &path, out)?;
        } else {
            let key = path
                .strip_prefix(root)
                .expect("walked path is below root")
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            out.push(ObjectMeta { key, size: meta.len() });
        }
    }
    Ok(())
}

#[async_trait::async_trait]
impl ObjectStore for FsStore {
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let root = self.root.clone();
        let prefix = prefix.to_string();

        let mut objects = tokio::task::spawn_blocking(move || {
            let mut out = Vec::new();
            match walk(&root, &root, &mut out) {
                Ok(()) => Ok(out),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(out),
                Err(err) => Err(err),
            }
        })
        .await
        .expect("list task does not panic")?;

        objects.retain(|object| object.key.starts_with(&prefix));
        objects.sort_by(|lhs, rhs| lhs.key.cmp(&rhs.key));
        Ok(objects)
    }

    async fn get(&self, key: &str) -> Result<Bytes> {
        match tokio::fs::read(self.resolve(key)?).await {
            Ok(body) => Ok(body.into()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(Error::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, body: Bytes) -> Result<()> {
        let path = self.resolve(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, &body).await?;
        Ok(())
    }

    async fn delete(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            match tokio::fs::remove_file(self.resolve(key)?).await {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => (),
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}
