use crate::item::DicomTransmission;
use crate::{Error, Result};
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

/// File-per-item spool.
///
/// Each transmission lives in `{id}.json`; writes go through a temporary
/// file, a rename and an fsync so a crash leaves either the previous record
/// or the new one, never a torn file.
#[derive(Debug)]
pub struct SpoolStore {
    dir: PathBuf,
}

impl SpoolStore {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    pub fn save(&self, item: &DicomTransmission) -> Result<()> {
        let path = self.path_for(&item.id);
        let tmp = path.with_extension("json.tmp");
        let content = serde_json::to_vec_pretty(item)?;
        std::fs::write(&tmp, content)?;
        let file = std::fs::File::open(&tmp)?;
        file.sync_all()?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Loads every parseable record, oldest first.
    ///
    /// An unparseable file is skipped with a warning rather than taking the
    /// whole queue down; the affected transmission surfaces through queue
    /// monitoring instead.
    pub fn load_all(&self) -> Result<Vec<DicomTransmission>> {
        let mut items = vec![];
        for entry in WalkDir::new(&self.dir)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = std::fs::read_to_string(path)?;
            match serde_json::from_str::<DicomTransmission>(&content) {
                Ok(item) => items.push(item),
                Err(e) => warn!("Skipping unparseable spool file {}: {}", path.display(), e),
            }
        }
        items.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(items)
    }

    pub fn remove(&self, id: &str) -> Result<()> {
        let path = self.path_for(id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Encode(e.to_string())
    }
}
