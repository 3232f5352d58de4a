use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{read_jsonl, StoreError};
use crate::kernel::encoding::extension_for;
use crate::kernel::time::Timestamp;

const INDEX_FILE: &str = "index.jsonl";

/// Metadata of a persisted clip. The audio blob lives next to the index in
/// `file` and is read on demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClipSegment {
    pub id: u64,
    pub encoding: String,
    pub at: Timestamp,
    pub time: String,
    pub file: String,
    pub bytes: u64,
}

impl ClipSegment {
    pub fn extension(&self) -> &'static str {
        extension_for(&self.encoding)
    }

    /// `recording_YYYYMMDD_HHMM.<ext>` in local time.
    pub fn download_name(&self) -> String {
        format!("recording_{}.{}", self.at.local().format("%Y%m%d_%H%M"), self.extension())
    }
}

/// Evidence store: grows until an explicit clear, no eviction.
pub struct ClipStore {
    dir: PathBuf,
    index: File,
    clips: Vec<ClipSegment>,
    next_id: u64,
}

impl ClipStore {
    pub fn open(dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(dir)?;
        let index_path = dir.join(INDEX_FILE);

        let (clips, torn) = read_jsonl::<ClipSegment>(&index_path)?;
        let next_id = clips.iter().map(|c| c.id).max().unwrap_or(0) + 1;
        let mut index = OpenOptions::new().create(true).append(true).open(&index_path)?;
        if torn {
            index.write_all(b"\n")?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            index,
            clips,
            next_id,
        })
    }

    /// Blob first, then the index line: a crash in between leaves an orphan
    /// file, never an index entry without audio.
    pub fn append(&mut self, audio: &[u8], encoding: &str, at: Timestamp) -> Result<ClipSegment, StoreError> {
        let id = self.next_id;
        let file = format!("clip-{:06}.{}", id, extension_for(encoding));
        fs::write(self.dir.join(&file), audio)?;

        let clip = ClipSegment {
            id,
            encoding: encoding.to_string(),
            at,
            time: at.clock_string(),
            file,
            bytes: audio.len() as u64,
        };
        let mut line = serde_json::to_string(&clip)?;
        line.push('\n');
        self.index.write_all(line.as_bytes())?;
        self.index.flush()?;

        self.next_id += 1;
        self.clips.push(clip.clone());
        Ok(clip)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<ClipSegment> {
        let mut all = self.clips.clone();
        all.sort_by(|a, b| b.at.cmp(&a.at).then(b.id.cmp(&a.id)));
        all
    }

    pub fn path_of(&self, clip: &ClipSegment) -> PathBuf {
        self.dir.join(&clip.file)
    }

    pub fn read_audio(&self, id: u64) -> Result<Vec<u8>, StoreError> {
        let clip = self.find(id)?;
        Ok(fs::read(self.path_of(clip))?)
    }

    /// The blob goes first; memory and index only drop the entry once it is gone.
    pub fn remove(&mut self, id: u64) -> Result<(), StoreError> {
        let pos = self
            .clips
            .iter()
            .position(|c| c.id == id)
            .ok_or(StoreError::NotFound(id))?;
        remove_if_present(&self.path_of(&self.clips[pos]))?;

        let mut remaining = self.clips.clone();
        remaining.remove(pos);
        self.write_index(&remaining)?;
        self.clips = remaining;
        Ok(())
    }

    /// Delete every clip. Safe to call on an empty store. A failure part way
    /// keeps the clips that were not deleted, in memory and in the index.
    pub fn clear(&mut self) -> Result<(), StoreError> {
        let mut deleted = 0;
        let mut failure = None;
        for clip in &self.clips {
            if let Err(e) = remove_if_present(&self.dir.join(&clip.file)) {
                failure = Some(e);
                break;
            }
            deleted += 1;
        }

        let remaining = self.clips[deleted..].to_vec();
        self.write_index(&remaining)?;
        self.clips = remaining;
        if let Some(e) = failure {
            warn!("Clear stopped after {} clips: {}", deleted, e);
            return Err(e);
        }
        info!("Cleared {} clips", deleted);
        Ok(())
    }

    /// Copy every clip into `dest` under its download name, newest first.
    /// Names that collide within the same minute get the clip id appended.
    pub fn export_to(&self, dest: &Path) -> Result<Vec<PathBuf>, StoreError> {
        fs::create_dir_all(dest)?;
        let mut used = HashSet::new();
        let mut written = Vec::new();

        for clip in self.list() {
            let mut name = clip.download_name();
            if !used.insert(name.clone()) {
                name = format!(
                    "{}_{}.{}",
                    name.trim_end_matches(&format!(".{}", clip.extension())),
                    clip.id,
                    clip.extension()
                );
                used.insert(name.clone());
            }
            let target = dest.join(&name);
            match fs::copy(self.path_of(&clip), &target) {
                Ok(_) => written.push(target),
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    warn!("Clip {} is missing its audio file, skipped", clip.id);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(written)
    }

    pub fn len(&self) -> usize {
        self.clips.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clips.is_empty()
    }

    fn find(&self, id: u64) -> Result<&ClipSegment, StoreError> {
        self.clips.iter().find(|c| c.id == id).ok_or(StoreError::NotFound(id))
    }

    fn write_index(&mut self, clips: &[ClipSegment]) -> Result<(), StoreError> {
        let index_path = self.dir.join(INDEX_FILE);
        let tmp_path = self.dir.join(format!("{}.tmp", INDEX_FILE));

        let mut body = String::new();
        for clip in clips {
            body.push_str(&serde_json::to_string(clip)?);
            body.push('\n');
        }
        fs::write(&tmp_path, body)?;
        fs::rename(&tmp_path, &index_path)?;

        self.index = OpenOptions::new().append(true).open(&index_path)?;
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
