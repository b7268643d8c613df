//! Background music library.
//!
//! Tracks live in a directory organized by mood:
//!
//! ```text
//! music/
//!   dramatic/   epic_battle.mp3, ...
//!   suspense/   tension.wav, ...
//!   general/    fallback tracks
//!   *.mp3       last resort
//! ```

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use reel_models::{AssetRef, MusicMood};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::collaborators::MusicSource;
use crate::config::MusicConfig;
use crate::error::{RemoteFailure, WorkerResult};

const GENERAL_DIR: &str = "general";
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav"];

/// Mood-organized music directory.
#[derive(Debug, Clone)]
pub struct MusicLibrary {
    root: PathBuf,
}

impl MusicLibrary {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(config: &MusicConfig) -> Self {
        Self::new(config.music_dir.clone())
    }

    /// Tracks eligible for `mood`: the mood folder, else `general/`, else
    /// the library root. Sorted by path.
    pub async fn candidates(&self, mood: MusicMood) -> WorkerResult<Vec<PathBuf>> {
        for dir in [
            self.root.join(mood.as_str()),
            self.root.join(GENERAL_DIR),
            self.root.clone(),
        ] {
            let tracks = list_tracks(&dir).await?;
            if !tracks.is_empty() {
                debug!(mood = %mood, dir = %dir.display(), count = tracks.len(), "Found music candidates");
                return Ok(tracks);
            }
        }
        Ok(Vec::new())
    }

    /// Pick the track for `mood`, stable for a given seed.
    pub async fn select(&self, mood: MusicMood, seed: &str) -> WorkerResult<Option<PathBuf>> {
        let candidates = self.candidates(mood).await?;
        let selected = pick_stable(&candidates, seed).cloned();
        match &selected {
            Some(path) => info!(mood = %mood, track = %path.display(), "Selected background music"),
            None => info!(mood = %mood, root = %self.root.display(), "No background music available"),
        }
        Ok(selected)
    }
}

#[async_trait]
impl MusicSource for MusicLibrary {
    async fn select_track(
        &self,
        mood: MusicMood,
        seed: &str,
    ) -> Result<Option<AssetRef>, RemoteFailure> {
        let path = self
            .select(mood, seed)
            .await
            .map_err(|e| RemoteFailure::permanent(e.to_string()))?;
        Ok(path.map(|p| AssetRef::new(p.to_string_lossy().into_owned())))
    }
}

/// Index into `candidates` derived from a SHA-256 of `seed`.
fn pick_stable<'a>(candidates: &'a [PathBuf], seed: &str) -> Option<&'a PathBuf> {
    if candidates.is_empty() {
        return None;
    }
    let digest = Sha256::digest(seed.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&digest[..8]);
    let index = (u64::from_be_bytes(prefix) % candidates.len() as u64) as usize;
    candidates.get(index)
}

/// Audio files directly inside `dir`. A missing directory has none.
async fn list_tracks(dir: &Path) -> WorkerResult<Vec<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tracks = Vec::new();
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if !entry.file_type().await?.is_file() {
            continue;
        }
        let is_audio = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| AUDIO_EXTENSIONS.iter().any(|a| e.eq_ignore_ascii_case(a)))
            .unwrap_or(false);
        if is_audio {
            tracks.push(path);
        }
    }
    tracks.sort();
    Ok(tracks)
}
