use std::collections::{BTreeMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};

use anyhow::Context;
use radar_core::ListingId;
use serde::{Deserialize, Serialize};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_SEEN: usize = 5000;

/// Insertion-ordered identifier set with O(1) membership.
///
/// The deque holds eviction order (oldest at the front); the hash set answers
/// membership. Both always contain the same identifiers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedIdSet {
    order: VecDeque<ListingId>,
    members: HashSet<ListingId>,
}

impl OrderedIdSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &ListingId) -> bool {
        self.members.contains(id)
    }

    /// Append `id` as the newest entry. Returns `false` if it was already present.
    pub fn insert(&mut self, id: ListingId) -> bool {
        if !self.members.insert(id.clone()) {
            return false;
        }
        self.order.push_back(id);
        true
    }

    /// Drop the oldest entries until at most `max` remain; returns how many were evicted.
    pub fn truncate_oldest(&mut self, max: usize) -> usize {
        let mut evicted = 0;
        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.members.remove(&oldest);
                evicted += 1;
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Identifiers oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &ListingId> {
        self.order.iter()
    }
}

impl FromIterator<ListingId> for OrderedIdSet {
    fn from_iter<I: IntoIterator<Item = ListingId>>(iter: I) -> Self {
        let mut set = Self::new();
        for id in iter {
            set.insert(id);
        }
        set
    }
}

/// Everything the radar remembers between runs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RadarState {
    pub seen: OrderedIdSet,
    pub last_poll: BTreeMap<String, f64>,
    pub saved: OrderedIdSet,
}

impl RadarState {
    pub fn last_poll(&self, source: &str) -> Option<f64> {
        self.last_poll.get(source).copied()
    }

    pub fn record_poll(&mut self, source: &str, completed_at: f64) {
        self.last_poll.insert(source.to_string(), completed_at);
    }
}

/// On-disk JSON shape of [`RadarState`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct PersistedState {
    #[serde(default)]
    seen: Vec<String>,
    #[serde(default)]
    last_poll: BTreeMap<String, f64>,
    #[serde(default)]
    saved: Vec<String>,
}

impl From<PersistedState> for RadarState {
    fn from(value: PersistedState) -> Self {
        Self {
            seen: value.seen.into_iter().map(ListingId::from).collect(),
            last_poll: value.last_poll,
            saved: value.saved.into_iter().map(ListingId::from).collect(),
        }
    }
}

impl From<&RadarState> for PersistedState {
    fn from(value: &RadarState) -> Self {
        Self {
            seen: value.seen.iter().map(|id| id.as_str().to_string()).collect(),
            last_poll: value.last_poll.clone(),
            saved: value.saved.iter().map(|id| id.as_str().to_string()).collect(),
        }
    }
}

/// JSON state file with bounded `seen` retention and atomic replacement.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
    max_seen: usize,
}

impl StateStore {
    pub fn new(path: impl Into<PathBuf>, max_seen: usize) -> Self {
        Self {
            path: path.into(),
            max_seen,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn max_seen(&self) -> usize {
        self.max_seen
    }

    /// Read the state file. Absent or unreadable state yields an empty state.
    pub async fn load(&self) -> RadarState {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no state file; starting empty");
                return RadarState::default();
            }
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "state file unreadable; starting empty");
                return RadarState::default();
            }
        };

        match serde_json::from_str::<PersistedState>(&text) {
            Ok(persisted) => RadarState::from(persisted),
            Err(err) => {
                warn!(path = %self.path.display(), error = %err, "state file corrupt; starting empty");
                RadarState::default()
            }
        }
    }

    /// Cap `seen` at `max_seen` newest entries, then atomically replace the state file.
    pub async fn save(&self, state: &mut RadarState) -> anyhow::Result<()> {
        let evicted = state.seen.truncate_oldest(self.max_seen);
        if evicted > 0 {
            debug!(evicted, max_seen = self.max_seen, "evicted oldest seen identifiers");
        }
        let bytes = serde_json::to_vec_pretty(&PersistedState::from(&*state))
            .context("serializing radar state")?;
        write_atomic(&self.path, &bytes).await
    }

    /// Delete the state file if present. Failures are ignored.
    pub async fn reset(&self) {
        if let Err(err) = fs::remove_file(&self.path).await {
            if err.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %err, "state reset failed; continuing");
            }
        }
    }
}

/// Write `bytes` to a sibling temp file, fsync it, then rename it over `path`.
///
/// Readers observe either the previous file or the complete new one.
pub async fn write_atomic(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)
        .await
        .with_context(|| format!("creating state directory {}", parent.display()))?;

    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "state".to_string());
    let temp_path = parent.join(format!(".{file_name}.{}.tmp", Uuid::new_v4()));

    let mut file = fs::OpenOptions::new()
        .create_new(true)
        .write(true)
        .open(&temp_path)
        .await
        .with_context(|| format!("opening temp state file {}", temp_path.display()))?;
    let written = async {
        file.write_all(bytes).await?;
        file.flush().await?;
        file.sync_all().await
    }
    .await;
    drop(file);
    if let Err(err) = written {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| format!("writing temp state file {}", temp_path.display()));
    }

    if let Err(err) = fs::rename(&temp_path, path).await {
        let _ = fs::remove_file(&temp_path).await;
        return Err(err).with_context(|| {
            format!(
                "atomically renaming temp state {} -> {}",
                temp_path.display(),
                path.display()
            )
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use radar_core::identify;
    use tempfile::tempdir;

    fn ids(n: usize) -> Vec<ListingId> {
        (0..n)
            .map(|i| identify(&format!("Role {i}"), "Acme"))
            .collect()
    }

    #[test]
    fn ordered_set_rejects_duplicates_and_evicts_oldest_first() {
        let all = ids(4);
        let mut set: OrderedIdSet = all.iter().cloned().collect();
        assert!(!set.insert(all[1].clone()));
        assert_eq!(set.len(), 4);

        assert_eq!(set.truncate_oldest(2), 2);
        assert!(!set.contains(&all[0]));
        assert!(!set.contains(&all[1]));
        assert_eq!(set.iter().cloned().collect::<Vec<_>>(), all[2..].to_vec());
    }

    #[tokio::test]
    async fn missing_state_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), 10);
        assert_eq!(store.load().await, RadarState::default());
    }

    #[tokio::test]
    async fn corrupt_state_file_loads_empty() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, b"{\"seen\": [\"abc\"").expect("write");
        let store = StateStore::new(&path, 10);
        assert_eq!(store.load().await, RadarState::default());
    }

    #[tokio::test]
    async fn legacy_state_without_saved_key_loads() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        std::fs::write(&path, br#"{"seen": ["a", "b"], "last_poll": {"indeed": 12.5}}"#)
            .expect("write");
        let state = StateStore::new(&path, 10).load().await;
        assert_eq!(state.seen.len(), 2);
        assert!(state.saved.is_empty());
        assert_eq!(state.last_poll("indeed"), Some(12.5));
    }

    #[tokio::test]
    async fn save_then_load_round_trips_and_caps_seen() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("nested").join("state.json"), 3);
        let all = ids(5);

        let mut state = RadarState::default();
        for id in &all {
            state.seen.insert(id.clone());
        }
        state.saved.insert(all[4].clone());
        state.record_poll("indeed", 1_700_000_000.25);
        state.record_poll("google", 1_700_000_100.0);

        store.save(&mut state).await.expect("save");
        let loaded = store.load().await;

        assert_eq!(loaded.seen.iter().cloned().collect::<Vec<_>>(), all[2..].to_vec());
        assert_eq!(loaded.saved.iter().cloned().collect::<Vec<_>>(), vec![all[4].clone()]);
        assert_eq!(loaded.last_poll, state.last_poll);
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn saved_file_uses_documented_json_keys() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path, 10);
        let mut state = RadarState::default();
        state.seen.insert(ListingId::from("abc".to_string()));
        state.record_poll("indeed", 5.0);
        store.save(&mut state).await.expect("save");

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert_eq!(value["seen"], serde_json::json!(["abc"]));
        assert_eq!(value["last_poll"]["indeed"], serde_json::json!(5.0));
        assert_eq!(value["saved"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn interrupted_save_leaves_previous_state_intact() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path, 10);

        let mut state = RadarState::default();
        state.seen.insert(ListingId::from("kept".to_string()));
        store.save(&mut state).await.expect("save");

        // A crash between temp write and rename leaves only a partial sibling.
        std::fs::write(dir.path().join(".state.json.crashed.tmp"), b"{\"seen\": [\"ha")
            .expect("write partial");

        let loaded = store.load().await;
        assert_eq!(loaded, state);
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files_behind() {
        let dir = tempdir().expect("tempdir");
        let store = StateStore::new(dir.path().join("state.json"), 10);
        let mut state = RadarState::default();
        store.save(&mut state).await.expect("first save");
        store.save(&mut state).await.expect("second save");

        let names: Vec<_> = std::fs::read_dir(dir.path())
            .expect("read_dir")
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["state.json".to_string()]);
    }

    #[tokio::test]
    async fn reset_removes_file_and_tolerates_absence() {
        let dir = tempdir().expect("tempdir");
        let path = dir.path().join("state.json");
        let store = StateStore::new(&path, 10);
        let mut state = RadarState::default();
        store.save(&mut state).await.expect("save");

        store.reset().await;
        assert!(!path.exists());
        store.reset().await;
    }
}
