use crate::cache::{ShuffleCache, ViewOutcome};
use crate::config::Config;
use crate::error::StoreError;
use crate::models::CaseRecord;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::{fs, io, path::Path};
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};

const MAX_SWEEP_PERIOD: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
struct PersistentSnapshot {
    cases: HashMap<String, CaseRecord>,
}

fn load_snapshot(path: &str) -> Result<Option<PersistentSnapshot>, StoreError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_string(),
                source,
            })
        }
    };
    Ok(Some(serde_json::from_str(&raw)?))
}

/// Pass-through case storage. Records are kept exactly as written.
pub struct CaseStore {
    pub cases: RwLock<HashMap<String, CaseRecord>>,
}

impl CaseStore {
    pub fn new(snapshot_path: Option<&str>) -> Self {
        let snapshot = snapshot_path.and_then(|path| match load_snapshot(path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!("failed to read local snapshot {}: {}", path, err);
                None
            }
        });
        let cases = snapshot.map(|s| s.cases).unwrap_or_default();
        if !cases.is_empty() {
            info!("loaded {} cases from local snapshot", cases.len());
        }
        Self {
            cases: RwLock::new(cases),
        }
    }

    async fn snapshot(&self) -> PersistentSnapshot {
        PersistentSnapshot {
            cases: self.cases.read().await.clone(),
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<CaseStore>,
    pub views: Arc<ShuffleCache>,
    pub local_state_path: Option<String>,
    pub view_idle: Duration,
    persist_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(config: &Config) -> Self {
        let local_state_path = config.local_state_path.clone();
        Self {
            store: Arc::new(CaseStore::new(local_state_path.as_deref())),
            views: Arc::new(ShuffleCache::new()),
            local_state_path,
            view_idle: Duration::from_secs(config.view_idle_secs),
            persist_lock: Arc::new(Mutex::new(())),
        }
    }

    pub async fn get_case(&self, id: &str) -> Option<CaseRecord> {
        self.store.cases.read().await.get(id).cloned()
    }

    /// All cases ordered by id.
    pub async fn list_cases(&self) -> Vec<CaseRecord> {
        let mut cases: Vec<CaseRecord> = self.store.cases.read().await.values().cloned().collect();
        cases.sort_by(|a, b| a.id.cmp(&b.id));
        cases
    }

    /// Stores `case` unless its id is taken. Returns `false` on a clash.
    pub async fn insert_new(&self, case: CaseRecord) -> bool {
        {
            let mut cases = self.store.cases.write().await;
            match cases.entry(case.id.clone()) {
                Entry::Occupied(_) => return false,
                Entry::Vacant(slot) => {
                    slot.insert(case);
                }
            }
        }
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after insert_new: {}", err);
        }
        true
    }

    /// Overwrites an existing case. Returns `false` when the id is unknown.
    pub async fn replace_existing(&self, case: CaseRecord) -> bool {
        {
            let mut cases = self.store.cases.write().await;
            match cases.entry(case.id.clone()) {
                Entry::Occupied(mut slot) => {
                    slot.insert(case);
                }
                Entry::Vacant(_) => return false,
            }
        }
        if let Err(err) = self.persist_core_data().await {
            warn!("failed to persist local state after replace_existing: {}", err);
        }
        true
    }

    pub async fn delete_case(&self, id: &str) -> bool {
        let removed = self.store.cases.write().await.remove(id).is_some();
        if removed {
            let dropped = self.views.forget_case(id);
            info!("case {} deleted, {} open views dropped", id, dropped);
            if let Err(err) = self.persist_core_data().await {
                warn!("failed to persist local state after delete_case: {}", err);
            }
        }
        removed
    }

    /// Returns the live order for `case` in `view_id`, drawing one if needed.
    pub fn open_view(&self, view_id: &str, case: &CaseRecord) -> Option<ViewOutcome> {
        let outcome = self.views.view(view_id, case, &mut rand::thread_rng())?;
        if outcome.fresh && !outcome.shuffle.is_graded() {
            warn!(
                "case {} has correct_answer_index {:?} outside its {} options; view {} is ungraded",
                case.id,
                case.correct_answer_index,
                case.options().len(),
                view_id
            );
        }
        Some(outcome)
    }

    /// Periodically drops views idle for longer than `view_idle`. Does
    /// nothing when the limit is zero.
    pub fn spawn_view_sweeper(&self) -> Option<JoinHandle<()>> {
        if self.view_idle.is_zero() {
            return None;
        }
        let views = Arc::clone(&self.views);
        let max_idle = self.view_idle;
        let period = max_idle.min(MAX_SWEEP_PERIOD);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let dropped = views.evict_idle(max_idle);
                if dropped > 0 {
                    info!("dropped {} idle views, {} left", dropped, views.len());
                }
            }
        }))
    }

    /// Writes the case map to the local snapshot. Writers are serialized and
    /// each one snapshots under the lock, so the file ends with the newest map.
    pub async fn persist_core_data(&self) -> Result<(), StoreError> {
        let Some(path) = self.local_state_path.as_ref() else {
            return Ok(());
        };
        let _guard = self.persist_lock.lock().await;
        let snapshot = self.store.snapshot().await;
        let serialized = serde_json::to_vec_pretty(&snapshot)?;
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };
        if let Some(parent) = Path::new(path).parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::write(path, serialized).await.map_err(io_err)?;
        Ok(())
    }
}
