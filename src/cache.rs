use crate::models::{CaseRecord, LearnerStats};
use crate::shuffle::{shuffle_set, ShuffleResult};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use rand::Rng;
use serde::{Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Content hash of everything that decides how a case is shown and graded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CaseFingerprint([u8; 32]);

impl CaseFingerprint {
    pub fn of(case: &CaseRecord) -> Self {
        let mut hasher = Sha256::new();
        update_str(&mut hasher, &case.id);
        for seq in [
            &case.answer_options,
            &case.answer_feedbacks,
            &case.answer_short_tips,
        ] {
            match seq {
                Some(items) => {
                    hasher.update((items.len() as u64).to_le_bytes());
                    for item in items {
                        update_str(&mut hasher, item);
                    }
                }
                None => hasher.update(u64::MAX.to_le_bytes()),
            }
        }
        hasher.update(case.correct_answer_index.unwrap_or(i64::MIN).to_le_bytes());
        update_str(&mut hasher, case.correct_answer.as_deref().unwrap_or_default());
        Self(hasher.finalize().into())
    }
}

fn update_str(hasher: &mut Sha256, value: &str) {
    hasher.update((value.len() as u64).to_le_bytes());
    hasher.update(value.as_bytes());
}

impl fmt::Display for CaseFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl Serialize for CaseFingerprint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptRecord {
    pub case_id: String,
    pub selected_index: usize,
    pub original_index: Option<usize>,
    pub correct: bool,
    pub answered_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ViewSession {
    pub case_id: String,
    pub fingerprint: CaseFingerprint,
    pub shuffle: Arc<ShuffleResult>,
    pub stats: LearnerStats,
    pub missed: Vec<String>,
    pub attempts: Vec<AttemptRecord>,
    pub opened_at: DateTime<Utc>,
    /// Last time the view was opened or answered.
    pub last_seen: Instant,
}

#[derive(Debug, Clone)]
pub struct ViewOutcome {
    pub shuffle: Arc<ShuffleResult>,
    pub fingerprint: CaseFingerprint,
    /// `true` when a new order was drawn for this call.
    pub fresh: bool,
}

/// Live presentation orders, one per view session.
#[derive(Default)]
pub struct ShuffleCache {
    views: DashMap<String, ViewSession>,
}

impl ShuffleCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the order for `case` in `view_id`, drawing a new one only when
    /// the view is new or the case's answer data changed since the last draw.
    /// Returns `None` while the case has no options; the cached order is
    /// left as is in that case.
    pub fn view<R: Rng + ?Sized>(
        &self,
        view_id: &str,
        case: &CaseRecord,
        rng: &mut R,
    ) -> Option<ViewOutcome> {
        let answers = case.answer_set()?;
        let fingerprint = CaseFingerprint::of(case);

        match self.views.entry(view_id.to_string()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().last_seen = Instant::now();
                if entry.get().fingerprint == fingerprint {
                    return Some(ViewOutcome {
                        shuffle: Arc::clone(&entry.get().shuffle),
                        fingerprint,
                        fresh: false,
                    });
                }
                let shuffle = Arc::new(shuffle_set(rng, &answers));
                let session = entry.get_mut();
                debug!(
                    "view {} reshuffled: case {} -> {} ({})",
                    view_id, session.case_id, case.id, fingerprint
                );
                session.case_id = case.id.clone();
                session.fingerprint = fingerprint;
                session.shuffle = Arc::clone(&shuffle);
                Some(ViewOutcome {
                    shuffle,
                    fingerprint,
                    fresh: true,
                })
            }
            Entry::Vacant(entry) => {
                let shuffle = Arc::new(shuffle_set(rng, &answers));
                debug!("view {} opened on case {} ({})", view_id, case.id, fingerprint);
                entry.insert(ViewSession {
                    case_id: case.id.clone(),
                    fingerprint,
                    shuffle: Arc::clone(&shuffle),
                    stats: LearnerStats::default(),
                    missed: Vec::new(),
                    attempts: Vec::new(),
                    opened_at: Utc::now(),
                    last_seen: Instant::now(),
                });
                Some(ViewOutcome {
                    shuffle,
                    fingerprint,
                    fresh: true,
                })
            }
        }
    }

    pub fn get(&self, view_id: &str) -> Option<ViewSession> {
        self.views.get(view_id).map(|v| v.value().clone())
    }

    /// Appends an attempt and returns the updated stats.
    pub fn record_attempt(&self, view_id: &str, attempt: AttemptRecord) -> Option<LearnerStats> {
        let mut session = self.views.get_mut(view_id)?;
        session.last_seen = Instant::now();
        session.stats.record(attempt.correct);
        if !attempt.correct && !session.missed.contains(&attempt.case_id) {
            session.missed.push(attempt.case_id.clone());
        }
        session.attempts.push(attempt);
        Some(session.stats.clone())
    }

    pub fn end(&self, view_id: &str) -> Option<ViewSession> {
        self.views.remove(view_id).map(|(_, session)| session)
    }

    /// Drops every view currently showing `case_id`.
    pub fn forget_case(&self, case_id: &str) -> usize {
        let before = self.views.len();
        self.views.retain(|_, session| session.case_id != case_id);
        before.saturating_sub(self.views.len())
    }

    /// Drops views not touched since `cutoff`. Returns how many went.
    pub fn evict_idle_before(&self, cutoff: Instant) -> usize {
        let before = self.views.len();
        self.views.retain(|_, session| session.last_seen >= cutoff);
        before.saturating_sub(self.views.len())
    }

    pub fn evict_idle(&self, max_idle: Duration) -> usize {
        match Instant::now().checked_sub(max_idle) {
            Some(cutoff) => self.evict_idle_before(cutoff),
            None => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn case(id: &str, options: &[&str], correct: i64) -> CaseRecord {
        CaseRecord {
            id: id.into(),
            title: String::new(),
            prompt: String::new(),
            answer_options: Some(options.iter().map(|s| s.to_string()).collect()),
            answer_feedbacks: None,
            answer_short_tips: None,
            correct_answer_index: Some(correct),
            correct_answer: None,
        }
    }

    #[test]
    fn same_data_keeps_the_same_order() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(1);
        let c = case("c1", &["A", "B", "C", "D", "E", "F"], 2);

        let first = cache.view("v1", &c, &mut rng).unwrap();
        assert!(first.fresh);
        for _ in 0..10 {
            let again = cache.view("v1", &c.clone(), &mut rng).unwrap();
            assert!(!again.fresh);
            assert!(Arc::ptr_eq(&first.shuffle, &again.shuffle));
        }
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn changed_answers_reshuffle() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(2);
        let mut c = case("c1", &["A", "B", "C"], 0);
        let first = cache.view("v1", &c, &mut rng).unwrap();

        c.correct_answer_index = Some(1);
        let second = cache.view("v1", &c, &mut rng).unwrap();
        assert!(second.fresh);
        assert_ne!(first.fingerprint, second.fingerprint);
        let position = second.shuffle.correct_index.unwrap();
        assert_eq!(second.shuffle.options[position], "B");

        let other = case("c2", &["A", "B", "C"], 1);
        let third = cache.view("v1", &other, &mut rng).unwrap();
        assert!(third.fresh);
        assert_eq!(cache.get("v1").unwrap().case_id, "c2");
    }

    #[test]
    fn separate_views_draw_separately() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(3);
        let c = case("c1", &["A", "B", "C"], 0);
        assert!(cache.view("v1", &c, &mut rng).unwrap().fresh);
        assert!(cache.view("v2", &c, &mut rng).unwrap().fresh);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn empty_case_is_not_ready() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(4);
        let mut c = case("c1", &[], 0);
        assert!(cache.view("v1", &c, &mut rng).is_none());
        c.answer_options = None;
        assert!(cache.view("v1", &c, &mut rng).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn fingerprint_separates_fields() {
        let mut a = case("c1", &["ab", "c"], 0);
        let b = case("c1", &["a", "bc"], 0);
        assert_ne!(CaseFingerprint::of(&a), CaseFingerprint::of(&b));

        let before = CaseFingerprint::of(&a);
        a.answer_feedbacks = Some(vec![]);
        assert_ne!(before, CaseFingerprint::of(&a));
        assert_eq!(CaseFingerprint::of(&a).to_string().len(), 43);
    }

    #[test]
    fn attempts_update_stats() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(5);
        let c = case("c1", &["A", "B"], 0);
        cache.view("v1", &c, &mut rng).unwrap();

        let attempt = |correct| AttemptRecord {
            case_id: "c1".into(),
            selected_index: 0,
            original_index: Some(0),
            correct,
            answered_at: Utc::now(),
        };
        cache.record_attempt("v1", attempt(false)).unwrap();
        cache.record_attempt("v1", attempt(false)).unwrap();
        let stats = cache.record_attempt("v1", attempt(true)).unwrap();
        assert_eq!(stats, LearnerStats { correct: 1, wrong: 2 });

        let session = cache.get("v1").unwrap();
        assert_eq!(session.missed, vec!["c1".to_string()]);
        assert_eq!(session.attempts.len(), 3);
        assert!(cache.record_attempt("missing", attempt(true)).is_none());

        assert_eq!(cache.forget_case("c1"), 1);
        assert!(cache.end("v1").is_none());
    }

    #[test]
    fn idle_views_are_evicted() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(6);
        let c = case("c1", &["A", "B", "C"], 0);
        cache.view("stale", &c, &mut rng).unwrap();
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        cache.view("active", &c, &mut rng).unwrap();

        assert_eq!(cache.evict_idle_before(cutoff), 1);
        assert!(cache.get("stale").is_none());
        assert!(cache.get("active").is_some());
        assert_eq!(cache.evict_idle(Duration::from_secs(3600)), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn answering_keeps_a_view_alive() {
        let cache = ShuffleCache::new();
        let mut rng = StdRng::seed_from_u64(7);
        let c = case("c1", &["A", "B"], 0);
        cache.view("v1", &c, &mut rng).unwrap();
        let cutoff = Instant::now();
        std::thread::sleep(Duration::from_millis(5));
        cache
            .record_attempt(
                "v1",
                AttemptRecord {
                    case_id: "c1".into(),
                    selected_index: 1,
                    original_index: Some(1),
                    correct: false,
                    answered_at: Utc::now(),
                },
            )
            .unwrap();
        assert_eq!(cache.evict_idle_before(cutoff), 0);
        assert_eq!(cache.len(), 1);
    }
}
