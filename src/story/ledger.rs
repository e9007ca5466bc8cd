use std::collections::HashSet;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::{Actor, EpisodeCatalog, EpisodeId, LedgerError, StationId};

/// Key of the device-local ledger blob.
pub(crate) const LEDGER_NAMESPACE: &str = "subway-story-progress";

pub(crate) const RECENT_LIMIT: usize = 10;

/// Viewed and saved episodes of one actor.
///
/// `viewed_episodes` is kept in view order, oldest first, and never holds an id
/// twice. Ids only leave it through a rollback of a failed remote write.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct VisitLedger {
    #[serde(default)]
    viewed_episodes: Vec<EpisodeId>,
    #[serde(default)]
    saved_episodes: Vec<EpisodeId>,
}

impl VisitLedger {
    pub(crate) fn from_parts(
        viewed: impl IntoIterator<Item = EpisodeId>,
        saved: impl IntoIterator<Item = EpisodeId>,
    ) -> Self {
        let mut ledger = Self {
            viewed_episodes: viewed.into_iter().collect(),
            saved_episodes: saved.into_iter().collect(),
        };
        ledger.dedup();
        ledger
    }

    /// Parse a stored blob. Duplicates written by older clients are folded.
    pub(crate) fn decode(raw: &str) -> Result<Self, LedgerError> {
        let mut ledger: Self = serde_json::from_str(raw)
            .map_err(|err| LedgerError::Unavailable(format!("corrupt ledger blob: {err}")))?;
        ledger.dedup();
        Ok(ledger)
    }

    pub(crate) fn encode(&self) -> Result<String, LedgerError> {
        serde_json::to_string(self)
            .map_err(|err| LedgerError::Unavailable(format!("ledger encode failed: {err}")))
    }

    fn dedup(&mut self) {
        // Keep the last occurrence of a viewed id so recency survives.
        let mut seen = HashSet::new();
        let mut viewed: Vec<EpisodeId> = self
            .viewed_episodes
            .drain(..)
            .rev()
            .filter(|id| seen.insert(id.clone()))
            .collect();
        viewed.reverse();
        self.viewed_episodes = viewed;

        let mut seen = HashSet::new();
        self.saved_episodes.retain(|id| seen.insert(id.clone()));
    }

    pub(crate) fn viewed(&self) -> &[EpisodeId] {
        &self.viewed_episodes
    }

    pub(crate) fn saved(&self) -> &[EpisodeId] {
        &self.saved_episodes
    }

    pub(crate) fn is_viewed(&self, id: &EpisodeId) -> bool {
        self.viewed_episodes.contains(id)
    }

    pub(crate) fn is_saved(&self, id: &EpisodeId) -> bool {
        self.saved_episodes.contains(id)
    }

    pub(crate) fn is_station_visited(
        &self,
        station: &StationId,
        catalog: &impl EpisodeCatalog,
    ) -> bool {
        catalog
            .episodes_for_station(station)
            .iter()
            .any(|episode| self.is_viewed(&episode.id))
    }

    /// Higher is more recent. `None` when the episode was never viewed.
    pub(crate) fn view_recency(&self, id: &EpisodeId) -> Option<usize> {
        self.viewed_episodes.iter().position(|viewed| viewed == id)
    }

    /// Returns true when the id was not viewed before. A repeat view only
    /// refreshes recency.
    pub(crate) fn mark_viewed(&mut self, id: &EpisodeId) -> bool {
        match self.view_recency(id) {
            Some(pos) => {
                if pos + 1 != self.viewed_episodes.len() {
                    let existing = self.viewed_episodes.remove(pos);
                    self.viewed_episodes.push(existing);
                }
                false
            }
            None => {
                self.viewed_episodes.push(id.clone());
                true
            }
        }
    }

    pub(crate) fn set_saved(&mut self, id: &EpisodeId, saved: bool) {
        let present = self.is_saved(id);
        if saved && !present {
            self.saved_episodes.push(id.clone());
        } else if !saved && present {
            self.saved_episodes.retain(|existing| existing != id);
        }
    }

    /// Flip the saved flag and return the new state. Anonymous actors and
    /// unknown episodes leave the ledger untouched.
    pub(crate) fn toggle_saved(
        &mut self,
        actor: &Actor,
        id: &EpisodeId,
        catalog: &impl EpisodeCatalog,
    ) -> bool {
        let current = self.is_saved(id);
        if !actor.is_authenticated() || !catalog.contains(id) {
            return current;
        }
        self.set_saved(id, !current);
        !current
    }

    /// Union of both ledgers. Remote history comes first; views only known
    /// locally are appended as the most recent ones.
    pub(crate) fn merge(local: &Self, remote: &Self) -> Self {
        let mut merged = remote.clone();
        for id in &local.viewed_episodes {
            if !merged.is_viewed(id) {
                merged.viewed_episodes.push(id.clone());
            }
        }
        for id in &local.saved_episodes {
            merged.set_saved(id, true);
        }
        merged
    }

    /// Most recent first.
    pub(crate) fn recent(&self, limit: usize) -> Vec<&EpisodeId> {
        self.viewed_episodes.iter().rev().take(limit).collect()
    }

    /// Drop saves of episodes the catalog does not know. Returns how many went.
    pub(crate) fn retain_known_saves(&mut self, catalog: &impl EpisodeCatalog) -> usize {
        let before = self.saved_episodes.len();
        self.saved_episodes.retain(|id| catalog.contains(id));
        before - self.saved_episodes.len()
    }
}

/// Synchronous key-value blob storage on this device.
pub(crate) trait LocalStore {
    fn read_blob(&self, namespace: &str) -> Result<Option<String>>;
    fn write_blob(&self, namespace: &str, payload: &str) -> Result<()>;
}

/// Persistence for the anonymous ledger. Never fails: when the store breaks it
/// falls back to keeping the ledger in memory for the rest of the session.
pub(crate) struct LocalLedger<'s> {
    store: Option<&'s dyn LocalStore>,
    degraded: Option<LedgerError>,
}

impl<'s> LocalLedger<'s> {
    pub(crate) fn new(store: &'s dyn LocalStore) -> Self {
        Self {
            store: Some(store),
            degraded: None,
        }
    }

    pub(crate) fn in_memory(reason: impl Into<String>) -> Self {
        Self {
            store: None,
            degraded: Some(LedgerError::Unavailable(reason.into())),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_persistent(&self) -> bool {
        self.store.is_some()
    }

    pub(crate) fn warning(&self) -> Option<&LedgerError> {
        self.degraded.as_ref()
    }

    pub(crate) fn load(&mut self) -> VisitLedger {
        let Some(store) = self.store else {
            return VisitLedger::default();
        };
        match store.read_blob(LEDGER_NAMESPACE) {
            Ok(Some(raw)) => match VisitLedger::decode(&raw) {
                Ok(ledger) => ledger,
                Err(err) => {
                    warn!("{err}; starting from an empty ledger");
                    self.degraded = Some(err);
                    VisitLedger::default()
                }
            },
            Ok(None) => VisitLedger::default(),
            Err(err) => {
                self.degrade(format!("local store read failed: {err:#}"));
                VisitLedger::default()
            }
        }
    }

    /// Returns the warning raised by this call, if the store just broke.
    pub(crate) fn save(&mut self, ledger: &VisitLedger) -> Option<LedgerError> {
        let store = self.store?;
        let payload = match ledger.encode() {
            Ok(payload) => payload,
            Err(err) => {
                warn!("{err}");
                return Some(err);
            }
        };
        match store.write_blob(LEDGER_NAMESPACE, &payload) {
            Ok(()) => None,
            Err(err) => {
                self.degrade(format!("local store write failed: {err:#}"));
                self.degraded.clone()
            }
        }
    }

    fn degrade(&mut self, reason: String) {
        warn!("{reason}; keeping visit ledger in memory only");
        self.store = None;
        self.degraded = Some(LedgerError::Unavailable(reason));
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryStore;
    use super::*;
    use crate::story::{Account, StoryCatalog};

    fn ids(raw: &[&str]) -> Vec<EpisodeId> {
        raw.iter().map(|id| EpisodeId::from(*id)).collect()
    }

    fn member() -> Actor {
        Actor::Account(Account {
            id: 7,
            username: "rider".to_string(),
            email: "rider@example.com".to_string(),
        })
    }

    #[test]
    fn mark_viewed_twice_keeps_a_single_entry() {
        let mut ledger = VisitLedger::default();
        let e1 = EpisodeId::from("E1");
        assert!(ledger.mark_viewed(&e1));
        assert!(!ledger.mark_viewed(&e1));
        assert!(ledger.is_viewed(&e1));
        assert_eq!(ledger.viewed(), ids(&["E1"]).as_slice());
    }

    #[test]
    fn repeat_view_moves_episode_to_most_recent() {
        let mut ledger = VisitLedger::from_parts(ids(&["A", "B", "C"]), ids(&[]));
        ledger.mark_viewed(&EpisodeId::from("A"));
        assert_eq!(ledger.viewed(), ids(&["B", "C", "A"]).as_slice());
        let recent: Vec<&str> = ledger.recent(2).iter().map(|id| id.as_str()).collect();
        assert_eq!(recent, vec!["A", "C"]);
    }

    #[test]
    fn merge_is_a_union_of_both_sides() {
        let local = VisitLedger::from_parts(ids(&["A", "B"]), ids(&["A"]));
        let remote = VisitLedger::from_parts(ids(&["B", "C"]), ids(&["C"]));
        let merged = VisitLedger::merge(&local, &remote);
        assert_eq!(merged.viewed(), ids(&["B", "C", "A"]).as_slice());
        assert_eq!(merged.saved(), ids(&["C", "A"]).as_slice());
    }

    #[test]
    fn toggle_saved_requires_an_account_and_a_known_episode() {
        let catalog = StoryCatalog::bundled().expect("bundled catalog");
        let known = EpisodeId::from("ep-gbg-1");
        let mut ledger = VisitLedger::default();

        assert!(!ledger.toggle_saved(&Actor::Anonymous, &known, &catalog));
        assert!(ledger.saved().is_empty());

        assert!(!ledger.toggle_saved(&member(), &EpisodeId::from("nope"), &catalog));
        assert!(ledger.saved().is_empty());

        assert!(ledger.toggle_saved(&member(), &known, &catalog));
        assert!(ledger.is_saved(&known));
        assert!(!ledger.toggle_saved(&member(), &known, &catalog));
        assert!(!ledger.is_saved(&known));
    }

    #[test]
    fn decode_accepts_browser_blob_and_folds_duplicates() {
        let raw = r#"{"viewedEpisodes":["a","b","a"],"savedEpisodes":["s","s"]}"#;
        let ledger = VisitLedger::decode(raw).expect("blob should decode");
        assert_eq!(ledger.viewed(), ids(&["b", "a"]).as_slice());
        assert_eq!(ledger.saved(), ids(&["s"]).as_slice());

        let partial = VisitLedger::decode("{}").expect("missing fields default");
        assert_eq!(partial, VisitLedger::default());
    }

    #[test]
    fn station_visited_when_any_of_its_episodes_was_viewed() {
        let catalog = StoryCatalog::bundled().expect("bundled catalog");
        let ledger = VisitLedger::from_parts(ids(&["ep-gbg-2"]), ids(&[]));
        assert!(ledger.is_station_visited(&StationId::from("경복궁"), &catalog));
        assert!(!ledger.is_station_visited(&StationId::from("안국"), &catalog));
    }

    #[test]
    fn retain_known_saves_drops_dangling_ids() {
        let catalog = StoryCatalog::bundled().expect("bundled catalog");
        let mut ledger = VisitLedger::from_parts(ids(&[]), ids(&["ep-gbg-1", "gone"]));
        assert_eq!(ledger.retain_known_saves(&catalog), 1);
        assert_eq!(ledger.saved(), ids(&["ep-gbg-1"]).as_slice());
    }

    #[test]
    fn local_ledger_round_trips_through_the_store() {
        let store = MemoryStore::default();
        let mut local = LocalLedger::new(&store);
        assert_eq!(local.load(), VisitLedger::default());

        let ledger = VisitLedger::from_parts(ids(&["E1"]), ids(&[]));
        assert!(local.save(&ledger).is_none());
        assert!(store.blobs.borrow().contains_key(LEDGER_NAMESPACE));
        assert_eq!(LocalLedger::new(&store).load(), ledger);
    }

    #[test]
    fn corrupt_blob_reads_as_empty_with_a_warning() {
        let store = MemoryStore::default();
        store
            .blobs
            .borrow_mut()
            .insert(LEDGER_NAMESPACE.to_string(), "{not json".to_string());
        let mut local = LocalLedger::new(&store);
        assert_eq!(local.load(), VisitLedger::default());
        assert!(matches!(local.warning(), Some(LedgerError::Unavailable(_))));
        assert!(local.is_persistent());
    }

    #[test]
    fn failing_store_degrades_to_memory_without_erroring() {
        let store = MemoryStore::default();
        store.fail_reads.set(true);
        let mut local = LocalLedger::new(&store);
        assert_eq!(local.load(), VisitLedger::default());
        assert!(!local.is_persistent());
        assert!(local.save(&VisitLedger::default()).is_none());

        let writes = MemoryStore::default();
        writes.fail_writes.set(true);
        let mut local = LocalLedger::new(&writes);
        let warning = local.save(&VisitLedger::from_parts(ids(&["E1"]), ids(&[])));
        assert!(matches!(warning, Some(LedgerError::Unavailable(_))));
        assert!(!local.is_persistent());
    }
}
