use std::collections::BTreeMap;

use rand::rngs::StdRng;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::remote::{RemoteError, RemoteLedger};
use crate::story::{
    Account, Actor, Episode, EpisodeCatalog, EpisodeId, LedgerError, LineId, LocalLedger,
    MarkerState, RECENT_LIMIT, Resolution, SelectionEngine, SelectionRequest, StationId,
    StoryCatalog, VisitLedger, derive_marker_state,
};

/// A result that may carry a non-blocking warning for the status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Outcome<T> {
    pub(crate) value: T,
    pub(crate) notice: Option<LedgerError>,
}

impl<T> Outcome<T> {
    fn quiet(value: T) -> Self {
        Self {
            value,
            notice: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub(crate) enum SaveError {
    #[error("sign in to save episodes")]
    RequiresLogin,
    #[error("unknown episode {0}")]
    UnknownEpisode(EpisodeId),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// One reader's session: who they are, what they have seen, and where that is
/// kept. Guests persist to the device; members write through to the server
/// and roll back when the server refuses.
pub(crate) struct StorySession<'c, 's, R> {
    catalog: &'c StoryCatalog,
    actor: Actor,
    ledger: VisitLedger,
    local: LocalLedger<'s>,
    remote: Option<R>,
    rng: StdRng,
    latest_token: u64,
}

impl<'c, 's, R: RemoteLedger> StorySession<'c, 's, R> {
    pub(crate) fn new(catalog: &'c StoryCatalog, mut local: LocalLedger<'s>, rng: StdRng) -> Self {
        let mut ledger = local.load();
        let dropped = ledger.retain_known_saves(catalog);
        if dropped > 0 {
            info!("dropped {dropped} saved episode(s) missing from the catalog");
        }
        Self {
            catalog,
            actor: Actor::Anonymous,
            ledger,
            local,
            remote: None,
            rng,
            latest_token: 0,
        }
    }

    pub(crate) fn catalog(&self) -> &'c StoryCatalog {
        self.catalog
    }

    pub(crate) fn actor(&self) -> &Actor {
        &self.actor
    }

    pub(crate) fn ledger(&self) -> &VisitLedger {
        &self.ledger
    }

    pub(crate) fn remote(&self) -> Option<&R> {
        self.remote.as_ref()
    }

    /// Warning left by the device store when it was opened.
    pub(crate) fn storage_warning(&self) -> Option<&LedgerError> {
        self.local.warning()
    }

    pub(crate) fn resolve(&mut self, request: &SelectionRequest) -> Outcome<Resolution<'c>> {
        let snapshot = self.ledger.clone();
        let engine = SelectionEngine::new(self.catalog);
        let resolution = engine.resolve(request, &self.actor, &mut self.ledger, &mut self.rng);
        let Some(episode) = resolution.episode() else {
            return Outcome::quiet(resolution);
        };

        let notice = if self.actor.is_authenticated() {
            self.invalidate_refresh();
            self.remote_view(snapshot, &episode.id)
        } else {
            self.local.save(&self.ledger)
        };
        Outcome {
            value: resolution,
            notice,
        }
    }

    fn remote_view(&mut self, snapshot: VisitLedger, episode: &EpisodeId) -> Option<LedgerError> {
        let remote = self.remote.as_ref()?;
        match remote.mark_viewed(episode) {
            Ok(()) => None,
            Err(err) => {
                warn!(episode = %episode, "remote view write failed, rolling back: {err}");
                self.ledger = snapshot;
                Some(LedgerError::WriteConflict {
                    action: "record a view of",
                    episode: episode.clone(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Flip the bookmark. Returns the saved state after the server answered.
    pub(crate) fn toggle_saved(&mut self, episode: &EpisodeId) -> Result<bool, SaveError> {
        if !self.actor.is_authenticated() {
            return Err(SaveError::RequiresLogin);
        }
        if !self.catalog.contains(episode) {
            return Err(SaveError::UnknownEpisode(episode.clone()));
        }

        let snapshot = self.ledger.clone();
        let optimistic = self
            .ledger
            .toggle_saved(&self.actor, episode, self.catalog);
        self.invalidate_refresh();

        let Some(remote) = self.remote.as_ref() else {
            return Ok(optimistic);
        };
        match remote.toggle_saved(episode) {
            Ok(saved) => {
                self.ledger.set_saved(episode, saved);
                Ok(saved)
            }
            Err(err) => {
                warn!(episode = %episode, "remote bookmark failed, rolling back: {err}");
                self.ledger = snapshot;
                Err(SaveError::Ledger(LedgerError::WriteConflict {
                    action: if optimistic { "save" } else { "unsave" },
                    episode: episode.clone(),
                    reason: err.to_string(),
                }))
            }
        }
    }

    pub(crate) fn markers(&self, line: &LineId) -> Option<BTreeMap<StationId, MarkerState>> {
        let stations = self.catalog.line(line)?.stations();
        Some(derive_marker_state(
            stations,
            &self.actor,
            &self.ledger,
            self.catalog,
        ))
    }

    /// Switch to `account`, merging the device ledger into the remote one.
    /// Views only known on this device are pushed to the server. A member
    /// session is signed out first so one account's history never reaches
    /// another.
    pub(crate) fn authenticate(&mut self, account: Account, remote: R) -> Outcome<()> {
        if self.actor.is_authenticated() {
            self.sign_out();
        }
        let device = self.ledger.clone();
        let mut notice = None;
        let merged = match remote.fetch_ledger() {
            Ok(remote_ledger) => {
                let mut merged = VisitLedger::merge(&device, &remote_ledger);
                for id in device.viewed() {
                    if remote_ledger.is_viewed(id) {
                        continue;
                    }
                    if let Err(err) = remote.mark_viewed(id) {
                        warn!(episode = %id, "could not push device view: {err}");
                        if notice.is_none() {
                            notice = Some(LedgerError::WriteConflict {
                                action: "sync",
                                episode: id.clone(),
                                reason: err.to_string(),
                            });
                        }
                    }
                }
                for id in device.saved() {
                    if remote_ledger.is_saved(id) {
                        continue;
                    }
                    match remote.toggle_saved(id) {
                        Ok(saved) => merged.set_saved(id, saved),
                        Err(err) => warn!(episode = %id, "could not push device save: {err}"),
                    }
                }
                merged
            }
            Err(err) => {
                warn!("remote ledger unavailable at sign in: {err}");
                notice = Some(LedgerError::Unavailable(err.to_string()));
                device
            }
        };

        info!(username = %account.username, "session switched to member");
        self.actor = Actor::Account(account);
        self.ledger = merged;
        self.ledger.retain_known_saves(self.catalog);
        self.remote = Some(remote);
        self.invalidate_refresh();
        Outcome {
            value: (),
            notice,
        }
    }

    /// Back to the guest ledger stored on this device.
    pub(crate) fn sign_out(&mut self) -> Option<R> {
        info!("session switched to guest");
        self.actor = Actor::Anonymous;
        self.ledger = self.local.load();
        self.ledger.retain_known_saves(self.catalog);
        self.invalidate_refresh();
        self.remote.take()
    }

    /// Issue a token for a remote ledger read. `None` for guests.
    pub(crate) fn begin_refresh(&mut self) -> Option<u64> {
        if !self.actor.is_authenticated() || self.remote.is_none() {
            return None;
        }
        self.latest_token += 1;
        Some(self.latest_token)
    }

    fn invalidate_refresh(&mut self) {
        self.latest_token += 1;
    }

    /// Install a remote read unless a newer request or a local write
    /// superseded it.
    pub(crate) fn apply_refresh(
        &mut self,
        token: u64,
        response: Result<VisitLedger, RemoteError>,
    ) -> Result<(), LedgerError> {
        if token != self.latest_token {
            debug!(token, latest = self.latest_token, "dropping stale ledger response");
            return Err(LedgerError::StaleResponse {
                issued: token,
                latest: self.latest_token,
            });
        }
        match response {
            Ok(mut ledger) => {
                ledger.retain_known_saves(self.catalog);
                self.ledger = ledger;
                Ok(())
            }
            Err(err) => {
                warn!("remote ledger refresh failed: {err}");
                Err(LedgerError::Unavailable(err.to_string()))
            }
        }
    }

    /// Blocking refresh for one-shot commands.
    pub(crate) fn refresh(&mut self) -> Result<(), LedgerError> {
        let Some(token) = self.begin_refresh() else {
            return Ok(());
        };
        let response = match self.remote.as_ref() {
            Some(remote) => remote.fetch_ledger(),
            None => return Ok(()),
        };
        self.apply_refresh(token, response)
    }

    /// Recently viewed episodes, newest first.
    pub(crate) fn recent(&self) -> Vec<&'c Episode> {
        let catalog = self.catalog;
        self.ledger
            .recent(RECENT_LIMIT)
            .into_iter()
            .filter_map(|id| catalog.episode(id))
            .collect()
    }

    pub(crate) fn saved(&self) -> Vec<&'c Episode> {
        let catalog = self.catalog;
        self.ledger
            .saved()
            .iter()
            .filter_map(|id| catalog.episode(id))
            .collect()
    }
}
