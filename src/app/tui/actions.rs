use std::sync::mpsc;

use crate::remote::{RemoteError, RemoteLedger};
use crate::story::{Episode, EpisodeId, Resolution, SelectionRequest, VisitLedger};

use super::super::story_session::{SaveError, StorySession};
use super::{PendingNotice, TuiState, View};

#[derive(Debug)]
pub(crate) struct RefreshResult {
    pub(crate) token: u64,
    pub(crate) response: Result<VisitLedger, RemoteError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HistoryKind {
    Recent,
    Saved,
}

impl HistoryKind {
    pub(crate) fn label(self) -> &'static str {
        match self {
            Self::Recent => "RECENT",
            Self::Saved => "SAVED",
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct HistoryEntry<'c> {
    pub(crate) kind: HistoryKind,
    pub(crate) episode: &'c Episode,
}

pub(crate) fn status_info(msg: &str) -> String {
    format!("INFO: {msg}")
}

pub(crate) fn status_error(msg: &str) -> String {
    format!("ERROR: {msg}")
}

/// Start a background read of the member ledger. Returns false for guests.
pub(crate) fn spawn_refresh<R>(
    session: &mut StorySession<'_, '_, R>,
    tx: &mpsc::Sender<RefreshResult>,
) -> bool
where
    R: RemoteLedger + Clone + Send + 'static,
{
    let Some(remote) = session.remote().cloned() else {
        return false;
    };
    let Some(token) = session.begin_refresh() else {
        return false;
    };
    let tx = tx.clone();
    std::thread::spawn(move || {
        let response = remote.fetch_ledger();
        let _ = tx.send(RefreshResult { token, response });
    });
    true
}

/// Apply finished refreshes. Returns true when at least one arrived.
pub(crate) fn drain_refresh_results<R: RemoteLedger>(
    session: &mut StorySession<'_, '_, R>,
    rx: &mpsc::Receiver<RefreshResult>,
    state: &mut TuiState,
) -> bool {
    let mut received = false;
    while let Ok(result) = rx.try_recv() {
        received = true;
        match session.apply_refresh(result.token, result.response) {
            Ok(()) => state.status = status_info("Reading history synced."),
            Err(err) if err.user_visible() => state.status = status_error(&err.to_string()),
            Err(_) => {}
        }
    }
    received
}

pub(crate) fn open_request<R: RemoteLedger>(
    session: &mut StorySession<'_, '_, R>,
    state: &mut TuiState,
    request: &SelectionRequest,
) {
    let outcome = session.resolve(request);
    match outcome.value {
        Resolution::Found(episode) => {
            state.view = View::Story(episode.id.clone());
            if let Some(ordinal) = session
                .catalog()
                .line(&state.line)
                .and_then(|stations| stations.get(&episode.station_id))
                .map(|station| station.ordinal)
            {
                state.stations.select(Some(ordinal));
            }
            state.status = match outcome.notice {
                Some(notice) if notice.user_visible() => status_error(&notice.to_string()),
                _ => status_info(&format!("Opened \"{}\".", episode.title)),
            };
        }
        Resolution::NotFound => {
            state.pending_notice = Some(PendingNotice {
                title: "No Story",
                message: "There is no story here yet.\n\nPress any key to continue.".to_string(),
            });
            state.status = status_info("Nothing to open.");
        }
    }
}

pub(crate) fn open_selected_station<R: RemoteLedger>(
    session: &mut StorySession<'_, '_, R>,
    state: &mut TuiState,
) {
    let Some(station) = state.stations.selected().and_then(|selected| {
        session
            .catalog()
            .line(&state.line)
            .and_then(|stations| stations.stations().get(selected))
    }) else {
        state.status = status_error("No station selected.");
        return;
    };

    let clickable = session
        .markers(&state.line)
        .and_then(|markers| markers.get(&station.id).copied())
        .is_some_and(|marker| marker.clickable);
    if clickable {
        let request = SelectionRequest::ByStation(station.id.clone());
        open_request(session, state, &request);
        return;
    }

    let message = if session.actor().is_authenticated() {
        format!(
            "{} has no stories yet.\n\nPress any key to continue.",
            station.display_name
        )
    } else {
        format!(
            "{} is still locked.\n\nPress r to discover stations at random, or sign in to open any station.\n\nPress any key to continue.",
            station.display_name
        )
    };
    state.pending_notice = Some(PendingNotice {
        title: "Station Locked",
        message,
    });
    state.status = status_info("Station not available.");
}

pub(crate) fn toggle_bookmark<R: RemoteLedger>(
    session: &mut StorySession<'_, '_, R>,
    state: &mut TuiState,
    episode: &EpisodeId,
) {
    state.status = match session.toggle_saved(episode) {
        Ok(true) => status_info("Saved to your episodes."),
        Ok(false) => status_info("Removed from your episodes."),
        Err(SaveError::RequiresLogin) => {
            state.pending_notice = Some(PendingNotice {
                title: "Sign In Required",
                message: "Saving episodes needs an account.\n\nRun `hisubtory login --username <you>` and reopen the map.\n\nPress any key to continue."
                    .to_string(),
            });
            status_info("Sign in to save episodes.")
        }
        Err(err) => status_error(&err.to_string()),
    };
}

/// Recent episodes first, then saved ones.
pub(crate) fn history_entries<'c, R: RemoteLedger>(
    session: &StorySession<'c, '_, R>,
) -> Vec<HistoryEntry<'c>> {
    let recent = session.recent().into_iter().map(|episode| HistoryEntry {
        kind: HistoryKind::Recent,
        episode,
    });
    let saved = session.saved().into_iter().map(|episode| HistoryEntry {
        kind: HistoryKind::Saved,
        episode,
    });
    recent.chain(saved).collect()
}
