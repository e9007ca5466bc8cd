mod actions;
mod render;
mod session;

use std::io;
use std::sync::mpsc;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::widgets::TableState;

use crate::story::{EpisodeId, LineId, SelectionRequest};

use super::Session;

pub(super) use self::actions::{
    RefreshResult, drain_refresh_results, history_entries, open_request, open_selected_station,
    spawn_refresh, status_error, status_info, toggle_bookmark,
};
use self::render::draw_tui;
use self::session::TuiSession;

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum View {
    Map,
    Story(EpisodeId),
    History,
}

#[derive(Debug, Clone)]
pub(super) struct PendingNotice {
    pub(super) title: &'static str,
    pub(super) message: String,
}

pub(super) struct TuiState {
    pub(super) line: LineId,
    pub(super) view: View,
    pub(super) stations: TableState,
    pub(super) history: TableState,
    pub(super) status: String,
    pub(super) pending_notice: Option<PendingNotice>,
    pub(super) refreshing: bool,
}

impl TuiState {
    pub(super) fn new(line: LineId) -> Self {
        let mut stations = TableState::default();
        stations.select(Some(0));
        Self {
            line,
            view: View::Map,
            stations,
            history: TableState::default(),
            status: status_info("Ready."),
            pending_notice: None,
            refreshing: false,
        }
    }
}

pub(crate) fn run_tui(session: &mut Session<'_, '_>, line: &LineId) -> Result<()> {
    let mut tui_session = TuiSession::enter()?;
    let mut terminal = Terminal::new(CrosstermBackend::new(io::stdout()))
        .context("failed to initialize terminal backend")?;
    terminal.clear()?;

    let station_count = session
        .catalog()
        .line(line)
        .map(|stations| stations.stations().len())
        .unwrap_or(0);
    let mut state = TuiState::new(line.clone());
    if let Some(warning) = session.storage_warning() {
        state.status = status_error(&warning.to_string());
    } else if !session.actor().is_authenticated() {
        state.status = status_info("Reading as guest. Press r to discover a station.");
    }

    let (refresh_tx, refresh_rx) = mpsc::channel::<RefreshResult>();
    state.refreshing = spawn_refresh(session, &refresh_tx);

    loop {
        if drain_refresh_results(session, &refresh_rx, &mut state) {
            state.refreshing = false;
        }
        terminal.draw(|frame| draw_tui(frame, session, &mut state))?;

        if !event::poll(Duration::from_millis(200))? {
            continue;
        }

        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }

        if state.pending_notice.is_some() {
            state.pending_notice = None;
            continue;
        }

        if key.code == KeyCode::Char('q') {
            break;
        }

        match state.view.clone() {
            View::Map => match key.code {
                KeyCode::Up => {
                    if let Some(selected) = state.stations.selected() {
                        state.stations.select(Some(selected.saturating_sub(1)));
                    }
                }
                KeyCode::Down => {
                    if let Some(selected) = state.stations.selected()
                        && station_count > 0
                    {
                        let next = (selected + 1).min(station_count - 1);
                        state.stations.select(Some(next));
                    }
                }
                KeyCode::Enter => open_selected_station(session, &mut state),
                KeyCode::Char('r') => {
                    let request = SelectionRequest::Random(state.line.clone());
                    open_request(session, &mut state, &request);
                }
                KeyCode::Char('h') => {
                    state.view = View::History;
                    state.history.select(Some(0));
                    if !state.refreshing {
                        state.refreshing = spawn_refresh(session, &refresh_tx);
                    }
                }
                _ => {}
            },
            View::Story(episode) => match key.code {
                KeyCode::Esc => state.view = View::Map,
                KeyCode::Char('b') => toggle_bookmark(session, &mut state, &episode),
                KeyCode::Char('r') => {
                    let request = SelectionRequest::Random(state.line.clone());
                    open_request(session, &mut state, &request);
                }
                _ => {}
            },
            View::History => {
                let entries = history_entries(session);
                match key.code {
                    KeyCode::Esc => state.view = View::Map,
                    KeyCode::Up => {
                        if let Some(selected) = state.history.selected() {
                            state.history.select(Some(selected.saturating_sub(1)));
                        }
                    }
                    KeyCode::Down => {
                        if let Some(selected) = state.history.selected()
                            && !entries.is_empty()
                        {
                            let next = (selected + 1).min(entries.len() - 1);
                            state.history.select(Some(next));
                        }
                    }
                    KeyCode::Enter => {
                        if let Some(entry) = state
                            .history
                            .selected()
                            .and_then(|selected| entries.get(selected))
                        {
                            let request = SelectionRequest::ByEpisode(entry.episode.id.clone());
                            open_request(session, &mut state, &request);
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    terminal.show_cursor()?;
    tui_session.leave()?;
    Ok(())
}
