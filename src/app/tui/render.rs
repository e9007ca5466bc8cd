use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, BorderType, Borders, Cell, Clear, Padding, Paragraph, Row, Table, Wrap,
};

use crate::remote::RemoteLedger;
use crate::story::{EpisodeCatalog, MarkerColor, MarkerState, station_position, station_row};

use super::super::format::{episode_text, marker_label, truncate};
use super::super::station_name;
use super::super::story_session::StorySession;
use super::actions::history_entries;
use super::{TuiState, View};

const ACCENT: Color = Color::Rgb(110, 170, 255);
const VISITED: Color = Color::Rgb(120, 220, 150);

pub(super) fn draw_tui<R: RemoteLedger>(
    frame: &mut Frame,
    session: &StorySession<'_, '_, R>,
    state: &mut TuiState,
) {
    let bg = Block::default().style(Style::default().bg(Color::Black));
    frame.render_widget(bg, frame.area());

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(8),
            Constraint::Length(3),
            Constraint::Length(3),
        ])
        .split(frame.area());

    let line_name = session
        .catalog()
        .line(&state.line)
        .map(|stations| stations.name.clone())
        .unwrap_or_else(|| state.line.to_string());
    let visited_stations = session
        .markers(&state.line)
        .map(|markers| {
            markers
                .values()
                .filter(|marker| marker.color == MarkerColor::Visited)
                .count()
        })
        .unwrap_or(0);
    let sync_text = if state.refreshing { "syncing" } else { "" };
    let header = Paragraph::new(Line::from(vec![
        Span::styled(
            "HISUBTORY",
            Style::default().fg(ACCENT).add_modifier(Modifier::BOLD),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(line_name, Style::default().fg(Color::Rgb(185, 195, 210))),
        Span::styled("   ", Style::default()),
        Span::styled(
            format!("{visited_stations} stations visited"),
            Style::default().fg(Color::Rgb(185, 195, 210)),
        ),
        Span::styled("   ", Style::default()),
        Span::styled(session.actor().label(), Style::default().fg(Color::Yellow)),
        Span::styled("   ", Style::default()),
        Span::styled(sync_text, Style::default().fg(Color::Rgb(205, 165, 255))),
    ]))
    .alignment(Alignment::Center)
    .block(panel_block("Line"));
    frame.render_widget(header, chunks[0]);

    match state.view.clone() {
        View::Map => draw_map(frame, chunks[1], session, state),
        View::Story(episode) => {
            let text = match session.catalog().episode(&episode) {
                Some(found) => episode_text(
                    found,
                    &station_name(session.catalog(), found),
                    session.ledger().is_saved(&found.id),
                ),
                None => "This episode is no longer available.".to_string(),
            };
            let story = Paragraph::new(text)
                .style(Style::default().fg(Color::Rgb(230, 230, 230)))
                .wrap(Wrap { trim: false })
                .block(panel_block("Story"));
            frame.render_widget(story, chunks[1]);
        }
        View::History => draw_history(frame, chunks[1], session, state),
    }

    let command_bar = Paragraph::new(controls_line(&state.view))
        .alignment(Alignment::Center)
        .block(panel_block("Controls"));
    frame.render_widget(command_bar, chunks[2]);

    let status_widget = Paragraph::new(state.status.clone())
        .style(status_style(&state.status))
        .block(panel_block("Status"));
    frame.render_widget(status_widget, chunks[3]);

    if let Some(notice) = &state.pending_notice {
        let popup_area = popup_rect_for_text(frame.area(), &notice.message);
        render_popup_shadow(frame, popup_area);
        frame.render_widget(Clear, popup_area);
        let popup = Paragraph::new(notice.message.clone())
            .alignment(Alignment::Center)
            .wrap(Wrap { trim: true })
            .block(modal_block(notice.title));
        frame.render_widget(popup, popup_area);
    }
}

fn draw_map<R: RemoteLedger>(
    frame: &mut Frame,
    area: Rect,
    session: &StorySession<'_, '_, R>,
    state: &mut TuiState,
) {
    let body_chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(64), Constraint::Percentage(36)])
        .split(area);

    let markers = session.markers(&state.line).unwrap_or_default();
    let stations = session
        .catalog()
        .line(&state.line)
        .map(|line| line.stations())
        .unwrap_or_default();

    let rows: Vec<Row> = stations
        .iter()
        .map(|station| {
            let marker = markers.get(&station.id);
            let stories = session.catalog().episodes_for_station(&station.id).len();
            Row::new(vec![
                Cell::from((station.ordinal + 1).to_string()),
                Cell::from(station.display_name.clone()),
                Cell::from(stories.to_string()),
                Cell::from(marker_label(marker)),
            ])
            .style(marker_style(marker))
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(4),
            Constraint::Percentage(50),
            Constraint::Length(9),
            Constraint::Length(10),
        ],
    )
    .header(
        Row::new(vec!["#", "Station", "Stories", "Status"])
            .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
    )
    .block(panel_block("Stations"))
    .row_highlight_style(
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, body_chunks[0], &mut state.stations);

    let details = match state
        .stations
        .selected()
        .and_then(|selected| stations.get(selected))
    {
        Some(station) => {
            let point = station_position(station.ordinal);
            let episodes = session.catalog().episodes_for_station(&station.id);
            let read = episodes
                .iter()
                .filter(|episode| session.ledger().is_viewed(&episode.id))
                .count();
            let lines: Vec<String> = station.lines.iter().map(|line| line.to_string()).collect();
            format!(
                "Station\n{}\n\nLines\n{}\n\nStories\n{read} of {} read\n\nStatus\n{}\n\nDiagram\nrow {}, at ({}, {})",
                truncate(&station.display_name, 30),
                lines.join(", "),
                episodes.len(),
                marker_label(markers.get(&station.id)),
                station_row(station.ordinal) + 1,
                point.x,
                point.y,
            )
        }
        None => "This line has no stations.".to_string(),
    };
    let selection = Paragraph::new(details)
        .style(Style::default().fg(Color::Rgb(230, 230, 230)))
        .block(panel_block("Selected"))
        .alignment(Alignment::Left);
    frame.render_widget(selection, body_chunks[1]);
}

fn draw_history<R: RemoteLedger>(
    frame: &mut Frame,
    area: Rect,
    session: &StorySession<'_, '_, R>,
    state: &mut TuiState,
) {
    let entries = history_entries(session);
    if entries.is_empty() {
        let empty = Paragraph::new("Nothing read yet.\n\nOpen a station or press r on the map.")
            .alignment(Alignment::Center)
            .block(panel_block("History"));
        frame.render_widget(empty, area);
        return;
    }

    let rows: Vec<Row> = entries
        .iter()
        .map(|entry| {
            Row::new(vec![
                Cell::from(entry.kind.label()),
                Cell::from(truncate(&station_name(session.catalog(), entry.episode), 16)),
                Cell::from(entry.episode.title.clone()),
            ])
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(18),
            Constraint::Percentage(70),
        ],
    )
    .header(
        Row::new(vec!["List", "Station", "Episode"])
            .style(Style::default().fg(ACCENT).add_modifier(Modifier::BOLD)),
    )
    .block(panel_block("History"))
    .row_highlight_style(
        Style::default()
            .bg(ACCENT)
            .fg(Color::Black)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("▸ ");
    frame.render_stateful_widget(table, area, &mut state.history);
}

fn marker_style(marker: Option<&MarkerState>) -> Style {
    match marker {
        Some(MarkerState {
            color: MarkerColor::Visited,
            ..
        }) => Style::default().fg(VISITED),
        Some(MarkerState {
            clickable: true, ..
        }) => Style::default().fg(Color::Rgb(230, 235, 242)),
        Some(_) | None => Style::default().fg(Color::Rgb(110, 118, 130)),
    }
}

fn panel_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(Style::default().fg(Color::Rgb(125, 135, 150)))
        .title(title)
}

fn modal_block(title: &'static str) -> Block<'static> {
    Block::default()
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded)
        .border_style(
            Style::default()
                .fg(Color::Rgb(160, 190, 235))
                .add_modifier(Modifier::BOLD),
        )
        .title(title)
        .padding(Padding::new(2, 2, 1, 1))
}

fn key_hint(key: &'static str) -> Span<'static> {
    Span::styled(
        format!(" {key} "),
        Style::default()
            .bg(Color::Rgb(72, 82, 96))
            .fg(Color::Rgb(230, 235, 242)),
    )
}

fn hint_text(text: &'static str) -> Span<'static> {
    Span::styled(text, Style::default().fg(Color::Rgb(185, 195, 210)))
}

fn controls_line(view: &View) -> Line<'static> {
    let mut spans = match view {
        View::Map => vec![
            key_hint("↑/↓"),
            hint_text(" move  "),
            key_hint("Enter"),
            hint_text(" open  "),
            key_hint("r"),
            hint_text(" random  "),
            key_hint("h"),
            hint_text(" history  "),
        ],
        View::Story(_) => vec![
            key_hint("b"),
            hint_text(" save  "),
            key_hint("r"),
            hint_text(" random  "),
            key_hint("Esc"),
            hint_text(" map  "),
        ],
        View::History => vec![
            key_hint("↑/↓"),
            hint_text(" move  "),
            key_hint("Enter"),
            hint_text(" reread  "),
            key_hint("Esc"),
            hint_text(" map  "),
        ],
    };
    spans.push(key_hint("q"));
    spans.push(hint_text(" quit"));
    Line::from(spans)
}

fn status_style(status: &str) -> Style {
    if status.starts_with("ERROR:") {
        Style::default()
            .fg(Color::Rgb(255, 145, 120))
            .add_modifier(Modifier::BOLD)
    } else if status.starts_with("INFO:") {
        Style::default().fg(Color::Rgb(205, 165, 255))
    } else {
        Style::default().fg(Color::Rgb(230, 235, 242))
    }
}

fn centered_fixed_rect(width: u16, height: u16, area: Rect) -> Rect {
    let clamped_width = width.min(area.width.max(1));
    let clamped_height = height.min(area.height.max(1));
    let x = area.x + area.width.saturating_sub(clamped_width) / 2;
    let y = area.y + area.height.saturating_sub(clamped_height) / 2;
    Rect::new(x, y, clamped_width, clamped_height)
}

fn render_popup_shadow(frame: &mut Frame, popup_area: Rect) {
    let area = frame.area();
    let shadow = Rect::new(
        (popup_area.x + 1).min(area.x + area.width.saturating_sub(1)),
        (popup_area.y + 1).min(area.y + area.height.saturating_sub(1)),
        popup_area.width.saturating_sub(1),
        popup_area.height.saturating_sub(1),
    );
    if shadow.width == 0 || shadow.height == 0 {
        return;
    }
    let shadow_block = Block::default().style(Style::default().bg(Color::Rgb(14, 16, 24)));
    frame.render_widget(shadow_block, shadow);
}

fn popup_rect_for_text(area: Rect, text: &str) -> Rect {
    let max_line_width = text
        .lines()
        .map(|line| line.chars().count() as u16)
        .max()
        .unwrap_or(0);
    let line_count = text.lines().count() as u16;

    let available_width = area.width.saturating_sub(2).max(1);
    let min_width = 48.min(available_width);
    let max_width = 72.min(available_width);
    let desired_width = max_line_width.saturating_add(12);
    let width = desired_width.clamp(min_width, max_width);

    let available_height = area.height.saturating_sub(2).max(1);
    let min_height = 10.min(available_height);
    let max_height = 18.min(available_height);
    let desired_height = line_count.saturating_add(6);
    let height = desired_height.clamp(min_height, max_height);

    centered_fixed_rect(width, height, area)
}
