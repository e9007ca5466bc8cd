use chrono::{DateTime, Local};

use crate::story::{Episode, MarkerColor, MarkerState};

pub(crate) const MISSING_IMAGE: &str = "(image unavailable)";

pub(crate) fn truncate(s: &str, max: usize) -> String {
    let mut out = s.to_string();
    if out.chars().count() > max {
        out = out.chars().take(max.saturating_sub(3)).collect::<String>() + "...";
    }
    out
}

pub(crate) fn format_timestamp_display(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| {
            dt.with_timezone(&Local)
                .format("%Y-%m-%d %H:%M %:z")
                .to_string()
        })
        .unwrap_or_else(|_| raw.to_string())
}

pub(crate) fn marker_label(state: Option<&MarkerState>) -> &'static str {
    match state {
        Some(MarkerState {
            color: MarkerColor::Visited,
            ..
        }) => "visited",
        Some(MarkerState {
            clickable: true, ..
        }) => "open",
        Some(_) | None => "locked",
    }
}

/// Plain text rendering of an episode: heading, then one block per panel.
pub(crate) fn episode_text(episode: &Episode, station_name: &str, saved: bool) -> String {
    let mut out = format!(
        "{}  [{}]{}\n",
        episode.title,
        station_name,
        if saved { "  (saved)" } else { "" }
    );
    if episode.panels.is_empty() {
        out.push_str("\nThis episode has no panels yet.\n");
        return out;
    }
    for panel in &episode.panels {
        let image = panel.image_ref.as_deref().unwrap_or(MISSING_IMAGE);
        out.push_str(&format!("\n#{} {image}\n", panel.order));
        if !panel.caption.trim().is_empty() {
            out.push_str(&format!("   {}\n", panel.caption.trim()));
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{EpisodeId, Panel, StationId};

    #[test]
    fn truncate_marks_cut_text() {
        assert_eq!(truncate("Gyeongbokgung", 8), "Gyeon...");
        assert_eq!(truncate("경복궁", 8), "경복궁");
    }

    #[test]
    fn timestamp_falls_back_to_raw_text() {
        assert_eq!(format_timestamp_display("yesterday"), "yesterday");
        assert!(format_timestamp_display("2026-01-02T03:04:05+00:00").starts_with("2026-01-0"));
    }

    #[test]
    fn episode_text_uses_placeholder_for_missing_images() {
        let episode = Episode {
            id: EpisodeId::from("ep-1"),
            station_id: StationId::from("경복궁"),
            title: "The palace gate".to_string(),
            panels: vec![
                Panel {
                    order: 1,
                    image_ref: Some("media/gbg/1.png".to_string()),
                    caption: "Dawn at Gwanghwamun".to_string(),
                },
                Panel {
                    order: 2,
                    image_ref: None,
                    caption: String::new(),
                },
            ],
            created_rank: 1,
        };
        let text = episode_text(&episode, "경복궁", true);
        assert!(text.starts_with("The palace gate  [경복궁]  (saved)"));
        assert!(text.contains("#1 media/gbg/1.png\n   Dawn at Gwanghwamun"));
        assert!(text.contains(&format!("#2 {MISSING_IMAGE}")));
    }

    #[test]
    fn marker_labels() {
        let visited = MarkerState {
            color: MarkerColor::Visited,
            clickable: true,
        };
        let open = MarkerState {
            color: MarkerColor::Unvisited,
            clickable: true,
        };
        let locked = MarkerState {
            color: MarkerColor::Unvisited,
            clickable: false,
        };
        assert_eq!(marker_label(Some(&visited)), "visited");
        assert_eq!(marker_label(Some(&open)), "open");
        assert_eq!(marker_label(Some(&locked)), "locked");
        assert_eq!(marker_label(None), "locked");
    }
}
