use std::collections::BTreeMap;

use super::{Actor, EpisodeCatalog, Station, StationId, VisitLedger};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MarkerColor {
    Visited,
    Unvisited,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MarkerState {
    pub(crate) color: MarkerColor,
    pub(crate) clickable: bool,
}

/// Color and clickability of every station marker.
///
/// Members may open any station that has a story. Guests may only reopen
/// stations they already visited on this device; new ones come from the
/// random draw.
pub(crate) fn derive_marker_state(
    stations: &[Station],
    actor: &Actor,
    ledger: &VisitLedger,
    catalog: &impl EpisodeCatalog,
) -> BTreeMap<StationId, MarkerState> {
    stations
        .iter()
        .map(|station| {
            let visited = ledger.is_station_visited(&station.id, catalog);
            let clickable = if actor.is_authenticated() {
                !catalog.episodes_for_station(&station.id).is_empty()
            } else {
                visited
            };
            let color = if visited {
                MarkerColor::Visited
            } else {
                MarkerColor::Unvisited
            };
            (station.id.clone(), MarkerState { color, clickable })
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct MapPoint {
    pub(crate) x: u32,
    pub(crate) y: u32,
}

const ROW_STEP: u32 = 70;
const LEFT_EDGE: u32 = 100;

/// Diagram coordinates of the station at `ordinal`: the line snakes across
/// three rows, left to right, back, then left to right again.
pub(crate) fn station_position(ordinal: usize) -> MapPoint {
    let ordinal = ordinal as u32;
    match ordinal {
        0..=15 => MapPoint {
            x: LEFT_EDGE + ordinal * ROW_STEP,
            y: 100,
        },
        16..=30 => MapPoint {
            x: LEFT_EDGE + (30 - ordinal) * ROW_STEP,
            y: 250,
        },
        _ => MapPoint {
            x: LEFT_EDGE + (ordinal - 30) * ROW_STEP,
            y: 400,
        },
    }
}

/// Diagram row (0, 1 or 2) of the station at `ordinal`.
pub(crate) fn station_row(ordinal: usize) -> usize {
    match station_position(ordinal).y {
        100 => 0,
        250 => 1,
        _ => 2,
    }
}
