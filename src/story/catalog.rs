use std::collections::{BTreeSet, HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;

use super::{EpisodeId, LineId, StationId};

const BUNDLED_CATALOG: &str = include_str!("../../data/line3.json");

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Station {
    pub(crate) id: StationId,
    pub(crate) display_name: String,
    pub(crate) lines: BTreeSet<LineId>,
    /// Position on the owning line; only drives map layout.
    pub(crate) ordinal: usize,
}

/// One image+caption cut of an episode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Panel {
    pub(crate) order: u32,
    pub(crate) image_ref: Option<String>,
    pub(crate) caption: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Episode {
    pub(crate) id: EpisodeId,
    pub(crate) station_id: StationId,
    pub(crate) title: String,
    pub(crate) panels: Vec<Panel>,
    pub(crate) created_rank: u32,
}

#[derive(Debug, Error)]
pub(crate) enum CatalogError {
    #[error("failed to parse story catalog: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read story catalog from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("duplicate line id `{0}`")]
    DuplicateLine(String),
    #[error("line `{0}` has no stations")]
    EmptyLine(String),
    #[error("station `{station}` listed twice on line `{line}`")]
    DuplicateStation { line: String, station: String },
    #[error("episode id must not be empty (station `{0}`)")]
    EmptyEpisodeId(String),
    #[error("duplicate episode id `{0}`")]
    DuplicateEpisode(String),
    #[error("episode `{episode}` references unknown station `{station}`")]
    UnknownStation { episode: String, station: String },
}

/// Read-only access to episodes, as the selection engine needs it.
pub(crate) trait EpisodeCatalog {
    fn episode(&self, id: &EpisodeId) -> Option<&Episode>;

    /// Episodes of one station, lowest `created_rank` first.
    fn episodes_for_station(&self, station: &StationId) -> Vec<&Episode>;

    /// Episodes of every station on the line, in line order.
    fn episodes_for_line(&self, line: &LineId) -> Vec<&Episode>;

    fn contains(&self, id: &EpisodeId) -> bool {
        self.episode(id).is_some()
    }
}

/// Station names compare on this form: trimmed, without a trailing `역` or `station`.
pub(crate) fn normalize_station_name(name: &str) -> String {
    let trimmed = name.trim();
    let stripped = if let Some(rest) = trimmed.strip_suffix('역') {
        rest
    } else if let Some(split) = trimmed.len().checked_sub(" station".len())
        && let Some(tail) = trimmed.get(split..)
        && tail.eq_ignore_ascii_case(" station")
    {
        &trimmed[..split]
    } else {
        trimmed
    };

    let stripped = stripped.trim();
    if stripped.is_empty() {
        trimmed.to_string()
    } else {
        stripped.to_string()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StationCatalog {
    pub(crate) line: LineId,
    pub(crate) name: String,
    stations: Vec<Station>,
}

impl StationCatalog {
    pub(crate) fn stations(&self) -> &[Station] {
        &self.stations
    }

    pub(crate) fn get(&self, id: &StationId) -> Option<&Station> {
        self.stations.iter().find(|station| &station.id == id)
    }

    /// Look a station up by any spelling of its name.
    pub(crate) fn find(&self, query: &str) -> Option<&Station> {
        let key = normalize_station_name(query);
        self.stations.iter().find(|station| {
            station.id.as_str() == key || normalize_station_name(&station.display_name) == key
        })
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct EpisodeIndex {
    episodes: Vec<Episode>,
    by_id: HashMap<EpisodeId, usize>,
    by_station: HashMap<StationId, Vec<usize>>,
    stations_by_line: HashMap<LineId, Vec<StationId>>,
}

impl EpisodeIndex {
    pub(crate) fn new(
        episodes: Vec<Episode>,
        lines: &[StationCatalog],
    ) -> Result<Self, CatalogError> {
        let mut by_id = HashMap::with_capacity(episodes.len());
        let mut by_station: HashMap<StationId, Vec<usize>> = HashMap::new();
        for (idx, episode) in episodes.iter().enumerate() {
            if by_id.insert(episode.id.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateEpisode(episode.id.to_string()));
            }
            by_station
                .entry(episode.station_id.clone())
                .or_default()
                .push(idx);
        }
        for indices in by_station.values_mut() {
            indices.sort_by(|left, right| {
                let (a, b) = (&episodes[*left], &episodes[*right]);
                a.created_rank.cmp(&b.created_rank).then_with(|| a.id.cmp(&b.id))
            });
        }

        let stations_by_line = lines
            .iter()
            .map(|line| {
                let ids = line.stations.iter().map(|station| station.id.clone());
                (line.line.clone(), ids.collect())
            })
            .collect();

        Ok(Self {
            episodes,
            by_id,
            by_station,
            stations_by_line,
        })
    }

    pub(crate) fn len(&self) -> usize {
        self.episodes.len()
    }
}

impl EpisodeCatalog for EpisodeIndex {
    fn episode(&self, id: &EpisodeId) -> Option<&Episode> {
        self.by_id.get(id).map(|idx| &self.episodes[*idx])
    }

    fn episodes_for_station(&self, station: &StationId) -> Vec<&Episode> {
        self.by_station
            .get(station)
            .map(|indices| indices.iter().map(|idx| &self.episodes[*idx]).collect())
            .unwrap_or_default()
    }

    fn episodes_for_line(&self, line: &LineId) -> Vec<&Episode> {
        let Some(stations) = self.stations_by_line.get(line) else {
            return Vec::new();
        };
        stations
            .iter()
            .flat_map(|station| self.episodes_for_station(station))
            .collect()
    }
}

/// Lines and episodes, loaded once per process and never mutated.
#[derive(Debug, Clone)]
pub(crate) struct StoryCatalog {
    lines: Vec<StationCatalog>,
    index: EpisodeIndex,
}

#[derive(Debug, Deserialize)]
struct CatalogBundle {
    lines: Vec<LineRecord>,
    #[serde(default)]
    episodes: Vec<EpisodeRecord>,
}

#[derive(Debug, Deserialize)]
struct LineRecord {
    id: String,
    #[serde(default)]
    name: Option<String>,
    stations: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct EpisodeRecord {
    id: String,
    station: String,
    title: String,
    #[serde(default)]
    rank: Option<u32>,
    #[serde(default)]
    panels: Vec<PanelRecord>,
}

#[derive(Debug, Deserialize)]
struct PanelRecord {
    order: u32,
    #[serde(default)]
    image: Option<String>,
    #[serde(default)]
    caption: String,
}

impl StoryCatalog {
    pub(crate) fn bundled() -> Result<Self, CatalogError> {
        Self::from_json(BUNDLED_CATALOG)
    }

    pub(crate) fn load(path: &Path) -> Result<Self, CatalogError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub(crate) fn from_json(raw: &str) -> Result<Self, CatalogError> {
        let bundle: CatalogBundle = serde_json::from_str(raw)?;
        Self::from_bundle(bundle)
    }

    fn from_bundle(bundle: CatalogBundle) -> Result<Self, CatalogError> {
        let mut memberships: HashMap<StationId, BTreeSet<LineId>> = HashMap::new();
        let mut line_ids = HashSet::new();
        for line in &bundle.lines {
            if !line_ids.insert(line.id.clone()) {
                return Err(CatalogError::DuplicateLine(line.id.clone()));
            }
            if line.stations.is_empty() {
                return Err(CatalogError::EmptyLine(line.id.clone()));
            }
            let mut on_line = HashSet::new();
            for name in &line.stations {
                let id = StationId::new(normalize_station_name(name));
                if !on_line.insert(id.clone()) {
                    return Err(CatalogError::DuplicateStation {
                        line: line.id.clone(),
                        station: name.clone(),
                    });
                }
                memberships
                    .entry(id)
                    .or_default()
                    .insert(LineId::new(line.id.as_str()));
            }
        }

        let lines: Vec<StationCatalog> = bundle
            .lines
            .into_iter()
            .map(|line| {
                let name = line
                    .name
                    .map(|value| value.trim().to_string())
                    .filter(|value| !value.is_empty())
                    .unwrap_or_else(|| format!("Line {}", line.id));
                let stations = line
                    .stations
                    .into_iter()
                    .enumerate()
                    .map(|(ordinal, display_name)| {
                        let id = StationId::new(normalize_station_name(&display_name));
                        Station {
                            lines: memberships.get(&id).cloned().unwrap_or_default(),
                            id,
                            display_name: display_name.trim().to_string(),
                            ordinal,
                        }
                    })
                    .collect();
                StationCatalog {
                    line: LineId::new(line.id),
                    name,
                    stations,
                }
            })
            .collect();

        let mut episodes = Vec::with_capacity(bundle.episodes.len());
        for (position, record) in bundle.episodes.into_iter().enumerate() {
            let station_id = StationId::new(normalize_station_name(&record.station));
            if record.id.trim().is_empty() {
                return Err(CatalogError::EmptyEpisodeId(record.station));
            }
            if !memberships.contains_key(&station_id) {
                return Err(CatalogError::UnknownStation {
                    episode: record.id,
                    station: record.station,
                });
            }

            let mut panels: Vec<Panel> = record
                .panels
                .into_iter()
                .map(|panel| Panel {
                    order: panel.order,
                    image_ref: panel
                        .image
                        .map(|value| value.trim().to_string())
                        .filter(|value| !value.is_empty()),
                    caption: panel.caption.trim().to_string(),
                })
                .collect();
            panels.sort_by_key(|panel| panel.order);

            episodes.push(Episode {
                id: EpisodeId::new(record.id.trim()),
                station_id,
                title: record.title.trim().to_string(),
                panels,
                created_rank: record.rank.unwrap_or(position as u32 + 1),
            });
        }

        let index = EpisodeIndex::new(episodes, &lines)?;
        Ok(Self { lines, index })
    }

    pub(crate) fn line(&self, id: &LineId) -> Option<&StationCatalog> {
        self.lines.iter().find(|line| &line.line == id)
    }

    pub(crate) fn lines(&self) -> &[StationCatalog] {
        &self.lines
    }

    pub(crate) fn index(&self) -> &EpisodeIndex {
        &self.index
    }

    /// The station an episode belongs to, on whichever line lists it first.
    pub(crate) fn station(&self, id: &StationId) -> Option<&Station> {
        self.lines.iter().find_map(|line| line.get(id))
    }
}

impl EpisodeCatalog for StoryCatalog {
    fn episode(&self, id: &EpisodeId) -> Option<&Episode> {
        self.index.episode(id)
    }

    fn episodes_for_station(&self, station: &StationId) -> Vec<&Episode> {
        self.index.episodes_for_station(station)
    }

    fn episodes_for_line(&self, line: &LineId) -> Vec<&Episode> {
        self.index.episodes_for_line(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL: &str = r#"{
        "lines": [
            { "id": "3", "stations": ["Gyeongbokgung Station", "Anguk", "Jongno 3-ga"] },
            { "id": "5", "name": "Line 5", "stations": ["Jongno 3-ga", "Gwanghwamun"] }
        ],
        "episodes": [
            { "id": "E2", "station": "Gyeongbokgung", "title": "Gate", "rank": 2,
              "panels": [{ "order": 2, "caption": "second" }, { "order": 1, "image": " ", "caption": "first" }] },
            { "id": "E1", "station": "Gyeongbokgung station", "title": "Palace", "rank": 1 },
            { "id": "E3", "station": "Jongno 3-ga", "title": "Market" }
        ]
    }"#;

    #[test]
    fn normalize_strips_station_suffixes_and_whitespace() {
        assert_eq!(normalize_station_name("  경복궁역 "), "경복궁");
        assert_eq!(normalize_station_name("Gyeongbokgung Station"), "Gyeongbokgung");
        assert_eq!(normalize_station_name("Gyeongbokgung station"), "Gyeongbokgung");
        assert_eq!(normalize_station_name("종로3가"), "종로3가");
    }

    #[test]
    fn normalize_keeps_names_that_would_become_empty() {
        assert_eq!(normalize_station_name("역"), "역");
        assert_eq!(normalize_station_name(" station"), "station");
    }

    #[test]
    fn bundled_catalog_loads_line_three() {
        let catalog = StoryCatalog::bundled().expect("bundled catalog should parse");
        let line = catalog
            .line(&LineId::from("3"))
            .expect("line 3 should exist");
        assert_eq!(line.stations().len(), 44);
        for (expected, station) in line.stations().iter().enumerate() {
            assert_eq!(station.ordinal, expected);
        }

        let gbg = line.find("경복궁역").expect("lookup by suffixed name");
        assert_eq!(catalog.episodes_for_station(&gbg.id).len(), 3);
        assert_eq!(catalog.episodes_for_line(&line.line).len(), catalog.index().len());
    }

    #[test]
    fn station_lists_are_sorted_by_rank_and_panels_by_order() {
        let catalog = StoryCatalog::from_json(SMALL).expect("catalog should parse");
        let station = StationId::from("Gyeongbokgung");
        let ids: Vec<&str> = catalog
            .episodes_for_station(&station)
            .iter()
            .map(|episode| episode.id.as_str())
            .collect();
        assert_eq!(ids, vec!["E1", "E2"]);

        let gate = catalog
            .episode(&EpisodeId::from("E2"))
            .expect("E2 should exist");
        assert_eq!(gate.panels[0].caption, "first");
        assert_eq!(gate.panels[0].image_ref, None);
        assert_eq!(
            catalog
                .episode(&EpisodeId::from("E3"))
                .map(|episode| episode.created_rank),
            Some(3)
        );
    }

    #[test]
    fn shared_station_belongs_to_both_lines() {
        let catalog = StoryCatalog::from_json(SMALL).expect("catalog should parse");
        let jongno = catalog
            .line(&LineId::from("5"))
            .and_then(|line| line.find("Jongno 3-ga"))
            .expect("station on line 5");
        assert_eq!(jongno.ordinal, 0);
        assert_eq!(jongno.lines.len(), 2);
        assert_eq!(catalog.episodes_for_line(&LineId::from("5")).len(), 1);
        assert_eq!(catalog.line(&LineId::from("3")).map(|l| l.name.as_str()), Some("Line 3"));
    }

    #[test]
    fn rejects_episode_for_unknown_station() {
        let raw = r#"{ "lines": [{ "id": "3", "stations": ["A"] }],
                       "episodes": [{ "id": "x", "station": "B", "title": "t" }] }"#;
        let err = StoryCatalog::from_json(raw).expect_err("unknown station must fail");
        assert!(matches!(err, CatalogError::UnknownStation { .. }), "{err}");
    }

    #[test]
    fn rejects_duplicate_ids_and_stations() {
        let dup_episode = r#"{ "lines": [{ "id": "3", "stations": ["A"] }],
            "episodes": [{ "id": "x", "station": "A", "title": "t" },
                         { "id": "x", "station": "A", "title": "u" }] }"#;
        assert!(matches!(
            StoryCatalog::from_json(dup_episode),
            Err(CatalogError::DuplicateEpisode(_))
        ));

        let dup_station = r#"{ "lines": [{ "id": "3", "stations": ["A역", "A"] }] }"#;
        assert!(matches!(
            StoryCatalog::from_json(dup_station),
            Err(CatalogError::DuplicateStation { .. })
        ));

        let empty_line = r#"{ "lines": [{ "id": "3", "stations": [] }] }"#;
        assert!(matches!(
            StoryCatalog::from_json(empty_line),
            Err(CatalogError::EmptyLine(_))
        ));
    }
}
