use rand::Rng;
use rand::seq::SliceRandom;
use tracing::debug;

use super::{Actor, Episode, EpisodeCatalog, EpisodeId, LineId, StationId, VisitLedger};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SelectionRequest {
    ByStation(StationId),
    ByEpisode(EpisodeId),
    Random(LineId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Resolution<'c> {
    Found(&'c Episode),
    NotFound,
}

impl<'c> Resolution<'c> {
    pub(crate) fn episode(self) -> Option<&'c Episode> {
        match self {
            Self::Found(episode) => Some(episode),
            Self::NotFound => None,
        }
    }
}

/// Resolves a request to one episode.
///
/// Members get the "prefer unseen" policy: a station serves its lowest ranked
/// unseen episode, then resumes at the last one read; a random draw prefers
/// unseen episodes of the whole line. Guests always get a uniform pick.
pub(crate) struct SelectionEngine<'c, C: EpisodeCatalog> {
    catalog: &'c C,
}

impl<'c, C: EpisodeCatalog> SelectionEngine<'c, C> {
    pub(crate) fn new(catalog: &'c C) -> Self {
        Self { catalog }
    }

    /// Pick without touching the ledger.
    pub(crate) fn pick<R: Rng + ?Sized>(
        &self,
        request: &SelectionRequest,
        actor: &Actor,
        ledger: &VisitLedger,
        rng: &mut R,
    ) -> Option<&'c Episode> {
        match request {
            SelectionRequest::ByEpisode(id) => self.catalog.episode(id),
            SelectionRequest::ByStation(station) => {
                let candidates = self.catalog.episodes_for_station(station);
                if candidates.is_empty() {
                    return None;
                }
                if !actor.is_authenticated() {
                    return candidates.choose(rng).copied();
                }

                let first_unseen = candidates
                    .iter()
                    .filter(|episode| !ledger.is_viewed(&episode.id))
                    .min_by(|a, b| {
                        a.created_rank
                            .cmp(&b.created_rank)
                            .then_with(|| a.id.cmp(&b.id))
                    })
                    .copied();
                first_unseen.or_else(|| {
                    candidates
                        .iter()
                        .filter_map(|episode| {
                            ledger.view_recency(&episode.id).map(|rank| (rank, *episode))
                        })
                        .max_by_key(|(rank, _)| *rank)
                        .map(|(_, episode)| episode)
                        .or_else(|| candidates.first().copied())
                })
            }
            SelectionRequest::Random(line) => {
                let pool = self.catalog.episodes_for_line(line);
                if actor.is_authenticated() {
                    let unseen: Vec<&'c Episode> = pool
                        .iter()
                        .copied()
                        .filter(|episode| !ledger.is_viewed(&episode.id))
                        .collect();
                    if let Some(episode) = unseen.choose(rng) {
                        return Some(*episode);
                    }
                }
                pool.choose(rng).copied()
            }
        }
    }

    /// Pick, then record the view in the same step so the next call sees it.
    pub(crate) fn resolve<R: Rng + ?Sized>(
        &self,
        request: &SelectionRequest,
        actor: &Actor,
        ledger: &mut VisitLedger,
        rng: &mut R,
    ) -> Resolution<'c> {
        match self.pick(request, actor, ledger, rng) {
            Some(episode) => {
                let first_view = ledger.mark_viewed(&episode.id);
                debug!(
                    episode = %episode.id,
                    station = %episode.station_id,
                    first_view,
                    "resolved {request:?}"
                );
                Resolution::Found(episode)
            }
            None => {
                debug!("no episode for {request:?}");
                Resolution::NotFound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::story::{Account, StoryCatalog};

    const FIXTURE: &str = r#"{
        "lines": [{ "id": "3", "stations": ["Gyeongbokgung", "Anguk", "Sinsa", "Oksu"] }],
        "episodes": [
            { "id": "E2", "station": "Gyeongbokgung", "title": "Gwanghwamun", "rank": 2 },
            { "id": "E1", "station": "Gyeongbokgung", "title": "Royal palace", "rank": 1 },
            { "id": "A1", "station": "Anguk", "title": "Bukchon", "rank": 3 },
            { "id": "S1", "station": "Sinsa", "title": "Garosu-gil", "rank": 4 },
            { "id": "S2", "station": "Sinsa", "title": "Ferry", "rank": 5 },
            { "id": "S3", "station": "Sinsa", "title": "Hills", "rank": 6 }
        ]
    }"#;

    fn catalog() -> StoryCatalog {
        StoryCatalog::from_json(FIXTURE).expect("fixture catalog")
    }

    fn member() -> Actor {
        Actor::Account(Account {
            id: 1,
            username: "rider".to_string(),
            email: String::new(),
        })
    }

    fn station(name: &str) -> SelectionRequest {
        SelectionRequest::ByStation(StationId::from(name))
    }

    fn resolved_id(resolution: Resolution<'_>) -> &str {
        resolution
            .episode()
            .map(|episode| episode.id.as_str())
            .expect("expected an episode")
    }

    #[test]
    fn member_walks_unseen_by_rank_then_resumes_last_read() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(3);
        let actor = member();

        let first = engine.resolve(&station("Gyeongbokgung"), &actor, &mut ledger, &mut rng);
        assert_eq!(resolved_id(first), "E1");
        assert!(ledger.is_viewed(&EpisodeId::from("E1")));

        let second = engine.resolve(&station("Gyeongbokgung"), &actor, &mut ledger, &mut rng);
        assert_eq!(resolved_id(second), "E2");
        assert!(ledger.is_viewed(&EpisodeId::from("E2")));

        let third = engine.resolve(&station("Gyeongbokgung"), &actor, &mut ledger, &mut rng);
        assert_eq!(resolved_id(third), "E2");
        assert_eq!(ledger.viewed().len(), 2);
    }

    #[test]
    fn member_never_gets_the_viewed_episode_while_others_remain() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let actor = member();
        for viewed in ["S1", "S2", "S3"] {
            let ledger =
                VisitLedger::from_parts([EpisodeId::from(viewed)], Vec::<EpisodeId>::new());
            for seed in 0..20 {
                let mut rng = StdRng::seed_from_u64(seed);
                let picked = engine
                    .pick(&station("Sinsa"), &actor, &ledger, &mut rng)
                    .expect("station has episodes");
                assert_ne!(picked.id.as_str(), viewed);
            }
        }
    }

    #[test]
    fn exhausted_station_still_serves_its_own_episodes() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let actor = member();
        let mut ledger = VisitLedger::from_parts(
            ["S3", "S1", "S2"].map(EpisodeId::from),
            Vec::<EpisodeId>::new(),
        );
        let mut rng = StdRng::seed_from_u64(9);
        for _ in 0..5 {
            let episode = engine
                .resolve(&station("Sinsa"), &actor, &mut ledger, &mut rng)
                .episode()
                .expect("exhaustion must not yield NotFound");
            assert_eq!(episode.station_id.as_str(), "Sinsa");
            assert_eq!(episode.id.as_str(), "S2");
        }
    }

    #[test]
    fn guest_station_picks_are_roughly_uniform() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<String, usize> = HashMap::new();
        let draws = 3000;
        for _ in 0..draws {
            let resolution =
                engine.resolve(&station("Sinsa"), &Actor::Anonymous, &mut ledger, &mut rng);
            *counts.entry(resolved_id(resolution).to_string()).or_default() += 1;
        }
        assert_eq!(counts.len(), 3);
        for (id, count) in counts {
            assert!(
                (850..=1150).contains(&count),
                "episode {id} drawn {count} times out of {draws}"
            );
        }
    }

    #[test]
    fn guest_clicking_twenty_times_sees_both_episodes() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(2024);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..20 {
            let resolution = engine.resolve(
                &station("Gyeongbokgung"),
                &Actor::Anonymous,
                &mut ledger,
                &mut rng,
            );
            *counts.entry(resolved_id(resolution).to_string()).or_default() += 1;
        }
        assert!(counts.get("E1").copied().unwrap_or(0) >= 3, "{counts:?}");
        assert!(counts.get("E2").copied().unwrap_or(0) >= 3, "{counts:?}");
    }

    #[test]
    fn unknown_episode_and_empty_station_are_not_found() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(0);
        for actor in [Actor::Anonymous, member()] {
            let missing = SelectionRequest::ByEpisode(EpisodeId::from("does-not-exist"));
            assert_eq!(
                engine.resolve(&missing, &actor, &mut ledger, &mut rng),
                Resolution::NotFound
            );
            assert_eq!(
                engine.resolve(&station("Oksu"), &actor, &mut ledger, &mut rng),
                Resolution::NotFound
            );
            let other_line = SelectionRequest::Random(LineId::from("9"));
            assert_eq!(
                engine.resolve(&other_line, &actor, &mut ledger, &mut rng),
                Resolution::NotFound
            );
        }
        assert!(ledger.viewed().is_empty());
    }

    #[test]
    fn by_episode_marks_the_episode_viewed() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(0);
        let request = SelectionRequest::ByEpisode(EpisodeId::from("A1"));
        let resolution = engine.resolve(&request, &Actor::Anonymous, &mut ledger, &mut rng);
        assert_eq!(resolved_id(resolution), "A1");
        assert_eq!(ledger.viewed(), [EpisodeId::from("A1")].as_slice());
    }

    #[test]
    fn member_random_draws_cover_the_line_before_repeating() {
        let catalog = catalog();
        let engine = SelectionEngine::new(&catalog);
        let mut ledger = VisitLedger::default();
        let mut rng = StdRng::seed_from_u64(77);
        let request = SelectionRequest::Random(LineId::from("3"));
        let total = catalog.episodes_for_line(&LineId::from("3")).len();

        for _ in 0..total {
            let resolution = engine.resolve(&request, &member(), &mut ledger, &mut rng);
            assert!(resolution.episode().is_some());
        }
        assert_eq!(ledger.viewed().len(), total);

        let after = engine.resolve(&request, &member(), &mut ledger, &mut rng);
        assert!(after.episode().is_some(), "fully seen line falls back to the whole pool");
    }
}
