//! Play-by-play to per-(game, player) statistic rows.
//!
//! Events are split into role views (passing, rushing, receiving, fumbles),
//! each view is grouped by game and the role's player column, and the views
//! are outer-joined on (game, player). Categories a player never appeared in
//! stay at zero. `total_tds` sums every `*_tds` column without checking
//! whether two roles scored the same touchdown, so a completed touchdown pass
//! counts once for the passer's row and once for the receiver's, and a player
//! who both threw and caught a touchdown on the same play gets two.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

use chrono::NaiveDate;

use crate::models::{PlayEvent, PlayerGameStat, StatLine};

type GameKey = (String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Role {
    Passer,
    Rusher,
    Receiver,
    Fumbler,
}

impl Role {
    const ALL: [Role; 4] = [Role::Passer, Role::Rusher, Role::Receiver, Role::Fumbler];

    /// The player this event credits in this role, if the role predicate holds.
    fn player<'a>(self, event: &'a PlayEvent) -> Option<&'a str> {
        let (included, player) = match self {
            Role::Passer => (event.pass_attempt, &event.passer_player_id),
            Role::Rusher => (event.rush_attempt, &event.rusher_player_id),
            Role::Receiver => (event.complete_pass, &event.receiver_player_id),
            Role::Fumbler => (event.fumble, &event.fumbled_player_id),
        };
        if included { player.as_deref() } else { None }
    }

    fn accumulate(self, stats: &mut StatLine, event: &PlayEvent) {
        match self {
            Role::Passer => {
                stats.pass_attempts += 1;
                stats.completions += i64::from(event.complete_pass);
                stats.pass_yards += event.passing_yards;
                stats.pass_tds += i64::from(event.pass_touchdown);
                stats.interceptions += i64::from(event.interception);
            }
            Role::Rusher => {
                stats.rush_attempts += 1;
                stats.rush_yards += event.rushing_yards;
                stats.rush_tds += i64::from(event.rush_touchdown);
            }
            Role::Receiver => {
                stats.receptions += 1;
                stats.rec_yards += event.receiving_yards;
                stats.rec_tds += i64::from(event.pass_touchdown);
            }
            Role::Fumbler => {
                stats.fumbles += 1;
            }
        }
    }
}

#[derive(Debug, Default)]
struct Group {
    stats: StatLine,
    team_id: Option<String>,
    opponent_team_id: Option<String>,
    date_key: Option<i64>,
}

/// One role's grouped view, keyed by (game, player).
fn aggregate_role(events: &[PlayEvent], role: Role) -> BTreeMap<GameKey, Group> {
    let mut view: BTreeMap<GameKey, Group> = BTreeMap::new();
    for event in events {
        let (Some(game_id), Some(player_id)) = (event.game_id.as_deref(), role.player(event))
        else {
            continue;
        };
        let group = view
            .entry((game_id.to_string(), player_id.to_string()))
            .or_insert_with(|| Group {
                team_id: event.posteam.clone(),
                opponent_team_id: event.defteam.clone(),
                date_key: event.game_date.as_deref().and_then(date_key_from_iso),
                ..Group::default()
            });
        role.accumulate(&mut group.stats, event);
    }
    view
}

/// Full outer join of the role views on (game, player). Context columns come
/// from the first view that saw the pair.
fn combine(views: Vec<BTreeMap<GameKey, Group>>) -> BTreeMap<GameKey, Group> {
    let mut combined: BTreeMap<GameKey, Group> = BTreeMap::new();
    for view in views {
        for (key, group) in view {
            match combined.entry(key) {
                Entry::Vacant(slot) => {
                    slot.insert(group);
                }
                Entry::Occupied(mut slot) => {
                    let existing = slot.get_mut();
                    merge_stats(&mut existing.stats, &group.stats);
                    if existing.team_id.is_none() {
                        existing.team_id = group.team_id;
                    }
                    if existing.opponent_team_id.is_none() {
                        existing.opponent_team_id = group.opponent_team_id;
                    }
                    if existing.date_key.is_none() {
                        existing.date_key = group.date_key;
                    }
                }
            }
        }
    }
    combined
}

fn merge_stats(into: &mut StatLine, from: &StatLine) {
    for ((_, slot), value) in into.slots_mut().into_iter().zip(from.values()) {
        *slot += value;
    }
}

/// Aggregates one season of play events. Rows come out ordered by (game, player).
pub fn aggregate_player_games(events: &[PlayEvent]) -> Vec<PlayerGameStat> {
    let views = Role::ALL
        .iter()
        .map(|role| aggregate_role(events, *role))
        .collect::<Vec<_>>();
    let combined = combine(views);
    log::debug!(
        "aggregated {} play events into {} player-game rows",
        events.len(),
        combined.len()
    );

    combined
        .into_iter()
        .map(|((game_id, player_id), group)| {
            let mut stats = group.stats;
            stats.total_tds = stats.sum_tds();
            PlayerGameStat {
                game_id,
                player_id,
                team_id: group.team_id,
                opponent_team_id: group.opponent_team_id,
                date_key: group.date_key,
                fantasy_points: stats.fantasy_points(),
                stats,
            }
        })
        .collect()
}

/// `2025-09-07` (optionally followed by a time) -> `20250907`.
pub fn date_key_from_iso(raw: &str) -> Option<i64> {
    let date_part = raw.trim().get(..10)?;
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()?;
    date.format("%Y%m%d").to_string().parse::<i64>().ok()
}
