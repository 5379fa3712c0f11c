use std::collections::HashSet;

use crate::models::{Player, RosterEntry};

/// Collapses roster entries into one row per player id.
///
/// The first entry for a given id in input order wins; later entries are
/// discarded without reconciliation. Entries without an id are skipped.
pub fn build_player_dimension(roster: &[RosterEntry]) -> Vec<Player> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for entry in roster {
        let Some(player_id) = entry.player_id.as_deref() else {
            continue;
        };
        if !seen.insert(player_id.to_string()) {
            continue;
        }
        out.push(Player {
            player_id: player_id.to_string(),
            first_name: entry.first_name.clone(),
            last_name: entry.last_name.clone(),
            full_name: full_name(entry.first_name.as_deref(), entry.last_name.as_deref()),
            position: entry.position.clone(),
            birth_date: entry.birth_date.clone(),
        });
    }
    out
}

/// `first + " " + last`; undefined when either part is missing.
pub fn full_name(first: Option<&str>, last: Option<&str>) -> Option<String> {
    match (first, last) {
        (Some(first), Some(last)) => Some(format!("{first} {last}")),
        _ => None,
    }
}
