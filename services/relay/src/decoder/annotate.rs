use super::model::{Computed, Player, Replay, TeamRoster};
use std::collections::BTreeMap;

/// Real-time length of one frame at Fastest speed
const FRAME_MS: u64 = 42;

/// Fill in the derived fields of a decoded replay
pub fn annotate(mut replay: Replay) -> Replay {
    let header = &replay.header;
    let duration_ms = u64::from(header.frames) * FRAME_MS;
    let teams = team_rosters(&header.players);

    let computed = Computed {
        duration_ms,
        duration: format_duration(duration_ms),
        matchup: matchup(&header.players),
        player_count: header.players.len(),
        teams,
        map_size: format!("{}x{}", header.map_width, header.map_height),
    };

    replay.computed = Some(computed);
    replay
}

/// Players grouped by team. In melee games everyone reports the same team,
/// in which case every player forms a team of their own.
fn teams(players: &[Player]) -> Vec<Vec<&Player>> {
    let mut by_team: BTreeMap<u8, Vec<&Player>> = BTreeMap::new();
    for p in players {
        by_team.entry(p.team).or_default().push(p);
    }

    if by_team.len() <= 1 && players.len() > 1 {
        return players.iter().map(|p| vec![p]).collect();
    }
    by_team.into_values().collect()
}

fn team_rosters(players: &[Player]) -> Vec<TeamRoster> {
    teams(players)
        .into_iter()
        .enumerate()
        .map(|(i, members)| TeamRoster {
            team: members
                .first()
                .map(|p| p.team)
                .filter(|&t| t != 0)
                .unwrap_or(i as u8 + 1),
            players: members.iter().map(|p| p.name.clone()).collect(),
        })
        .collect()
}

fn matchup(players: &[Player]) -> String {
    teams(players)
        .iter()
        .map(|members| {
            let mut letters: Vec<char> = members.iter().map(|p| p.race.letter()).collect();
            letters.sort_unstable();
            letters.into_iter().collect::<String>()
        })
        .collect::<Vec<_>>()
        .join("v")
}

fn format_duration(ms: u64) -> String {
    let total = ms / 1000;
    let (h, m, s) = (total / 3600, total % 3600 / 60, total % 60);
    if h > 0 {
        format!("{}:{:02}:{:02}", h, m, s)
    } else {
        format!("{}:{:02}", m, s)
    }
}
