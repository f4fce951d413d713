//! Provider payload -> canonical stat records
//!
//! Accepted payload shapes:
//!
//! ```text
//! { "players": [ { "player_id", "team_id", "stats": { ... } } ] }
//! { "teams":   [ { "team_id", "players": [ { "player_id", "stats": { ... } } ] } ] }
//! ```
//!
//! either of them optionally wrapped in `{ "boxscore": ... }` or `{ "data": ... }`.
//! Each category has a fixed table of canonical attributes, the provider
//! aliases that map onto them, and the fantasy weight used for the derived
//! score.

use serde_json::{Map, Value};
use statline_common::types::{CanonicalStatRecord, Category, StatValue, WorkItem};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// One canonical attribute of a category
#[derive(Debug, Clone, Copy)]
pub struct StatField {
    pub canonical: &'static str,
    pub aliases: &'static [&'static str],
    pub weight: f64,
}

const fn field(canonical: &'static str, aliases: &'static [&'static str], weight: f64) -> StatField {
    StatField {
        canonical,
        aliases,
        weight,
    }
}

const NBA_FIELDS: &[StatField] = &[
    field("points", &["pts"], 1.0),
    field("rebounds", &["reb", "totreb", "total_rebounds"], 1.25),
    field("assists", &["ast"], 1.5),
    field("steals", &["stl"], 2.0),
    field("blocks", &["blk"], 2.0),
    field("turnovers", &["to", "tov"], -0.5),
    field("three_pointers_made", &["3pm", "fg3m", "tpm"], 0.5),
    field("minutes", &["min", "mins"], 0.0),
];

const NFL_FIELDS: &[StatField] = &[
    field("passing_yards", &["pass_yds", "passyds"], 0.04),
    field("passing_tds", &["pass_td", "pass_tds", "passtd"], 4.0),
    field("interceptions", &["int", "ints"], -1.0),
    field("rushing_yards", &["rush_yds", "rushyds"], 0.1),
    field("rushing_tds", &["rush_td", "rush_tds", "rushtd"], 6.0),
    field("receptions", &["rec"], 1.0),
    field("receiving_yards", &["rec_yds", "recyds"], 0.1),
    field("receiving_tds", &["rec_td", "rec_tds", "rectd"], 6.0),
    field("fumbles_lost", &["fum_lost", "fumlost"], -2.0),
];

const MLB_FIELDS: &[StatField] = &[
    field("runs", &["r"], 2.0),
    field("hits", &["h"], 3.0),
    field("home_runs", &["hr"], 4.0),
    field("rbi", &["rbis"], 2.0),
    field("walks", &["bb"], 2.0),
    field("stolen_bases", &["sb"], 5.0),
    field("strikeouts", &["so", "k"], -1.0),
    field("innings_pitched", &["ip"], 2.25),
    field("pitching_strikeouts", &["p_so", "pitching_k"], 2.0),
    field("earned_runs", &["er"], -2.0),
];

const NHL_FIELDS: &[StatField] = &[
    field("goals", &["g"], 8.5),
    field("assists", &["a"], 5.0),
    field("shots_on_goal", &["sog", "shots"], 1.5),
    field("blocked_shots", &["blk", "blocks"], 1.3),
    field("saves", &["sv"], 0.7),
    field("goals_against", &["ga"], -3.5),
];

/// Canonical attribute table for a category
pub fn fields_for(category: Category) -> &'static [StatField] {
    match category {
        Category::Nba => NBA_FIELDS,
        Category::Nfl => NFL_FIELDS,
        Category::Mlb => MLB_FIELDS,
        Category::Nhl => NHL_FIELDS,
    }
}

fn lookup(category: Category, key: &str) -> Option<&'static StatField> {
    let key = key.trim().to_ascii_lowercase();
    fields_for(category)
        .iter()
        .find(|f| f.canonical == key || f.aliases.contains(&key.as_str()))
}

/// Weighted fantasy score over canonical numeric attributes
pub fn derived_score(category: Category, attributes: &BTreeMap<String, StatValue>) -> f64 {
    let score: f64 = fields_for(category)
        .iter()
        .filter_map(|f| {
            attributes
                .get(f.canonical)
                .and_then(StatValue::as_f64)
                .map(|v| v * f.weight)
        })
        .sum();
    (score * 100.0).round() / 100.0
}

const PLACEHOLDERS: &[&str] = &["", "-", "--", "dnp", "n/a", "na", "null"];

fn is_placeholder(s: &str) -> bool {
    PLACEHOLDERS.contains(&s.trim().to_ascii_lowercase().as_str())
}

/// "MM:SS" -> fractional minutes
fn parse_clock(s: &str) -> Option<f64> {
    let (minutes, seconds) = s.split_once(':')?;
    let minutes: f64 = minutes.trim().parse().ok()?;
    let seconds: f64 = seconds.trim().parse().ok()?;
    if !(0.0..60.0).contains(&seconds) {
        return None;
    }
    Some(minutes + seconds / 60.0)
}

/// Baseball innings notation: "6.2" is six and two thirds
fn parse_innings(value: f64) -> f64 {
    let whole = value.trunc();
    let outs = ((value - whole) * 10.0).round();
    if (0.0..3.0).contains(&outs) {
        whole + outs / 3.0
    } else {
        value
    }
}

fn numeric(field: &StatField, value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) if is_placeholder(s) => return None,
        Value::String(s) => {
            let s = s.trim();
            match s.parse::<f64>() {
                Ok(n) => n,
                Err(_) if field.canonical == "minutes" => parse_clock(s)?,
                Err(_) => return None,
            }
        },
        _ => return None,
    };
    if !n.is_finite() {
        return None;
    }
    if field.canonical == "innings_pitched" {
        Some(parse_innings(n))
    } else {
        Some(n)
    }
}

/// Stringify an identifier given as a string, integer, or `{ "id": ... }`
fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !is_placeholder(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Object(obj) => obj.get("id").and_then(id_string),
        _ => None,
    }
}

fn first_id(obj: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|k| obj.get(*k).and_then(id_string))
}

const SUBJECT_KEYS: &[&str] = &["player_id", "id", "player"];
const GROUP_KEYS: &[&str] = &["team_id", "team"];
const IDENTITY_KEYS: &[&str] = &[
    "player_id",
    "id",
    "player",
    "team_id",
    "team",
    "name",
    "player_name",
    "stats",
    "statistics",
];

/// A stat line before normalization
struct RawLine<'a> {
    entry: &'a Value,
    team_id: Option<String>,
}

fn unwrap_envelope(mut payload: &Value) -> &Value {
    for _ in 0..3 {
        match payload
            .get("boxscore")
            .or_else(|| payload.get("data"))
            .filter(|v| v.is_object())
        {
            Some(inner) => payload = inner,
            None => break,
        }
    }
    payload
}

fn collect_lines(payload: &Value) -> Result<Vec<RawLine<'_>>, String> {
    let root = unwrap_envelope(payload);
    let root = root
        .as_object()
        .ok_or_else(|| "payload is not a JSON object".to_string())?;

    if let Some(players) = root.get("players") {
        let players = players
            .as_array()
            .ok_or_else(|| "'players' is not an array".to_string())?;
        return Ok(players
            .iter()
            .map(|entry| RawLine {
                entry,
                team_id: None,
            })
            .collect());
    }

    if let Some(teams) = root.get("teams") {
        let teams = teams
            .as_array()
            .ok_or_else(|| "'teams' is not an array".to_string())?;

        let mut lines = Vec::new();
        for (index, team) in teams.iter().enumerate() {
            let Some(team_obj) = team.as_object() else {
                debug!(index, "Team entry is not an object, ignoring");
                continue;
            };
            let team_id = first_id(team_obj, &["team_id", "id", "team"]);
            let Some(players) = team_obj.get("players").and_then(Value::as_array) else {
                debug!(index, team = ?team_id, "Team entry has no 'players' array, ignoring");
                continue;
            };

            lines.extend(players.iter().map(|entry| RawLine {
                entry,
                team_id: team_id.clone(),
            }));
        }
        return Ok(lines);
    }

    Err("payload has neither 'players' nor 'teams'".to_string())
}

/// Result of normalizing one payload
#[derive(Debug, Clone, PartialEq)]
pub enum Normalized {
    Records(Vec<CanonicalStatRecord>),
    Skipped(String),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RecordNormalizer;

impl RecordNormalizer {
    pub fn new() -> Self {
        Self
    }

    /// Map a provider payload onto canonical records.
    ///
    /// Never fails: malformed payloads and payloads without a usable stat
    /// line come back as [`Normalized::Skipped`].
    pub fn normalize(&self, item: &WorkItem, payload: &Value) -> Normalized {
        let lines = match collect_lines(payload) {
            Ok(lines) => lines,
            Err(reason) => return self.skip(item, reason),
        };

        let total = lines.len();
        let records: Vec<CanonicalStatRecord> = lines
            .into_iter()
            .filter_map(|line| self.normalize_line(item, line))
            .collect();

        if records.is_empty() {
            return self.skip(item, format!("no usable stat lines among {} entries", total));
        }

        debug!(
            work_id = item.id,
            lines = total,
            records = records.len(),
            "Payload normalized"
        );
        Normalized::Records(records)
    }

    fn skip(&self, item: &WorkItem, reason: String) -> Normalized {
        warn!(
            work_id = item.id,
            external_ref = %item.external_ref,
            category = %item.category,
            reason = %reason,
            "ParseSkipped"
        );
        Normalized::Skipped(reason)
    }

    fn normalize_line(&self, item: &WorkItem, line: RawLine<'_>) -> Option<CanonicalStatRecord> {
        let entry = line.entry.as_object()?;
        let subject_id = first_id(entry, SUBJECT_KEYS)?;
        let group_id = first_id(entry, GROUP_KEYS)
            .or(line.team_id)
            .unwrap_or_else(|| "unknown".to_string());

        let stats = entry
            .get("stats")
            .or_else(|| entry.get("statistics"))
            .and_then(Value::as_object);

        let pairs: Box<dyn Iterator<Item = (&String, &Value)>> = match stats {
            Some(stats) => Box::new(stats.iter()),
            None => Box::new(
                entry
                    .iter()
                    .filter(|(k, _)| !IDENTITY_KEYS.contains(&k.as_str())),
            ),
        };

        let mut attributes = BTreeMap::new();
        let mut recognized = 0usize;
        let mut nonzero = false;

        for (key, value) in pairs {
            match lookup(item.category, key) {
                Some(field) => {
                    if let Some(n) = numeric(field, value) {
                        recognized += 1;
                        nonzero |= n != 0.0;
                        attributes.insert(field.canonical.to_string(), StatValue::Number(n));
                    }
                },
                None => match value {
                    Value::String(s) if !is_placeholder(s) => {
                        attributes.insert(key.clone(), StatValue::Text(s.trim().to_string()));
                    },
                    Value::Number(n) => {
                        if let Some(n) = n.as_f64() {
                            attributes.insert(key.clone(), StatValue::Number(n));
                        }
                    },
                    _ => {},
                },
            }
        }

        if recognized == 0 || !nonzero {
            debug!(work_id = item.id, subject_id = %subject_id, "Dropping empty stat line");
            return None;
        }

        if !item.participants.is_empty() && !item.participants.contains(&group_id) {
            debug!(work_id = item.id, group_id = %group_id, "Stat line team is not a listed participant");
        }

        let derived_score = derived_score(item.category, &attributes);
        Some(CanonicalStatRecord {
            subject_id,
            work_item_id: item.id,
            group_id,
            category: item.category,
            attributes,
            derived_score,
        })
    }
}
