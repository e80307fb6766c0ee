//! Free-text market description → typed [`Market`].
//!
//! Tips are captured as free text ("Over 8.5 corners", "Ambos equipos marcan",
//! "Athletic Club -0.5"). The parser is a total function: anything it cannot
//! read with certainty becomes [`Market::Unknown`], which always settles Pending.
//! Guessing wrong here would auto-lose a bet that may have won.

use serde::{Deserialize, Serialize};

use crate::types::Outcome1X2;

// ---------------------------------------------------------------------------
// Market
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Over,
    Under,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Home,
    Away,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BttsSide {
    Yes,
    No,
}

/// Only the half-goal handicap is supported; it can never push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandicapLine {
    /// side -0.5: outright win required.
    MinusHalf,
    /// side +0.5: win or draw.
    PlusHalf,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Market {
    Result1X2 { outcome: Outcome1X2 },
    BothTeamsScore { side: BttsSide },
    TotalGoals { direction: Direction, threshold: f64 },
    TotalCorners { direction: Direction, threshold: f64 },
    TotalCards { direction: Direction, threshold: f64 },
    AsianHandicap { side: Side, line: HandicapLine },
    Unknown,
}

impl Market {
    /// Stable label of the variant, used for per-market breakdowns.
    pub fn kind(&self) -> &'static str {
        match self {
            Market::Result1X2 { .. } => "1x2",
            Market::BothTeamsScore { .. } => "btts",
            Market::TotalGoals { .. } => "total_goals",
            Market::TotalCorners { .. } => "total_corners",
            Market::TotalCards { .. } => "total_cards",
            Market::AsianHandicap { .. } => "asian_handicap",
            Market::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let dir = |d: &Direction| match d {
            Direction::Over => "over",
            Direction::Under => "under",
        };
        match self {
            Market::Result1X2 { outcome } => write!(f, "1x2 {outcome}"),
            Market::BothTeamsScore { side } => match side {
                BttsSide::Yes => write!(f, "btts yes"),
                BttsSide::No => write!(f, "btts no"),
            },
            Market::TotalGoals { direction, threshold } => {
                write!(f, "goals {} {threshold}", dir(direction))
            }
            Market::TotalCorners { direction, threshold } => {
                write!(f, "corners {} {threshold}", dir(direction))
            }
            Market::TotalCards { direction, threshold } => {
                write!(f, "cards {} {threshold}", dir(direction))
            }
            Market::AsianHandicap { side, line } => {
                let side = match side {
                    Side::Home => "home",
                    Side::Away => "away",
                };
                let line = match line {
                    HandicapLine::MinusHalf => "-0.5",
                    HandicapLine::PlusHalf => "+0.5",
                };
                write!(f, "ah {side} {line}")
            }
            Market::Unknown => write!(f, "unknown"),
        }
    }
}

// ---------------------------------------------------------------------------
// Anchors (lowercase)
// ---------------------------------------------------------------------------

const OVER_ANCHORS: &[&str] = &["over", "más de", "mas de"];
const UNDER_ANCHORS: &[&str] = &["under", "menos de"];
const CORNER_STEMS: &[&str] = &["corner", "córner", "esquina"];
const CARD_STEMS: &[&str] = &["card", "tarjeta"];
const GOAL_STEMS: &[&str] = &["goal", "gol"];
const BTTS_ANCHORS: &[&str] = &[
    "both teams score",
    "both teams to score",
    "btts",
    "ambos equipos marcan",
    "ambos marcan",
];
const WIN_STEMS: &[&str] = &["win", "gana", "victoria", "1x2", "moneyline", "ganador"];
const HOME_WORDS: &[&str] = &["home", "local"];
const AWAY_WORDS: &[&str] = &["away", "visitante", "visitor"];
const DRAW_WORDS: &[&str] = &["draw", "empate", "tie"];
/// Period markets (first half etc.) are settled on data the feed does not give us.
const PERIOD_ANCHORS: &[&str] = &[
    "1st half",
    "first half",
    "2nd half",
    "second half",
    "half time",
    "half-time",
    "halftime",
    "primer tiempo",
    "segundo tiempo",
    "medio tiempo",
];
const PERIOD_TOKENS: &[&str] = &["ht", "1h", "2h"];
/// Markets that look like a supported family but settle differently.
const UNSUPPORTED_ANCHORS: &[&str] = &[
    "draw no bet",
    "dnb",
    "double chance",
    "doble oportunidad",
    "correct score",
    "exact score",
    "resultado exacto",
    "scorer",
    "goleador",
    "team total",
];

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a market description with no knowledge of the teams involved.
pub fn parse_market(text: &str) -> Market {
    parse_inner(text, None)
}

/// Parse a market description, also recognising the match's own team names as
/// sides ("Athletic Club -0.5", "Atlético GO to win").
pub fn parse_market_for(text: &str, home: &str, away: &str) -> Market {
    parse_inner(text, Some((home, away)))
}

fn parse_inner(text: &str, teams: Option<(&str, &str)>) -> Market {
    let norm = normalize(text);
    if norm.is_empty() {
        return Market::Unknown;
    }
    if PERIOD_ANCHORS.iter().any(|a| norm.contains(a))
        || PERIOD_TOKENS.iter().any(|t| has_token(&norm, t))
        || UNSUPPORTED_ANCHORS.iter().any(|a| has_word(&norm, a))
    {
        return Market::Unknown;
    }

    let btts = BTTS_ANCHORS.iter().any(|a| has_word(&norm, a));
    let overs = anchor_positions(&norm, OVER_ANCHORS);
    let unders = anchor_positions(&norm, UNDER_ANCHORS);
    let totals = !overs.is_empty() || !unders.is_empty();
    let handicaps = handicap_tokens(&norm);
    let side = side_mention(&norm, teams);

    let families = [btts, totals, !handicaps.is_empty()]
        .iter()
        .filter(|f| **f)
        .count();
    if families > 1 {
        return Market::Unknown;
    }

    if btts {
        return parse_btts(&norm);
    }
    if totals {
        return parse_totals(&norm, &overs, &unders, side);
    }
    if !handicaps.is_empty() {
        return parse_handicap(&handicaps, side);
    }
    parse_1x2(&norm, side)
}

fn parse_btts(norm: &str) -> Market {
    let no = has_token(norm, "no");
    let yes = has_token(norm, "yes") || has_token(norm, "si") || has_token(norm, "sí");
    match (yes, no) {
        (true, true) => Market::Unknown,
        (false, true) => Market::BothTeamsScore { side: BttsSide::No },
        _ => Market::BothTeamsScore { side: BttsSide::Yes },
    }
}

fn parse_totals(
    norm: &str,
    overs: &[(usize, usize)],
    unders: &[(usize, usize)],
    side: SideMention,
) -> Market {
    // Team totals ("Arsenal over 1.5") are not match totals.
    if side != SideMention::None {
        return Market::Unknown;
    }
    let (direction, anchor_end) = match (overs, unders) {
        ([(_, end)], []) => (Direction::Over, *end),
        ([], [(_, end)]) => (Direction::Under, *end),
        _ => return Market::Unknown,
    };
    let Some(threshold) = number_after(norm, anchor_end) else {
        return Market::Unknown;
    };
    // Whole and quarter lines can push or split; only half lines settle cleanly.
    if (threshold.fract() - 0.5).abs() > 1e-9 {
        return Market::Unknown;
    }

    let corners = CORNER_STEMS.iter().any(|s| has_word_prefix(norm, s));
    let cards = CARD_STEMS.iter().any(|s| has_word_prefix(norm, s));
    let goals = GOAL_STEMS.iter().any(|s| has_word_prefix(norm, s));
    match (corners, cards, goals) {
        (true, false, false) => Market::TotalCorners { direction, threshold },
        (false, true, false) => Market::TotalCards { direction, threshold },
        (false, false, _) => Market::TotalGoals { direction, threshold },
        _ => Market::Unknown,
    }
}

fn parse_handicap(lines: &[Option<HandicapLine>], side: SideMention) -> Market {
    let [Some(line)] = lines else {
        return Market::Unknown;
    };
    match side {
        SideMention::Home => Market::AsianHandicap { side: Side::Home, line: *line },
        SideMention::Away => Market::AsianHandicap { side: Side::Away, line: *line },
        _ => Market::Unknown,
    }
}

fn parse_1x2(norm: &str, side: SideMention) -> Market {
    let win_cue = WIN_STEMS.iter().any(|s| has_word_prefix(norm, s));
    match side {
        SideMention::Draw => Market::Result1X2 { outcome: Outcome1X2::Draw },
        SideMention::Home if win_cue => Market::Result1X2 { outcome: Outcome1X2::Home },
        SideMention::Away if win_cue => Market::Result1X2 { outcome: Outcome1X2::Away },
        SideMention::None if has_token(norm, "1x2") => shorthand_1x2(norm),
        _ => Market::Unknown,
    }
}

/// "1x2: 1", "1X2 - X", "1x2 2".
fn shorthand_1x2(norm: &str) -> Market {
    let picks: Vec<Outcome1X2> = tokens(norm)
        .filter_map(|t| match t {
            "1" => Some(Outcome1X2::Home),
            "x" => Some(Outcome1X2::Draw),
            "2" => Some(Outcome1X2::Away),
            _ => None,
        })
        .collect();
    match picks.as_slice() {
        [outcome] => Market::Result1X2 { outcome: *outcome },
        _ => Market::Unknown,
    }
}

// ---------------------------------------------------------------------------
// Side detection
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SideMention {
    None,
    Home,
    Away,
    Draw,
    Ambiguous,
}

fn side_mention(norm: &str, teams: Option<(&str, &str)>) -> SideMention {
    let mut home = HOME_WORDS.iter().any(|w| has_token(norm, w));
    let mut away = AWAY_WORDS.iter().any(|w| has_token(norm, w));
    let draw = DRAW_WORDS.iter().any(|w| has_token(norm, w));

    if let Some((home_name, away_name)) = teams {
        let home_name = normalize(home_name);
        let away_name = normalize(away_name);
        home |= mentions_team(norm, &home_name, &away_name);
        away |= mentions_team(norm, &away_name, &home_name);
    }

    match (home, away, draw) {
        (false, false, false) => SideMention::None,
        (true, false, false) => SideMention::Home,
        (false, true, false) => SideMention::Away,
        (false, false, true) => SideMention::Draw,
        _ => SideMention::Ambiguous,
    }
}

/// Full-name containment, or a distinctive (>3 chars, not in the opponent's
/// name) token of the team appearing in the text.
fn mentions_team(norm: &str, team: &str, opponent: &str) -> bool {
    if team.is_empty() {
        return false;
    }
    if has_word(norm, team) {
        return true;
    }
    tokens(team)
        .filter(|t| t.chars().count() > 3)
        .filter(|t| !tokens(opponent).any(|o| o == *t))
        .any(|t| has_token(norm, t))
}

// ---------------------------------------------------------------------------
// Text helpers
// ---------------------------------------------------------------------------

/// Lowercase, unify dash variants, decimal commas to dots, collapse whitespace.
fn normalize(text: &str) -> String {
    let lower = text.to_lowercase();
    let chars: Vec<char> = lower
        .chars()
        .map(|c| match c {
            '−' | '–' | '—' => '-',
            c => c,
        })
        .collect();
    let mut out = String::with_capacity(lower.len());
    for (i, &c) in chars.iter().enumerate() {
        let between_digits = i > 0
            && chars[i - 1].is_ascii_digit()
            && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
        if c == ',' && between_digits {
            out.push('.');
        } else {
            out.push(c);
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Alphanumeric tokens (keeps '.' so "1.5" stays one token).
fn tokens(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| !(c.is_alphanumeric() || c == '.'))
        .map(|t| t.trim_matches('.'))
        .filter(|t| !t.is_empty())
}

fn has_token(s: &str, token: &str) -> bool {
    tokens(s).any(|t| t == token)
}

fn is_boundary(c: Option<char>) -> bool {
    c.map_or(true, |c| !c.is_alphanumeric())
}

/// Occurrences of `needle` bounded by non-alphanumerics on both sides.
fn word_positions(hay: &str, needle: &str) -> Vec<(usize, usize)> {
    hay.match_indices(needle)
        .filter(|(idx, _)| {
            let before = hay[..*idx].chars().next_back();
            let after = hay[idx + needle.len()..].chars().next();
            is_boundary(before) && (is_boundary(after) || after.is_some_and(|c| c.is_ascii_digit()))
        })
        .map(|(idx, m)| (idx, idx + m.len()))
        .collect()
}

fn has_word(hay: &str, needle: &str) -> bool {
    !word_positions(hay, needle).is_empty()
}

/// `stem` starting a word ("corner" matches "corners", not "scorner").
fn has_word_prefix(hay: &str, stem: &str) -> bool {
    hay.match_indices(stem)
        .any(|(idx, _)| is_boundary(hay[..idx].chars().next_back()))
}

fn anchor_positions(hay: &str, anchors: &[&str]) -> Vec<(usize, usize)> {
    let mut found: Vec<(usize, usize)> = anchors
        .iter()
        .flat_map(|a| word_positions(hay, a))
        .collect();
    found.sort_unstable();
    found.dedup();
    found
}

/// First unsigned decimal number after byte offset `from`.
fn number_after(hay: &str, from: usize) -> Option<f64> {
    let rest = hay.get(from..)?;
    let start = rest.find(|c: char| c.is_ascii_digit())?;
    let num: String = rest[start..]
        .chars()
        .take_while(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    num.trim_end_matches('.').parse().ok()
}

/// Signed numeric tokens ("+0.5", "(-0.5)", "-1"). Each is `Some(line)` when it
/// is a supported half-goal line, `None` for any other handicap value.
fn handicap_tokens(norm: &str) -> Vec<Option<HandicapLine>> {
    norm.split_whitespace()
        .map(|t| t.trim_matches(|c: char| matches!(c, '(' | ')' | '[' | ']' | ':' | ',' | ';')))
        .filter(|t| t.starts_with('+') || t.starts_with('-'))
        .filter_map(|t| {
            let value: f64 = t.parse().ok()?;
            Some(if (value + 0.5).abs() < 1e-9 {
                Some(HandicapLine::MinusHalf)
            } else if (value - 0.5).abs() < 1e-9 {
                Some(HandicapLine::PlusHalf)
            } else {
                None
            })
        })
        .collect()
}
