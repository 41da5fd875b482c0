//! Match conditions.
//!
//! A condition is an auxiliary pattern whose matches filter primary
//! matches by position: spatially (preceded / followed / surrounded
//! within a line distance) or positionally (the file, a specific line,
//! or a line range must match). Conditions are evaluated per result by
//! [`apply_conditions`] after the engine finished the target; evaluation
//! is stable and cannot fail.

use regex::bytes::Regex;

use crate::engine::{Match, SearchResult};

/// How a condition relates its matches to a primary match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionKind {
    /// Condition match on an earlier line (or earlier on the same line).
    Preceded,
    /// Condition match on a later line (or later on the same line).
    Followed,
    /// Condition match within a line distance in either direction.
    Surrounded,
    /// Condition pattern matches anywhere in the file.
    FileMatches,
    /// Condition pattern matches on a specific line.
    LineMatches,
    /// Condition pattern matches within a line range.
    RangeMatches,
}

/// A compiled condition.
#[derive(Debug)]
pub struct Condition {
    pub regex: Regex,
    pub kind: ConditionKind,
    /// Maximum line distance for the directional kinds; -1 = unbounded.
    pub within: i64,
    /// First line for LineMatches / RangeMatches.
    pub line_range_start: u64,
    /// Last line for RangeMatches.
    pub line_range_end: u64,
    pub negated: bool,
}

/// Reduce `result.matches` to those satisfying all conditions.
///
/// Stage 1 settles the whole-file kinds: a satisfied negated condition
/// clears the result outright, a non-negated condition that never
/// matched clears it as well. Stage 2 then checks every remaining
/// primary match against the spatial kinds. Matches keep their input
/// order; applying the evaluator twice yields the same set.
pub fn apply_conditions(result: &mut SearchResult, conditions: &[Condition]) {
    if result.matches.is_empty() || conditions.is_empty() {
        return;
    }

    // Stage 1: conditions independent of any particular match.
    let mut present = vec![false; conditions.len()];
    for cm in &result.condition_matches {
        let id = match cm.condition_id {
            Some(id) if id < conditions.len() => id,
            _ => continue,
        };
        let cond = &conditions[id];
        let fulfilled = match cond.kind {
            ConditionKind::FileMatches => true,
            ConditionKind::LineMatches => cm.line_no == cond.line_range_start,
            ConditionKind::RangeMatches => {
                cm.line_no >= cond.line_range_start && cm.line_no <= cond.line_range_end
            }
            // Spatial kinds are settled per match in stage 2; mark them
            // present here so the absence check below cannot fire on them.
            _ => !cond.negated,
        };
        if fulfilled {
            if cond.negated {
                result.matches.clear();
                return;
            }
            present[id] = true;
        }
    }
    for (id, cond) in conditions.iter().enumerate() {
        if !present[id] && !cond.negated {
            result.matches.clear();
            return;
        }
    }

    // Stage 2: spatial conditions, one verdict per primary match.
    let condition_matches = &result.condition_matches;
    result
        .matches
        .retain(|m| match_fulfills(m, condition_matches, conditions));
}

fn match_fulfills(m: &Match, condition_matches: &[Match], conditions: &[Condition]) -> bool {
    let mut satisfied = vec![false; conditions.len()];
    for cm in condition_matches {
        let id = match cm.condition_id {
            Some(id) if id < conditions.len() => id,
            _ => continue,
        };
        let cond = &conditions[id];
        let within = cond.within;
        let fulfilled = match cond.kind {
            ConditionKind::Preceded => {
                let distance = m.line_no as i64 - cm.line_no as i64;
                if distance == 0 {
                    cm.start < m.start
                } else {
                    distance >= 0 && (within == -1 || distance <= within)
                }
            }
            ConditionKind::Followed => {
                let distance = cm.line_no as i64 - m.line_no as i64;
                if distance == 0 {
                    cm.start > m.start
                } else {
                    distance >= 0 && (within == -1 || distance <= within)
                }
            }
            ConditionKind::Surrounded => {
                let distance = (m.line_no as i64 - cm.line_no as i64).abs();
                distance == 0 || within == -1 || distance <= within
            }
            // Whole-file kinds were settled in stage 1.
            _ => !cond.negated,
        };
        if fulfilled {
            if cond.negated {
                return false;
            }
            satisfied[id] = true;
        }
    }
    conditions
        .iter()
        .enumerate()
        .all(|(id, cond)| satisfied[id] || cond.negated)
}
