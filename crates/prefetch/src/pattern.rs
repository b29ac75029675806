//! Reading pattern classification

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::behavior::PageAccess;

/// Fewer accesses than this always classify as sequential reading
pub const MIN_PATTERN_WINDOW: usize = 3;

/// Page distance above which a step counts as a jump
const JUMP_DISTANCE: i64 = 5;

/// How the user is currently moving through a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadingPattern {
    /// Mostly page after page
    #[default]
    Sequential,
    /// Large forward or backward jumps
    Skipping,
    /// Following search hits
    Searching,
    /// Mixed short and long moves with no clear direction
    Random,
    /// Frequently stepping back
    Reviewing,
}

impl ReadingPattern {
    pub const ALL: [ReadingPattern; 5] = [
        ReadingPattern::Sequential,
        ReadingPattern::Skipping,
        ReadingPattern::Searching,
        ReadingPattern::Random,
        ReadingPattern::Reviewing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadingPattern::Sequential => "sequential",
            ReadingPattern::Skipping => "skipping",
            ReadingPattern::Searching => "searching",
            ReadingPattern::Random => "random",
            ReadingPattern::Reviewing => "reviewing",
        }
    }
}

impl fmt::Display for ReadingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadingPattern {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ReadingPattern::ALL
            .into_iter()
            .find(|pattern| pattern.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown reading pattern: {s}"))
    }
}

/// Classify a window of page accesses, oldest first
///
/// Search-driven windows are recognized first. Otherwise the ratios of
/// forward steps, backward steps and jumps between consecutive accesses
/// decide, with the first matching rule winning.
pub fn detect_pattern(accesses: &[PageAccess]) -> ReadingPattern {
    if accesses.len() < MIN_PATTERN_WINDOW {
        return ReadingPattern::Sequential;
    }

    let searches = accesses.iter().filter(|access| access.from_search).count();
    if searches * 2 > accesses.len() {
        return ReadingPattern::Searching;
    }

    let mut forward = 0usize;
    let mut backward = 0usize;
    let mut jumps = 0usize;
    for pair in accesses.windows(2) {
        let delta = i64::from(pair[1].page) - i64::from(pair[0].page);
        match delta {
            1 => forward += 1,
            -1 => backward += 1,
            d if d.abs() > JUMP_DISTANCE => jumps += 1,
            _ => {}
        }
    }

    let steps = (accesses.len() - 1) as f64;
    let forward_ratio = forward as f64 / steps;
    let backward_ratio = backward as f64 / steps;
    let jump_ratio = jumps as f64 / steps;

    if forward_ratio > 0.7 {
        ReadingPattern::Sequential
    } else if jump_ratio > 0.5 {
        ReadingPattern::Skipping
    } else if backward_ratio > 0.3 {
        ReadingPattern::Reviewing
    } else if jump_ratio > 0.3 {
        ReadingPattern::Random
    } else {
        ReadingPattern::Sequential
    }
}
