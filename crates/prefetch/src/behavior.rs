//! Page view tracking and reading sessions

use std::collections::{BTreeMap, VecDeque};
use std::fs;
use std::path::Path;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::PrefetchResult;
use crate::pattern::{detect_pattern, ReadingPattern, MIN_PATTERN_WINDOW};

/// Number of recent accesses used for pattern detection
pub const WINDOW_SIZE: usize = 20;

/// Number of archived sessions kept
pub const HISTORY_LIMIT: usize = 50;

/// Wall-clock milliseconds since the Unix epoch
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or(0)
}

/// One page view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageAccess {
    pub page: u32,
    pub timestamp_ms: u64,
    /// Time spent on the page
    pub dwell_ms: u64,
    pub zoom: f64,
    /// Pattern in effect when the page was opened
    pub pattern: ReadingPattern,
    /// Whether the view came from following a search hit
    #[serde(default)]
    pub from_search: bool,
}

impl PageAccess {
    pub fn new(page: u32, timestamp_ms: u64, dwell_ms: u64, zoom: f64) -> Self {
        Self {
            page,
            timestamp_ms,
            dwell_ms,
            zoom,
            pattern: ReadingPattern::Sequential,
            from_search: false,
        }
    }
}

/// A reading session from start to end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserSession {
    pub started_at_ms: u64,
    pub ended_at_ms: Option<u64>,
    pub accesses: Vec<PageAccess>,
    /// Total dwell per page
    pub dwell_totals: BTreeMap<u32, u64>,
    /// Visit count per page
    pub visit_frequency: BTreeMap<u32, u32>,
    pub dominant_pattern: ReadingPattern,
    pub average_zoom: f64,
}

impl UserSession {
    pub fn new(started_at_ms: u64) -> Self {
        Self {
            started_at_ms,
            ended_at_ms: None,
            accesses: Vec::new(),
            dwell_totals: BTreeMap::new(),
            visit_frequency: BTreeMap::new(),
            dominant_pattern: ReadingPattern::Sequential,
            average_zoom: 1.0,
        }
    }

    fn record(&mut self, access: PageAccess) {
        *self.dwell_totals.entry(access.page).or_insert(0) += access.dwell_ms;
        *self.visit_frequency.entry(access.page).or_insert(0) += 1;
        self.accesses.push(access);
    }

    pub fn visits(&self, page: u32) -> u32 {
        self.visit_frequency.get(&page).copied().unwrap_or(0)
    }

    pub fn dwell_total(&self, page: u32) -> u64 {
        self.dwell_totals.get(&page).copied().unwrap_or(0)
    }

    /// Timestamp of the most recent view of `page` in this session
    pub fn last_access_ms(&self, page: u32) -> Option<u64> {
        self.accesses
            .iter()
            .filter(|access| access.page == page)
            .map(|access| access.timestamp_ms)
            .max()
    }

    pub fn is_empty(&self) -> bool {
        self.accesses.is_empty()
    }
}

impl Default for UserSession {
    fn default() -> Self {
        Self::new(now_ms())
    }
}

/// Records page views and keeps the current reading pattern up to date
#[derive(Debug)]
pub struct BehaviorTracker {
    window: VecDeque<PageAccess>,
    window_size: usize,
    session: UserSession,
    history: VecDeque<UserSession>,
    history_limit: usize,
    pattern: ReadingPattern,
}

impl BehaviorTracker {
    pub fn new() -> Self {
        Self::with_limits(WINDOW_SIZE, HISTORY_LIMIT)
    }

    pub fn with_limits(window_size: usize, history_limit: usize) -> Self {
        Self {
            window: VecDeque::with_capacity(window_size.max(1)),
            window_size: window_size.max(1),
            session: UserSession::default(),
            history: VecDeque::new(),
            history_limit: history_limit.max(1),
            pattern: ReadingPattern::Sequential,
        }
    }

    /// Begin a new session, discarding an unfinished one
    pub fn start_session(&mut self) {
        self.start_session_at(now_ms());
    }

    pub fn start_session_at(&mut self, now_ms: u64) {
        self.session = UserSession::new(now_ms);
        debug!("Reading session started");
    }

    /// Close the current session and archive it
    ///
    /// Returns the archived session, or `None` if no page was viewed.
    pub fn end_session(&mut self) -> Option<UserSession> {
        self.end_session_at(now_ms())
    }

    pub fn end_session_at(&mut self, now_ms: u64) -> Option<UserSession> {
        let mut session = std::mem::replace(&mut self.session, UserSession::new(now_ms));
        if session.is_empty() {
            return None;
        }

        session.ended_at_ms = Some(now_ms);
        session.dominant_pattern = detect_pattern(&session.accesses);
        let total_zoom: f64 = session.accesses.iter().map(|access| access.zoom).sum();
        session.average_zoom = total_zoom / session.accesses.len() as f64;

        debug!(
            "Reading session ended: {} views, pattern {}",
            session.accesses.len(),
            session.dominant_pattern
        );

        self.history.push_back(session.clone());
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        Some(session)
    }

    /// Record a page view
    ///
    /// Returns the new pattern when the view changed it.
    pub fn record_page_view(&mut self, page: u32, dwell: Duration, zoom: f64) -> Option<ReadingPattern> {
        self.record(PageAccess::new(page, now_ms(), dwell.as_millis() as u64, zoom))
    }

    /// Record a page view reached by following a search hit
    pub fn record_search_navigation(
        &mut self,
        page: u32,
        dwell: Duration,
        zoom: f64,
    ) -> Option<ReadingPattern> {
        let mut access = PageAccess::new(page, now_ms(), dwell.as_millis() as u64, zoom);
        access.from_search = true;
        self.record(access)
    }

    /// Record a prepared access; its pattern field is overwritten
    pub fn record(&mut self, mut access: PageAccess) -> Option<ReadingPattern> {
        access.pattern = self.pattern;

        self.session.record(access.clone());
        self.window.push_back(access);
        while self.window.len() > self.window_size {
            self.window.pop_front();
        }

        let detected = detect_pattern(self.window.make_contiguous());
        if detected == self.pattern {
            return None;
        }

        debug!("Reading pattern changed: {} -> {}", self.pattern, detected);
        self.pattern = detected;
        Some(detected)
    }

    pub fn current_pattern(&self) -> ReadingPattern {
        self.pattern
    }

    /// Most recently viewed page
    pub fn current_page(&self) -> Option<u32> {
        self.window.back().map(|access| access.page)
    }

    /// Mean dwell over the rolling window
    ///
    /// `None` until enough views were recorded to say anything about
    /// reading speed.
    pub fn average_recent_dwell(&self) -> Option<Duration> {
        if self.window.len() < MIN_PATTERN_WINDOW {
            return None;
        }
        let total: u64 = self.window.iter().map(|access| access.dwell_ms).sum();
        Some(Duration::from_millis(total / self.window.len() as u64))
    }

    pub fn recent_accesses(&self) -> impl Iterator<Item = &PageAccess> {
        self.window.iter()
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    pub fn history(&self) -> impl Iterator<Item = &UserSession> {
        self.history.iter()
    }

    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Forget the rolling window and the current session
    ///
    /// Archived sessions are kept.
    pub fn reset(&mut self) {
        self.window.clear();
        self.session = UserSession::default();
        self.pattern = ReadingPattern::Sequential;
    }

    /// Write the archived sessions to a JSON file
    pub fn export_history(&self, path: &Path) -> PrefetchResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let sessions: Vec<&UserSession> = self.history.iter().collect();
        let json = serde_json::to_string_pretty(&sessions)?;
        fs::write(path, json)?;
        debug!("Exported {} sessions to {}", sessions.len(), path.display());
        Ok(())
    }

    /// Load archived sessions from a JSON file written by [`export_history`]
    ///
    /// [`export_history`]: BehaviorTracker::export_history
    pub fn import_history(&mut self, path: &Path) -> PrefetchResult<usize> {
        let json = fs::read_to_string(path)?;
        let sessions: Vec<UserSession> = serde_json::from_str(&json)?;
        let count = sessions.len();
        self.history.extend(sessions);
        while self.history.len() > self.history_limit {
            self.history.pop_front();
        }
        Ok(count)
    }
}

impl Default for BehaviorTracker {
    fn default() -> Self {
        Self::new()
    }
}
