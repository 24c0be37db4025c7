use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

const PATTERN_SWITCH_PROBABILITY: f64 = 0.15;
const FAILURES_BEFORE_SLOWDOWN: u32 = 3;
const MIN_DELAY_SECS: f64 = 1.0;
const MAX_RETRY_DELAY_SECS: f64 = 60.0;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum BrowsingPattern {
    QuickBurst,
    NormalBrowse,
    CarefulBrowse,
    Distracted,
}

impl BrowsingPattern {
    pub const ALL: [BrowsingPattern; 4] = [
        BrowsingPattern::QuickBurst,
        BrowsingPattern::NormalBrowse,
        BrowsingPattern::CarefulBrowse,
        BrowsingPattern::Distracted,
    ];

    /// Base delay range in seconds, before jitter and session scaling.
    pub fn delay_range_secs(self) -> (f64, f64) {
        match self {
            BrowsingPattern::QuickBurst => (1.0, 3.0),
            BrowsingPattern::NormalBrowse => (3.0, 8.0),
            BrowsingPattern::CarefulBrowse => (8.0, 15.0),
            BrowsingPattern::Distracted => (15.0, 45.0),
        }
    }
}

impl fmt::Display for BrowsingPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BrowsingPattern::QuickBurst => write!(f, "quick_burst"),
            BrowsingPattern::NormalBrowse => write!(f, "normal_browse"),
            BrowsingPattern::CarefulBrowse => write!(f, "careful_browse"),
            BrowsingPattern::Distracted => write!(f, "distracted"),
        }
    }
}

/// How `randomize_order` rearranges a worklist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStrategy {
    FullShuffle,
    ChunkedShuffle,
    PartialReversal,
    PriorityFirst,
}

impl OrderStrategy {
    pub const ALL: [OrderStrategy; 4] = [
        OrderStrategy::FullShuffle,
        OrderStrategy::ChunkedShuffle,
        OrderStrategy::PartialReversal,
        OrderStrategy::PriorityFirst,
    ];
}

/// Delay model for a run: human-like timing, or a flat uniform range.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DelayModel {
    Behavioral,
    Fixed { min_secs: f64, max_secs: f64 },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
pub struct SessionStats {
    pub pattern: BrowsingPattern,
    pub downloads_this_session: u32,
    pub rotation_threshold: u32,
    pub consecutive_failures: u32,
    pub sessions_started: u32,
}

/// Exponential backoff with two independent jitter factors, capped at one minute.
pub fn retry_delay<R: Rng + ?Sized>(attempt: u32, rng: &mut R) -> Duration {
    let base = 2f64.powi(attempt.min(16) as i32);
    let spread = rng.gen_range(0.5..=1.5);
    let hesitation = rng.gen_range(0.8..=1.3);
    Duration::from_secs_f64((base * spread * hesitation).min(MAX_RETRY_DELAY_SECS))
}

/// Timing, ordering and session-rotation state for one run.
#[derive(Debug)]
pub struct PacingSession {
    rng: StdRng,
    model: DelayModel,
    pattern: BrowsingPattern,
    downloads_this_session: u32,
    rotation_threshold: u32,
    consecutive_failures: u32,
    sessions_started: u32,
    delay_scale: f64,
}

impl PacingSession {
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy(), DelayModel::Behavioral)
    }

    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed), DelayModel::Behavioral)
    }

    /// Flat delays, identity ordering and no session rotation.
    pub fn fixed(min_secs: f64, max_secs: f64) -> Self {
        let (min_secs, max_secs) = (min_secs.max(0.0), max_secs.max(0.0));
        Self::from_rng(
            StdRng::from_entropy(),
            DelayModel::Fixed {
                min_secs: min_secs.min(max_secs),
                max_secs: max_secs.max(min_secs),
            },
        )
    }

    fn from_rng(mut rng: StdRng, model: DelayModel) -> Self {
        let pattern = BrowsingPattern::ALL[rng.gen_range(0..BrowsingPattern::ALL.len())];
        let rotation_threshold = rng.gen_range(15..=25);
        Self {
            rng,
            model,
            pattern,
            downloads_this_session: 0,
            rotation_threshold,
            consecutive_failures: 0,
            sessions_started: 1,
            delay_scale: 1.0,
        }
    }

    /// Multiply every behavioral delay by `scale`, after the one-second floor.
    pub fn with_delay_scale(mut self, scale: f64) -> Self {
        self.delay_scale = if scale.is_finite() { scale.max(0.0) } else { 1.0 };
        self
    }

    pub fn model(&self) -> DelayModel {
        self.model
    }

    pub fn pattern(&self) -> BrowsingPattern {
        self.pattern
    }

    pub fn set_pattern(&mut self, pattern: BrowsingPattern) {
        self.pattern = pattern;
    }

    pub fn next_delay(&mut self) -> Duration {
        let (min_secs, max_secs) = match self.model {
            DelayModel::Fixed { min_secs, max_secs } => {
                return Duration::from_secs_f64(self.rng.gen_range(min_secs..=max_secs));
            }
            DelayModel::Behavioral => {
                if self.rng.gen_bool(PATTERN_SWITCH_PROBABILITY) {
                    self.pattern =
                        BrowsingPattern::ALL[self.rng.gen_range(0..BrowsingPattern::ALL.len())];
                }
                self.pattern.delay_range_secs()
            }
        };

        let mut delay = self.rng.gen_range(min_secs..=max_secs);
        delay *= self.rng.gen_range(0.8..=1.2);

        // Slow to warm up, brisk once settled in
        delay *= match self.downloads_this_session {
            0..=2 => self.rng.gen_range(1.2..=1.8),
            5..=15 => self.rng.gen_range(0.7..=0.9),
            _ => 1.0,
        };

        Duration::from_secs_f64(delay.max(MIN_DELAY_SECS) * self.delay_scale)
    }

    pub fn retry_delay(&mut self, attempt: u32) -> Duration {
        retry_delay(attempt, &mut self.rng)
    }

    pub fn should_rotate_session(&self) -> bool {
        match self.model {
            DelayModel::Behavioral => self.downloads_this_session >= self.rotation_threshold,
            DelayModel::Fixed { .. } => false,
        }
    }

    pub fn rotate_session(&mut self) -> SessionStats {
        self.downloads_this_session = 0;
        self.consecutive_failures = 0;
        self.rotation_threshold = self.rng.gen_range(15..=25);
        self.sessions_started += 1;
        self.stats()
    }

    pub fn record_attempt(&mut self, success: bool) {
        self.downloads_this_session += 1;
        if success {
            self.consecutive_failures = 0;
        } else {
            self.consecutive_failures += 1;
            if self.consecutive_failures >= FAILURES_BEFORE_SLOWDOWN {
                self.pattern = BrowsingPattern::CarefulBrowse;
            }
        }
    }

    pub fn randomize_order<T>(&mut self, items: Vec<T>) -> Vec<T> {
        if matches!(self.model, DelayModel::Fixed { .. }) {
            return items;
        }
        let strategy = OrderStrategy::ALL[self.rng.gen_range(0..OrderStrategy::ALL.len())];
        self.reorder_with(strategy, items)
    }

    pub fn reorder_with<T>(&mut self, strategy: OrderStrategy, mut items: Vec<T>) -> Vec<T> {
        let len = items.len();
        if len < 2 {
            return items;
        }

        match strategy {
            OrderStrategy::FullShuffle => items.shuffle(&mut self.rng),
            OrderStrategy::ChunkedShuffle => {
                let mut start = 0;
                while start < len {
                    let end = (start + self.rng.gen_range(3..=7)).min(len);
                    items[start..end].shuffle(&mut self.rng);
                    start = end;
                }
            }
            OrderStrategy::PartialReversal => {
                for _ in 0..self.rng.gen_range(1..=3) {
                    let start = self.rng.gen_range(0..len - 1);
                    let end = self.rng.gen_range(start + 1..len);
                    items[start..=end].reverse();
                }
            }
            OrderStrategy::PriorityFirst => {
                let keep = self.rng.gen_range(1..=3).min(len);
                items[keep..].shuffle(&mut self.rng);
            }
        }

        items
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            pattern: self.pattern,
            downloads_this_session: self.downloads_this_session,
            rotation_threshold: self.rotation_threshold,
            consecutive_failures: self.consecutive_failures,
            sessions_started: self.sessions_started,
        }
    }
}

impl Default for PacingSession {
    fn default() -> Self {
        Self::new()
    }
}
