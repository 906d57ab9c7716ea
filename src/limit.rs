use std::{cmp::Ordering, fmt, time::Duration};

use crate::{error::ParseLimitError, utils::format_window};

/// Shortest window a limit may use
pub const MIN_WINDOW: Duration = Duration::from_secs(1);

/// Whose counter a limit increments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scope {
    /// One counter per caller identifier
    PerKey,
    /// One counter shared by every caller
    Global,
}

impl Scope {
    pub fn is_global(self) -> bool {
        matches!(self, Scope::Global)
    }
}

/// A single fixed-window threshold: at most `max_count` events per `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Limit {
    max_count: u64,
    window: Duration,
    scope: Scope,
}

impl Limit {
    /// Create a validated limit
    pub fn new(max_count: u64, window: Duration, scope: Scope) -> Result<Self, ParseLimitError> {
        if max_count == 0 {
            return Err(ParseLimitError::NonPositiveCount(0));
        }
        if window < MIN_WINDOW {
            return Err(ParseLimitError::SubSecondDuration(window));
        }

        Ok(Self {
            max_count,
            window,
            scope,
        })
    }

    /// Per-key limit
    pub fn per_key(max_count: u64, window: Duration) -> Result<Self, ParseLimitError> {
        Self::new(max_count, window, Scope::PerKey)
    }

    /// Limit shared by all callers
    pub fn global(max_count: u64, window: Duration) -> Result<Self, ParseLimitError> {
        Self::new(max_count, window, Scope::Global)
    }

    pub fn max_count(&self) -> u64 {
        self.max_count
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    pub fn is_global(&self) -> bool {
        self.scope.is_global()
    }

    /// Evaluation order: per-key limits first, then longer windows first.
    pub fn evaluation_order(&self, other: &Self) -> Ordering {
        self.is_global()
            .cmp(&other.is_global())
            .then_with(|| other.window.cmp(&self.window))
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.max_count, format_window(self.window))?;
        if self.is_global() {
            f.write_str("/g")?;
        }
        Ok(())
    }
}

/// Limits in the order the evaluator walks them.
///
/// Global limits come after every per-key limit so a caller that is already
/// over its own limit never touches the shared counter. Within a scope longer
/// windows come first; ties keep their configured order.
///
/// Counters are named by scope and window only, so two limits with the same
/// scope and window increment one counter, once each per request. With
/// `["5/1m", "10/1m"]` the shared counter reaches 5 after three requests and
/// the fourth is rejected. See [`OrderedLimits::shared_counters`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrderedLimits {
    limits: Vec<Limit>,
}

impl OrderedLimits {
    pub fn new(mut limits: Vec<Limit>) -> Self {
        limits.sort_by(Limit::evaluation_order);
        Self { limits }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Limit> {
        self.limits.iter()
    }

    pub fn len(&self) -> usize {
        self.limits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.limits.is_empty()
    }

    pub fn as_slice(&self) -> &[Limit] {
        &self.limits
    }

    /// Adjacent limits that resolve to the same counter
    pub fn shared_counters(&self) -> impl Iterator<Item = (&Limit, &Limit)> + '_ {
        self.limits
            .windows(2)
            .filter(|pair| pair[0].scope == pair[1].scope && pair[0].window == pair[1].window)
            .map(|pair| (&pair[0], &pair[1]))
    }
}

impl From<Vec<Limit>> for OrderedLimits {
    fn from(limits: Vec<Limit>) -> Self {
        Self::new(limits)
    }
}

impl FromIterator<Limit> for OrderedLimits {
    fn from_iter<I: IntoIterator<Item = Limit>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a> IntoIterator for &'a OrderedLimits {
    type Item = &'a Limit;
    type IntoIter = std::slice::Iter<'a, Limit>;

    fn into_iter(self) -> Self::IntoIter {
        self.limits.iter()
    }
}
