//! The structured report checks accumulate into, so a caller can assert on
//! results with the toolkit's own `assert_eq!`/`#[test]` idiom instead of
//! the harness panicking directly.

use std::fmt;

/// Which §4.7 category a check belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Category {
    /// init→start→stop→deinit ordering and idempotency.
    Lifecycle,
    /// `sink_connect` bounds, duplicates, and forwarding equivalence.
    Connection,
    /// Ordering and completion propagation through the buffer/worker model.
    DataFlow,
    /// Worker-fatal error surfacing.
    Error,
    /// Worker thread lifetime and stop promptness.
    Threading,
    /// Backpressure and drop accounting under load.
    Performance,
    /// Buffer configuration validation.
    BufferConfig,
    /// Property-system and root-source behavior.
    Behavioral,
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Category::Lifecycle => "lifecycle",
            Category::Connection => "connection",
            Category::DataFlow => "data-flow",
            Category::Error => "error",
            Category::Threading => "threading",
            Category::Performance => "performance",
            Category::BufferConfig => "buffer-config",
            Category::Behavioral => "behavioral",
        };
        f.write_str(s)
    }
}

/// The outcome of one named check.
#[derive(Debug, Clone)]
pub struct HarnessCheck {
    /// The check's name, stable across runs (e.g. `"p1_spsc_fifo_ordering"`).
    pub name: &'static str,
    /// The category this check belongs to.
    pub category: Category,
    /// Whether the check passed.
    pub passed: bool,
    /// A human-readable detail: the failure reason, or a short success note.
    pub detail: String,
}

impl fmt::Display for HarnessCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({}): {}",
            if self.passed { "PASS" } else { "FAIL" },
            self.name,
            self.category,
            self.detail
        )
    }
}

/// Builds a passing [`HarnessCheck`].
#[must_use]
pub fn pass(name: &'static str, category: Category, detail: impl Into<String>) -> HarnessCheck {
    HarnessCheck {
        name,
        category,
        passed: true,
        detail: detail.into(),
    }
}

/// Builds a failing [`HarnessCheck`].
#[must_use]
pub fn fail(name: &'static str, category: Category, detail: impl Into<String>) -> HarnessCheck {
    HarnessCheck {
        name,
        category,
        passed: false,
        detail: detail.into(),
    }
}

/// Turns a `Result<String, String>` (Ok detail / Err reason) into a
/// [`HarnessCheck`], the shape every check function in this crate returns.
#[must_use]
pub fn from_result(name: &'static str, category: Category, result: Result<String, String>) -> HarnessCheck {
    match result {
        Ok(detail) => pass(name, category, detail),
        Err(reason) => fail(name, category, reason),
    }
}

/// The aggregate result of running some or all checks.
#[derive(Debug, Clone, Default)]
pub struct HarnessReport {
    /// Every check that ran, in run order.
    pub checks: Vec<HarnessCheck>,
}

impl HarnessReport {
    /// Creates an empty report.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one check's result.
    pub fn record(&mut self, check: HarnessCheck) {
        self.checks.push(check);
    }

    /// `true` if every recorded check passed (vacuously true for an empty
    /// report).
    #[must_use]
    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    /// The checks that failed, in run order.
    #[must_use]
    pub fn failures(&self) -> Vec<&HarnessCheck> {
        self.checks.iter().filter(|c| !c.passed).collect()
    }
}

impl fmt::Display for HarnessReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for check in &self.checks {
            writeln!(f, "{check}")?;
        }
        write!(f, "{}/{} passed", self.checks.len() - self.failures().len(), self.checks.len())
    }
}
