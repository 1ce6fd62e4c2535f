//! Timeout tiers per operation category.

use std::fmt;
use std::time::Duration;

use crate::error::PolicyError;

/// Kind of supervised operation; each kind has its own deadlines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationCategory {
    /// A single diagram render.
    Export,
    /// A whole batch run.
    BatchExport,
    /// Diagnostics such as renderer probing.
    Debug,
}

impl OperationCategory {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Export => "export",
            Self::BatchExport => "batch_export",
            Self::Debug => "debug",
        }
    }
}

impl fmt::Display for OperationCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The four escalation deadlines, measured from operation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    /// Informational warning.
    pub soft: Duration,
    /// Caller decides whether to keep waiting.
    pub medium: Duration,
    /// Forced cancellation.
    pub hard: Duration,
    /// Last resort; an operation never survives `hard`, so this stage does not fire in practice.
    pub nuclear: Duration,
}

impl Deadlines {
    #[must_use]
    pub const fn from_secs(soft: u64, medium: u64, hard: u64, nuclear: u64) -> Self {
        Self {
            soft: Duration::from_secs(soft),
            medium: Duration::from_secs(medium),
            hard: Duration::from_secs(hard),
            nuclear: Duration::from_secs(nuclear),
        }
    }

    /// Require `0 < soft < medium < hard < nuclear`.
    pub fn validate(&self, category: OperationCategory) -> Result<(), PolicyError> {
        let increasing = !self.soft.is_zero()
            && self.soft < self.medium
            && self.medium < self.hard
            && self.hard < self.nuclear;
        if increasing {
            Ok(())
        } else {
            Err(PolicyError::NotIncreasing {
                category,
                deadlines: *self,
            })
        }
    }
}

/// Deadlines for every [`OperationCategory`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeoutPolicy {
    pub export: Deadlines,
    pub batch_export: Deadlines,
    pub debug: Deadlines,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            export: Deadlines::from_secs(10, 20, 30, 45),
            batch_export: Deadlines::from_secs(60, 120, 300, 360),
            debug: Deadlines::from_secs(15, 30, 60, 90),
        }
    }
}

impl TimeoutPolicy {
    #[must_use]
    pub fn for_category(&self, category: OperationCategory) -> Deadlines {
        match category {
            OperationCategory::Export => self.export,
            OperationCategory::BatchExport => self.batch_export,
            OperationCategory::Debug => self.debug,
        }
    }

    pub fn validate(&self) -> Result<(), PolicyError> {
        self.export.validate(OperationCategory::Export)?;
        self.batch_export.validate(OperationCategory::BatchExport)?;
        self.debug.validate(OperationCategory::Debug)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_is_valid() {
        let policy = TimeoutPolicy::default();
        assert!(policy.validate().is_ok());
        assert_eq!(policy.for_category(OperationCategory::Export).hard, Duration::from_secs(30));
        assert_eq!(
            policy.for_category(OperationCategory::BatchExport).nuclear,
            Duration::from_secs(360)
        );
    }

    #[test]
    fn test_tiers_must_strictly_increase() {
        let flat = Deadlines::from_secs(10, 10, 30, 45);
        assert!(flat.validate(OperationCategory::Export).is_err());

        let zero = Deadlines::from_secs(0, 1, 2, 3);
        assert!(zero.validate(OperationCategory::Debug).is_err());

        let policy = TimeoutPolicy {
            debug: Deadlines::from_secs(15, 30, 90, 60),
            ..TimeoutPolicy::default()
        };
        let err = policy.validate().unwrap_err();
        assert!(err.to_string().contains("debug"));
    }
}
