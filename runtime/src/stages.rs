//! Which downstream stages a pipeline runs.
//!
//! One [`StageSet`] describes every fan-out topology: all three stages (the
//! default), digest only, store only, and so on. The dispatcher pushes into the
//! active stages in the fixed order digest, cache, store.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error returned when a stage list cannot be parsed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageParseError {
    /// A name other than `digest`, `cache` or `store`.
    #[error("Unknown stage '{0}' (expected digest, cache or store)")]
    Unknown(String),

    /// The list named no stage at all.
    #[error("At least one stage must be active")]
    Empty,
}

/// A downstream stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    /// Password digest.
    Digest,
    /// Cache write with TTL.
    Cache,
    /// Durable insert.
    Store,
}

impl Stage {
    /// Every stage in dispatch order.
    pub const ALL: [Self; 3] = [Self::Digest, Self::Cache, Self::Store];

    /// Lower-case name used in logs, metrics labels and configuration.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Digest => "digest",
            Self::Cache => "cache",
            Self::Store => "store",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Stage {
    type Err = StageParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "digest" | "hash" => Ok(Self::Digest),
            "cache" => Ok(Self::Cache),
            "store" | "db" => Ok(Self::Store),
            other => Err(StageParseError::Unknown(other.to_string())),
        }
    }
}

/// Set of active stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSet {
    digest: bool,
    cache: bool,
    store: bool,
}

impl StageSet {
    /// All three stages.
    #[must_use]
    pub const fn all() -> Self {
        Self {
            digest: true,
            cache: true,
            store: true,
        }
    }

    /// Exactly the listed stages.
    #[must_use]
    pub fn only(stages: &[Stage]) -> Self {
        stages.iter().fold(
            Self {
                digest: false,
                cache: false,
                store: false,
            },
            |set, stage| set.with(*stage),
        )
    }

    /// This set plus `stage`.
    #[must_use]
    pub const fn with(mut self, stage: Stage) -> Self {
        match stage {
            Stage::Digest => self.digest = true,
            Stage::Cache => self.cache = true,
            Stage::Store => self.store = true,
        }
        self
    }

    /// This set minus `stage`.
    #[must_use]
    pub const fn without(mut self, stage: Stage) -> Self {
        match stage {
            Stage::Digest => self.digest = false,
            Stage::Cache => self.cache = false,
            Stage::Store => self.store = false,
        }
        self
    }

    /// Whether `stage` is active.
    #[must_use]
    pub const fn contains(&self, stage: Stage) -> bool {
        match stage {
            Stage::Digest => self.digest,
            Stage::Cache => self.cache,
            Stage::Store => self.store,
        }
    }

    /// Whether no stage is active.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        !(self.digest || self.cache || self.store)
    }

    /// Active stages in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL.into_iter().filter(|stage| self.contains(*stage))
    }
}

impl Default for StageSet {
    fn default() -> Self {
        Self::all()
    }
}

impl fmt::Display for StageSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.iter().map(Stage::name).collect();
        f.write_str(&names.join(","))
    }
}

impl FromStr for StageSet {
    type Err = StageParseError;

    /// Parse a comma-separated list such as `digest,cache,store`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let stages = s
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(str::parse)
            .collect::<Result<Vec<Stage>, _>>()?;

        let set = Self::only(&stages);
        if set.is_empty() {
            return Err(StageParseError::Empty);
        }
        Ok(set)
    }
}
