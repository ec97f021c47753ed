use std::fmt;

use thiserror::Error;

use crate::classify::ClassifyError;
use crate::normalize::NormalizeError;

/// Pipeline stage a failure happened in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Fetch,
    Parse,
    Classify,
    Normalize,
    Load,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Classify => "classify",
            Stage::Normalize => "normalize",
            Stage::Load => "load",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single listing that could not be loaded. The batch continues.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error(transparent)]
    Normalize(#[from] NormalizeError),
    #[error("{0}")]
    Load(String),
}

impl RecordError {
    pub fn stage(&self) -> Stage {
        match self {
            RecordError::Classify(_) => Stage::Classify,
            RecordError::Normalize(_) => Stage::Normalize,
            RecordError::Load(_) => Stage::Load,
        }
    }

    pub fn load(err: &anyhow::Error) -> Self {
        RecordError::Load(format!("{:#}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_follows_variant() {
        assert_eq!(RecordError::from(ClassifyError::MissingName).stage(), Stage::Classify);
        assert_eq!(RecordError::from(NormalizeError::MissingCity).stage(), Stage::Normalize);
        let e = anyhow::anyhow!("UNIQUE constraint failed").context("insert restaurant");
        let err = RecordError::load(&e);
        assert_eq!(err.stage(), Stage::Load);
        assert_eq!(err.to_string(), "insert restaurant: UNIQUE constraint failed");
    }
}
