//! The ordered environment chain.

use serde::{Deserialize, Serialize};

use crate::domain::error::PromoteError;

/// A deployment environment. The chain order is fixed: promotions move
/// strictly from one environment to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Stage,
    Prod,
}

impl Environment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Environment::Dev => "dev",
            Environment::Stage => "stage",
            Environment::Prod => "prod",
        }
    }

    /// The configuration branch carrying this environment's state.
    pub fn branch(&self) -> String {
        format!("env/{}", self.as_str())
    }

    /// Position in the chain, 0-based.
    pub fn position(&self) -> usize {
        match self {
            Environment::Dev => 0,
            Environment::Stage => 1,
            Environment::Prod => 2,
        }
    }
}

impl std::str::FromStr for Environment {
    type Err = PromoteError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "stage" => Ok(Environment::Stage),
            "prod" => Ok(Environment::Prod),
            _ => Err(PromoteError::UnknownEnvironment(s.to_string())),
        }
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
