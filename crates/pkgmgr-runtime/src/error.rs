use std::error::Error as StdError;
use std::fmt;

use pkgmgr_types::Condition;

/// A task failure that carries condition updates for the status service.
///
/// Condition errors nest: `source` may itself contain another
/// `ConditionError` further down the chain, and the status service applies
/// the conditions of every layer it finds.
#[derive(Debug)]
pub struct ConditionError {
    pub conditions: Vec<Condition>,
    source: Option<anyhow::Error>,
}

impl ConditionError {
    pub fn new(conditions: Vec<Condition>) -> Self {
        Self {
            conditions,
            source: None,
        }
    }

    pub fn with_source(mut self, source: anyhow::Error) -> Self {
        self.source = Some(source);
        self
    }

    /// Wrap `err` into a single failed condition whose message is the
    /// rendered error chain.
    pub fn failed(name: &str, reason: &str, err: anyhow::Error) -> anyhow::Error {
        let condition = Condition::failed(name, reason, format!("{err:#}"));
        ConditionError::new(vec![condition]).with_source(err).into()
    }
}

impl fmt::Display for ConditionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for cond in &self.conditions {
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(f, "{}={}", cond.name, cond.status)?;
            if !cond.reason.is_empty() {
                write!(f, " ({})", cond.reason)?;
            }
        }
        if first {
            f.write_str("condition update")?;
        }
        Ok(())
    }
}

impl StdError for ConditionError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.source
            .as_deref()
            .map(|e| e as &(dyn StdError + 'static))
    }
}
