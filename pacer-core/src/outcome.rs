//! Per-item outcome records for batch and sequential execution.

use serde::Serialize;

/// Result of one item in an ordered run. `index` is the item's input position.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome<T> {
    Success { index: usize, data: T },
    Failure { index: usize, error: String },
}

impl<T> Outcome<T> {
    pub fn index(&self) -> usize {
        match self {
            Self::Success { index, .. } | Self::Failure { index, .. } => *index,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    pub fn data(&self) -> Option<&T> {
        match self {
            Self::Success { data, .. } => Some(data),
            Self::Failure { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Success { .. } => None,
            Self::Failure { error, .. } => Some(error),
        }
    }

    pub fn from_result<E>(
        index: usize,
        result: Result<T, E>,
        message: impl FnOnce(&E) -> String,
    ) -> Self {
        match result {
            Ok(data) => Self::Success { index, data },
            Err(err) => Self::Failure {
                index,
                error: message(&err),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_accessors() {
        let ok: Outcome<i32> = Outcome::Success { index: 0, data: 7 };
        let failed: Outcome<i32> = Outcome::Failure {
            index: 1,
            error: "Not found".to_string(),
        };
        assert!(ok.is_success());
        assert_eq!(ok.data(), Some(&7));
        assert_eq!(ok.error(), None);
        assert!(!failed.is_success());
        assert_eq!(failed.index(), 1);
        assert_eq!(failed.error(), Some("Not found"));
    }

    #[test]
    fn test_outcome_from_result() {
        let outcome = Outcome::from_result(3, Err::<(), _>("nope"), |e| e.to_string());
        assert_eq!(
            outcome,
            Outcome::Failure {
                index: 3,
                error: "nope".to_string()
            }
        );
    }
}
