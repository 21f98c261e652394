//! Stage transition rules.

use thiserror::Error;

use super::types::Stage;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransitionError {
    #[error("invalid stage transition from {from} to {to}")]
    InvalidTransition { from: Stage, to: Stage },
    #[error("cannot resume from failed into {to}; the last good stage was {last_good}")]
    ResumeBehindFailure { to: Stage, last_good: Stage },
    #[error("cannot leave terminal stage {state}")]
    FromTerminalState { state: Stage },
}

pub struct StateTransition;

impl StateTransition {
    /// Check a move from `from` to `to`.
    ///
    /// Forward moves and staying put are allowed, anything may fail, and a
    /// failed run may only resume at `last_good` or later.
    pub fn validate(from: Stage, to: Stage, last_good: Stage) -> Result<(), TransitionError> {
        if to == Stage::Failed {
            return Ok(());
        }

        match from {
            Stage::Completed if to == Stage::Completed => Ok(()),
            Stage::Completed => Err(TransitionError::FromTerminalState { state: from }),
            Stage::Failed => {
                if to.rank() >= last_good.rank() {
                    Ok(())
                } else {
                    Err(TransitionError::ResumeBehindFailure { to, last_good })
                }
            }
            _ if to.rank() >= from.rank() => Ok(()),
            _ => Err(TransitionError::InvalidTransition { from, to }),
        }
    }

    pub fn next_stage(current: Stage) -> Option<Stage> {
        match current {
            Stage::NotStarted => Some(Stage::Analyzing),
            Stage::Analyzing => Some(Stage::Designing),
            Stage::Designing => Some(Stage::Implementing),
            Stage::Implementing => Some(Stage::Migrating),
            Stage::Migrating => Some(Stage::Completed),
            Stage::Completed | Stage::Failed => None,
        }
    }

    pub fn is_terminal(stage: Stage) -> bool {
        matches!(stage, Stage::Completed | Stage::Failed)
    }

    pub fn stage_description(stage: Stage) -> &'static str {
        match stage {
            Stage::NotStarted => "not started",
            Stage::Analyzing => "analyzing existing documentation",
            Stage::Designing => "designing content schemas",
            Stage::Implementing => "scaffolding site structure",
            Stage::Migrating => "migrating documents",
            Stage::Completed => "completed",
            Stage::Failed => "failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_and_same_stage_allowed() {
        assert!(StateTransition::validate(Stage::NotStarted, Stage::Analyzing, Stage::NotStarted).is_ok());
        assert!(StateTransition::validate(Stage::Analyzing, Stage::Analyzing, Stage::Analyzing).is_ok());
        assert!(StateTransition::validate(Stage::Designing, Stage::Migrating, Stage::Designing).is_ok());
        assert!(StateTransition::validate(Stage::Migrating, Stage::Completed, Stage::Migrating).is_ok());
    }

    #[test]
    fn test_backward_rejected() {
        assert_eq!(
            StateTransition::validate(Stage::Migrating, Stage::Designing, Stage::Migrating),
            Err(TransitionError::InvalidTransition {
                from: Stage::Migrating,
                to: Stage::Designing
            })
        );
        assert!(StateTransition::validate(Stage::Completed, Stage::Analyzing, Stage::Completed).is_err());
    }

    #[test]
    fn test_any_stage_may_fail() {
        for stage in [Stage::NotStarted, Stage::Designing, Stage::Completed, Stage::Failed] {
            assert!(StateTransition::validate(stage, Stage::Failed, stage).is_ok());
        }
    }

    #[test]
    fn test_resume_from_failed_respects_last_good_stage() {
        assert!(StateTransition::validate(Stage::Failed, Stage::Implementing, Stage::Implementing).is_ok());
        assert!(StateTransition::validate(Stage::Failed, Stage::Migrating, Stage::Implementing).is_ok());
        assert_eq!(
            StateTransition::validate(Stage::Failed, Stage::Analyzing, Stage::Implementing),
            Err(TransitionError::ResumeBehindFailure {
                to: Stage::Analyzing,
                last_good: Stage::Implementing
            })
        );
    }

    #[test]
    fn test_next_stage() {
        assert_eq!(StateTransition::next_stage(Stage::NotStarted), Some(Stage::Analyzing));
        assert_eq!(StateTransition::next_stage(Stage::Completed), None);
        assert!(StateTransition::is_terminal(Stage::Failed));
    }
}
