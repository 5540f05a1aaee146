//! Execution phase of a single task run.
//!
//! State transitions:
//! - Pending -> Fetching -> Writing -> Succeeded
//! - Writing -> Fetching (by_date / by_stock flush a chunk, then keep fetching)
//! - Fetching -> Succeeded (nothing to write)
//! - any non-terminal -> Failed

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionPhase {
    Pending,
    Fetching,
    Writing,
    Succeeded,
    Failed,
}

impl ExecutionPhase {
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionPhase::Succeeded | ExecutionPhase::Failed)
    }

    pub fn can_transition_to(self, next: ExecutionPhase) -> bool {
        use ExecutionPhase::*;
        match (self, next) {
            (Pending, Fetching) => true,
            (Fetching, Writing) | (Writing, Fetching) => true,
            (Fetching, Succeeded) | (Writing, Succeeded) => true,
            (from, Failed) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ExecutionPhase::*;
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(Pending, Fetching, true)]
    #[case(Fetching, Writing, true)]
    #[case(Writing, Fetching, true)]
    #[case(Writing, Succeeded, true)]
    #[case(Fetching, Succeeded, true)]
    #[case(Pending, Failed, true)]
    #[case(Writing, Failed, true)]
    #[case(Pending, Writing, false)]
    #[case(Pending, Succeeded, false)]
    #[case(Succeeded, Failed, false)]
    #[case(Failed, Fetching, false)]
    fn transitions(#[case] from: ExecutionPhase, #[case] to: ExecutionPhase, #[case] ok: bool) {
        assert_eq!(from.can_transition_to(to), ok);
    }

    #[test]
    fn terminal_phases() {
        assert!(Succeeded.is_terminal());
        assert!(Failed.is_terminal());
        assert!(!Writing.is_terminal());
    }
}
