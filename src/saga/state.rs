/// Lifecycle of a single saga run
///
/// ```text
/// Pending -> StepSucceeded(0) -> ... -> StepSucceeded(n-1) -> Committed
///    \______________________________________/
///                      |
///                 RollingBack -> RolledBack
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Pending,
    /// Step with this 0-based index has committed
    StepSucceeded(usize),
    Committed,
    RollingBack,
    RolledBack,
}

impl SagaState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SagaState::Committed | SagaState::RolledBack)
    }

    pub fn can_transition_to(&self, next: &SagaState) -> bool {
        match (self, next) {
            (SagaState::Pending, SagaState::StepSucceeded(0)) => true,
            (SagaState::StepSucceeded(done), SagaState::StepSucceeded(following)) => {
                *following == done + 1
            }
            (SagaState::StepSucceeded(_), SagaState::Committed) => true,
            (SagaState::Pending | SagaState::StepSucceeded(_), SagaState::RollingBack) => true,
            (SagaState::RollingBack, SagaState::RolledBack) => true,
            _ => false,
        }
    }
}
