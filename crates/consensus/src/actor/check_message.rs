use lbft_core::msg::MessageCode;
use lbft_core::view::View;

use super::Core;
use crate::backend::Backend;
use crate::error::{CoreError, CoreResult};
use crate::round_state::State;

/// Decide whether a message for `view` can be handled right now
///
/// RoundChange messages are accepted for any round of the current sequence
/// not lower than ours. Everything else must be for exactly our view, and
/// only a Preprepare can start a round.
pub(crate) fn check_message(
    code: MessageCode,
    view: View,
    current: View,
    state: State,
    waiting_for_round_change: bool,
) -> CoreResult<()> {
    if code == MessageCode::RoundChange {
        if current.sequence < view.sequence {
            return Err(CoreError::FutureMessage);
        }
        if view < current {
            return Err(CoreError::OldMessage);
        }
        return Ok(());
    }

    if current < view {
        return Err(CoreError::FutureMessage);
    }
    if view < current {
        return Err(CoreError::OldMessage);
    }
    if waiting_for_round_change {
        return Err(CoreError::FutureMessage);
    }
    if state == State::AcceptRequest && code != MessageCode::Preprepare {
        return Err(CoreError::FutureMessage);
    }
    Ok(())
}

impl<B> Core<B>
where
    B: Backend,
{
    pub(super) fn check_message(&self, code: MessageCode, view: View) -> CoreResult<()> {
        check_message(
            code,
            view,
            self.current.view(),
            self.state,
            self.waiting_for_round_change,
        )
    }
}
