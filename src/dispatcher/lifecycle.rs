//! Link lifecycle of one radio unit

use super::task::TaskCommand;

/// Where a radio unit is in its open/receive/close cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    #[default]
    Closed,
    Open,
    Receiving,
}

impl LinkState {
    /// State after `command` succeeds, or `None` if `command` is not
    /// allowed now
    pub fn transition(self, command: TaskCommand) -> Option<LinkState> {
        match (self, command) {
            (LinkState::Closed, TaskCommand::Open) => Some(LinkState::Open),
            (LinkState::Open | LinkState::Receiving, TaskCommand::RxStart) => {
                Some(LinkState::Receiving)
            }
            (LinkState::Open | LinkState::Receiving, TaskCommand::RxStop) => Some(LinkState::Open),
            (LinkState::Open | LinkState::Receiving, TaskCommand::TxSend) => Some(self),
            (LinkState::Open | LinkState::Receiving, TaskCommand::Close) => Some(LinkState::Closed),
            _ => None,
        }
    }
}
