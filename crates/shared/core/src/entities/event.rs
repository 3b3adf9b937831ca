use serde::{Deserialize, Serialize};

use super::execution::ExecutionResult;
use super::position::PnlRecord;
use super::signal::{SignalId, SignalStatus};

/// Delivery priority for notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Priority {
    #[default]
    Normal,
    /// Needs operator attention (e.g. a position left without protection)
    High,
}

/// Events published by the engine to the notification sink
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EngineEvent {
    TargetSettled {
        result: ExecutionResult,
        priority: Priority,
    },
    SignalSettled {
        signal_id: SignalId,
        status: SignalStatus,
        filled: usize,
        total: usize,
    },
    PositionClosed {
        record: PnlRecord,
    },
}

impl EngineEvent {
    pub fn target_settled(result: ExecutionResult) -> Self {
        let priority = if result.outcome.is_filled() && !result.protection.is_complete() {
            Priority::High
        } else {
            Priority::Normal
        };
        EngineEvent::TargetSettled { result, priority }
    }

    pub fn priority(&self) -> Priority {
        match self {
            EngineEvent::TargetSettled { priority, .. } => *priority,
            _ => Priority::Normal,
        }
    }
}
