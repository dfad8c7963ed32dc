// =============================================================================
// Position Lifecycle — serialized modification commands
// =============================================================================
//
// All mutations of live positions flow through one small command type,
// executed by the supervisor: close a volume fraction or move the stop. The
// command goes to the adapter first; only an acknowledged change is mirrored
// into the tracker, so tracker and broker cannot drift inside a cycle.
// =============================================================================

use tracing::{info, warn};

use crate::adapter::{AdapterError, MarketAdapter};
use crate::tracker::PositionTracker;
use crate::types::Position;

/// A requested mutation of one live position.
#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleCommand {
    CloseVolume { ticket: u64, fraction: f64 },
    MoveStop { ticket: u64, new_sl: f64 },
}

/// What actually happened, for event emission and outcome accounting.
#[derive(Debug, Clone)]
pub enum AppliedChange {
    Closed {
        /// Snapshot of the position before the close.
        position: Position,
        fraction: f64,
        closed_volume: f64,
        fully_closed: bool,
    },
    StopMoved {
        ticket: u64,
        new_sl: f64,
    },
}

/// Execute one command against the adapter and mirror the acknowledged
/// change into the tracker.
pub async fn apply(
    adapter: &dyn MarketAdapter,
    tracker: &mut PositionTracker,
    command: LifecycleCommand,
) -> Result<AppliedChange, AdapterError> {
    match command {
        LifecycleCommand::CloseVolume { ticket, fraction } => {
            let Some(before) = tracker.get(ticket).cloned() else {
                return Err(AdapterError::UnknownTicket(ticket));
            };
            let fraction = fraction.clamp(0.0, 1.0);

            adapter.position_close(ticket, fraction).await?;

            let closed_volume = tracker.reduce_volume(ticket, fraction).unwrap_or(0.0);
            let fully_closed = tracker.get(ticket).is_none();
            if fully_closed {
                tracker.mark_closed(ticket);
            }

            info!(
                ticket,
                symbol = %before.symbol,
                fraction,
                closed_volume,
                fully_closed,
                "lifecycle close applied"
            );
            Ok(AppliedChange::Closed {
                position: before,
                fraction,
                closed_volume,
                fully_closed,
            })
        }
        LifecycleCommand::MoveStop { ticket, new_sl } => {
            if tracker.get(ticket).is_none() {
                warn!(ticket, "stop move requested for untracked ticket");
                return Err(AdapterError::UnknownTicket(ticket));
            }

            adapter.position_modify(ticket, Some(new_sl), None).await?;
            tracker.set_stop(ticket, new_sl);

            info!(ticket, new_sl, "lifecycle stop move applied");
            Ok(AppliedChange::StopMoved { ticket, new_sl })
        }
    }
}
