// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Event Bus Implementation - Streaming Mission Events
//
// Live fan-out uses a tokio broadcast channel. A per-mission subscription
// first replays the persisted log from the requested offset, then switches to
// the live feed without gaps or duplicates. Lagged receivers and sequence gaps
// are healed by re-reading the event store, so a slow observer loses nothing.
// The stream ends after the mission's terminal event.

use futures::Stream;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::domain::events::MissionEvent;
use crate::domain::mission::MissionId;
use crate::domain::repository::{MissionEventStore, RepositoryError};

pub type MissionEventStream = Pin<Box<dyn Stream<Item = Result<MissionEvent, EventBusError>> + Send>>;

/// Event bus for publishing and subscribing to mission events
#[derive(Clone)]
pub struct MissionEventBus {
    sender: Arc<broadcast::Sender<MissionEvent>>,
    store: Arc<dyn MissionEventStore>,
}

impl MissionEventBus {
    /// Create a new event bus with specified channel capacity
    /// Capacity determines how many events can be buffered before slow
    /// receivers lag and fall back to the store
    pub fn new(capacity: usize, store: Arc<dyn MissionEventStore>) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender: Arc::new(sender),
            store,
        }
    }

    /// Publish events that have already been appended to the store
    pub fn publish(&self, events: &[MissionEvent]) {
        for event in events {
            // send() only fails when nobody is listening
            let receivers = self.sender.send(event.clone()).unwrap_or(0);
            debug!(
                mission_id = %event.mission_id,
                sequence = event.sequence,
                event_type = event.event_type(),
                receivers,
                "Published mission event"
            );
        }
    }

    /// Live feed of every mission's events, without replay
    pub fn subscribe_all(&self) -> EventReceiver {
        EventReceiver {
            receiver: self.sender.subscribe(),
        }
    }

    /// Events of one mission with `sequence >= from_sequence`, then live
    /// events until the mission reaches a terminal state.
    pub fn subscribe(&self, mission_id: MissionId, from_sequence: u64) -> MissionEventStream {
        // Subscribe before reading the store so nothing falls between the two
        let mut live = self.sender.subscribe();
        let store = self.store.clone();
        let mut next = from_sequence.max(1);

        let stream = async_stream::stream! {
            // Offset beyond the end of a finished mission: nothing will ever arrive
            match finished_before(store.as_ref(), mission_id, next).await {
                Ok(true) => return,
                Ok(false) => {}
                Err(e) => {
                    yield Err(EventBusError::Store(e));
                    return;
                }
            }

            let mut refill = true;
            'live: loop {
                if refill {
                    refill = false;
                    let history = match store.load(mission_id, next).await {
                        Ok(history) => history,
                        Err(e) => {
                            yield Err(EventBusError::Store(e));
                            break 'live;
                        }
                    };
                    for event in history {
                        if event.sequence < next {
                            continue;
                        }
                        next = event.sequence + 1;
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            break 'live;
                        }
                    }
                }

                match live.recv().await {
                    Ok(event) if event.mission_id != mission_id || event.sequence < next => {}
                    Ok(event) if event.sequence > next => {
                        // Gap between what we've delivered and the live feed
                        refill = true;
                    }
                    Ok(event) => {
                        next = event.sequence + 1;
                        let terminal = event.is_terminal();
                        yield Ok(event);
                        if terminal {
                            break 'live;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%mission_id, skipped = n, "Event subscriber lagged, replaying from store");
                        refill = true;
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        yield Err(EventBusError::Closed);
                        break 'live;
                    }
                }
            }
        };

        Box::pin(stream)
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// True when the mission's last stored event is terminal and precedes `next`.
async fn finished_before(
    store: &dyn MissionEventStore,
    mission_id: MissionId,
    next: u64,
) -> Result<bool, RepositoryError> {
    let Some(version) = store.current_version(mission_id).await? else {
        return Ok(false);
    };
    if version >= next {
        return Ok(false);
    }
    let last = store.load(mission_id, version).await?;
    Ok(last.first().is_some_and(MissionEvent::is_terminal))
}

/// Receiver for the unfiltered live feed
pub struct EventReceiver {
    receiver: broadcast::Receiver<MissionEvent>,
}

impl EventReceiver {
    /// Receive the next event (waits until an event is available)
    pub async fn recv(&mut self) -> Result<MissionEvent, EventBusError> {
        self.receiver.recv().await.map_err(|e| match e {
            broadcast::error::RecvError::Closed => EventBusError::Closed,
            broadcast::error::RecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }

    /// Try to receive an event without waiting
    pub fn try_recv(&mut self) -> Result<MissionEvent, EventBusError> {
        self.receiver.try_recv().map_err(|e| match e {
            broadcast::error::TryRecvError::Empty => EventBusError::Empty,
            broadcast::error::TryRecvError::Closed => EventBusError::Closed,
            broadcast::error::TryRecvError::Lagged(n) => {
                warn!("Event receiver lagged by {} events", n);
                EventBusError::Lagged(n)
            }
        })
    }
}

/// Errors that can occur when receiving events
#[derive(Debug, thiserror::Error)]
pub enum EventBusError {
    #[error("Event bus is closed")]
    Closed,

    #[error("No events available")]
    Empty,

    #[error("Receiver lagged by {0} events (events were dropped)")]
    Lagged(u64),

    #[error("Event store error: {0}")]
    Store(#[from] RepositoryError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::events::MissionEventKind;
    use crate::domain::mission::MissionMode;
    use crate::infrastructure::repositories::InMemoryMissionEventStore;
    use futures::StreamExt;

    fn event(mission_id: MissionId, sequence: u64) -> MissionEvent {
        let kind = match sequence {
            1 => MissionEventKind::MissionSubmitted {
                objective: "Draft a launch plan".into(),
                mode: MissionMode::AutonomousAutomatic,
                budget_limit: 1.0,
                seed: 1,
                user_context: serde_json::Value::Null,
            },
            _ => MissionEventKind::BriefingStarted,
        };
        MissionEvent::new(mission_id, sequence, kind)
    }

    async fn append(store: &InMemoryMissionEventStore, bus: &MissionEventBus, events: Vec<MissionEvent>) {
        let mission_id = events[0].mission_id;
        let expected = events[0].sequence - 1;
        store.append(mission_id, expected, &events).await.unwrap();
        bus.publish(&events);
    }

    #[tokio::test]
    async fn test_replay_then_live_without_duplicates() {
        let store = Arc::new(InMemoryMissionEventStore::new());
        let bus = MissionEventBus::new(16, store.clone());
        let id = MissionId::new();
        append(&store, &bus, vec![event(id, 1), event(id, 2)]).await;

        let mut stream = bus.subscribe(id, 2);
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(first.sequence, 2);

        let aborted = MissionEvent::new(
            id,
            3,
            MissionEventKind::MissionAborted {
                reason: "operator".into(),
                last_completed_step: None,
            },
        );
        // Another mission's traffic is filtered out
        let other = MissionId::new();
        append(&store, &bus, vec![event(other, 1)]).await;
        append(&store, &bus, vec![aborted]).await;

        let live = stream.next().await.unwrap().unwrap();
        assert_eq!(live.sequence, 3);
        assert!(stream.next().await.is_none(), "stream ends after terminal event");
    }

    #[tokio::test]
    async fn test_lagged_subscriber_recovers_from_store() {
        let store = Arc::new(InMemoryMissionEventStore::new());
        let bus = MissionEventBus::new(1, store.clone());
        let id = MissionId::new();

        let mut stream = bus.subscribe(id, 1);
        append(&store, &bus, vec![event(id, 1)]).await;
        assert_eq!(stream.next().await.unwrap().unwrap().sequence, 1);

        // Overflows the one-slot channel while nobody is reading
        for seq in 2..=5 {
            append(&store, &bus, vec![event(id, seq)]).await;
        }

        let mut seen = Vec::new();
        for _ in 2..=5 {
            seen.push(stream.next().await.unwrap().unwrap().sequence);
        }
        assert_eq!(seen, vec![2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_offset_past_finished_mission_ends_immediately() {
        let store = Arc::new(InMemoryMissionEventStore::new());
        let bus = MissionEventBus::new(4, store.clone());
        let id = MissionId::new();
        let aborted = MissionEvent::new(
            id,
            2,
            MissionEventKind::MissionAborted {
                reason: "operator".into(),
                last_completed_step: None,
            },
        );
        append(&store, &bus, vec![event(id, 1), aborted]).await;

        let mut stream = bus.subscribe(id, 10);
        assert!(stream.next().await.is_none());
        assert_eq!(bus.subscribe(id, 1).count().await, 2);
    }
}
