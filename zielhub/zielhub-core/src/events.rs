use serde::Serialize;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::store::NotificationTarget;

/// Lifecycle transition events. Emitted after a transition has been
/// persisted; consumers observe, they never gate.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    Submitted { form_id: Uuid },
    Approved { form_id: Uuid },
    Returned { form_id: Uuid },
}

impl Event {
    /// Which side of the workflow the event is addressed to.
    pub fn target(&self) -> NotificationTarget {
        match self {
            Event::Submitted { .. } => NotificationTarget::Authority,
            Event::Approved { .. } | Event::Returned { .. } => NotificationTarget::School,
        }
    }
}

/// Transitions a lagging consumer may miss before the bus drops the oldest.
/// Consumers that fall further behind re-read state from the store, so a
/// bounded backlog is enough.
const EVENT_BACKLOG: usize = 100;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BACKLOG);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Subscribe to the events addressed to one side of the workflow only.
    pub fn subscribe_to(&self, target: NotificationTarget) -> TargetedReceiver {
        TargetedReceiver {
            rx: self.tx.subscribe(),
            target,
        }
    }

    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }
}

/// Receiver that skips events addressed to the other side.
pub struct TargetedReceiver {
    rx: broadcast::Receiver<Event>,
    target: NotificationTarget,
}

impl TargetedReceiver {
    pub async fn recv(&mut self) -> Result<Event, broadcast::error::RecvError> {
        loop {
            let event = self.rx.recv().await?;
            if event.target() == self.target {
                return Ok(event);
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
