use std::{collections::HashSet, time::Duration};

use tokio::{
    sync::mpsc,
    time::{interval, Instant},
};

use crate::registry::ElementRegistry;

/// How often the registry is polled for newly defined tags.
pub const ELEMENT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Ceiling for the whole wait. Tags still missing afterwards are reported
/// individually so failures attribute to the right plugin.
pub const ELEMENT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateEvent {
    /// A pending tag became defined; emitted once per tag.
    TagDefined(String),
    /// The ceiling expired with these tags still undefined.
    TimedOut { missing: Vec<String> },
}

/// Polls the registry until every tag in `tags` is defined or the ceiling
/// expires. One global wait over the union of all plugins' tags: element
/// registration is a global, idempotent side effect of resource execution,
/// so per-plugin gates would duplicate timers without changing the result.
pub async fn watch_custom_elements(
    registry: ElementRegistry,
    tags: HashSet<String>,
    events: mpsc::UnboundedSender<GateEvent>,
) {
    let mut pending = tags;
    if pending.is_empty() {
        return;
    }
    let deadline = Instant::now() + ELEMENT_WAIT_TIMEOUT;
    let mut ticker = interval(ELEMENT_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let confirmed: Vec<String> = pending
            .iter()
            .filter(|tag| registry.is_defined(tag))
            .cloned()
            .collect();
        for tag in confirmed {
            pending.remove(&tag);
            if events.send(GateEvent::TagDefined(tag)).is_err() {
                return;
            }
        }
        if pending.is_empty() {
            return;
        }
        if Instant::now() >= deadline {
            let mut missing: Vec<String> = pending.into_iter().collect();
            missing.sort();
            let _ = events.send(GateEvent::TimedOut { missing });
            return;
        }
    }
}
