//! Upstream relay
//!
//! Moves messages from the publisher channel into the hub, but only while
//! at least one subscriber is live. While paused, messages stay in the
//! channel and the publisher waits once it is full.

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::hub::{Hub, LifecycleHooks, SseMessage};

/// Hooks that open the gate on the first subscriber and close it after the last
pub fn gate_hooks(gate: watch::Sender<bool>) -> LifecycleHooks {
    let open = gate.clone();
    LifecycleHooks::new()
        .on_first_subscriber(move || {
            open.send_replace(true);
        })
        .on_last_subscriber_gone(move || {
            gate.send_replace(false);
        })
}

/// Spawn the relay task
///
/// The task ends when the publisher side closes, the hub stops, or the gate
/// sender is dropped together with the hub's hooks.
pub fn spawn(
    hub: Hub,
    upstream: mpsc::Receiver<SseMessage>,
    gate: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(run(hub, upstream, gate))
}

async fn run(hub: Hub, mut upstream: mpsc::Receiver<SseMessage>, mut gate: watch::Receiver<bool>) {
    loop {
        if gate.wait_for(|listening| *listening).await.is_err() {
            break;
        }
        tracing::debug!("Upstream relay resumed");

        loop {
            tokio::select! {
                message = upstream.recv() => {
                    let Some(message) = message else {
                        tracing::debug!("Upstream closed");
                        return;
                    };
                    if hub.broadcast(message).await.is_err() {
                        return;
                    }
                }
                changed = gate.changed() => {
                    if changed.is_err() {
                        return;
                    }
                    if !*gate.borrow_and_update() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("Upstream relay paused");
    }
}
