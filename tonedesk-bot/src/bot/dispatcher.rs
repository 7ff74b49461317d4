//! Per-user event dispatch
//!
//! Each user with pending events gets one worker task that drains a FIFO
//! queue, so a user's events are handled strictly in arrival order while
//! different users proceed in parallel. Cancel requests skip the queue and
//! run immediately; otherwise a cancel would wait behind the very run it is
//! meant to stop.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, error::SendError, UnboundedReceiver, UnboundedSender};
use tokio_util::task::TaskTracker;
use tonedesk_common::session::UserId;
use tracing::debug;

use super::handler::EventHandler;
use crate::transport::ChatEvent;

type Queues = Arc<Mutex<HashMap<UserId, UnboundedSender<ChatEvent>>>>;

pub struct Dispatcher {
    handler: Arc<dyn EventHandler>,
    queues: Queues,
    tracker: TaskTracker,
}

impl Dispatcher {
    pub fn new(handler: Arc<dyn EventHandler>) -> Self {
        Self {
            handler,
            queues: Arc::new(Mutex::new(HashMap::new())),
            tracker: TaskTracker::new(),
        }
    }

    pub fn dispatch(&self, event: ChatEvent) {
        if event.is_cancel() {
            let handler = self.handler.clone();
            debug!(user_id = event.user_id, "Cancel dispatched out of band");
            self.tracker.spawn(async move { handler.handle(event).await });
            return;
        }

        let user_id = event.user_id;
        let mut queues = self.queues.lock().unwrap_or_else(|e| e.into_inner());
        let event = match queues.get(&user_id) {
            Some(queue) => match queue.send(event) {
                Ok(()) => return,
                // Worker died without cleaning up; start a new one
                Err(SendError(event)) => event,
            },
            None => event,
        };

        let (tx, rx) = mpsc::unbounded_channel();
        queues.insert(user_id, tx);
        drop(queues);

        self.tracker.spawn(drain_queue(
            user_id,
            event,
            rx,
            self.handler.clone(),
            self.queues.clone(),
        ));
    }

    /// Number of users with a live worker
    pub fn active_users(&self) -> usize {
        self.queues.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Stop accepting work and wait for every queued event to finish
    pub async fn shutdown(&self) {
        self.tracker.close();
        self.tracker.wait().await;
    }
}

async fn drain_queue(
    user_id: UserId,
    first: ChatEvent,
    mut rx: UnboundedReceiver<ChatEvent>,
    handler: Arc<dyn EventHandler>,
    queues: Queues,
) {
    handler.handle(first).await;
    loop {
        let next = match rx.try_recv() {
            Ok(event) => event,
            Err(_) => {
                // Senders only push while holding the lock, so an empty queue
                // seen under the lock stays empty once the entry is gone
                let mut map = queues.lock().unwrap_or_else(|e| e.into_inner());
                match rx.try_recv() {
                    Ok(event) => event,
                    Err(_) => {
                        map.remove(&user_id);
                        break;
                    }
                }
            }
        };
        handler.handle(next).await;
    }
    debug!(user_id, "User queue drained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChatEventKind;
    use async_trait::async_trait;
    use std::time::Duration;
    use tokio::sync::Notify;

    fn command(user_id: UserId, name: &str) -> ChatEvent {
        ChatEvent {
            user_id,
            chat_id: user_id,
            kind: ChatEventKind::Command {
                name: name.to_string(),
                args: String::new(),
            },
        }
    }

    fn name_of(event: &ChatEvent) -> String {
        match &event.kind {
            ChatEventKind::Command { name, .. } => name.clone(),
            _ => String::new(),
        }
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(UserId, String)>>,
        gate: Notify,
    }

    #[async_trait]
    impl EventHandler for Recorder {
        async fn handle(&self, event: ChatEvent) {
            let name = name_of(&event);
            if name == "block" {
                self.gate.notified().await;
            } else {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
            self.seen.lock().unwrap().push((event.user_id, name));
        }
    }

    impl Recorder {
        fn names_for(&self, user_id: UserId) -> Vec<String> {
            self.seen
                .lock()
                .unwrap()
                .iter()
                .filter(|(u, _)| *u == user_id)
                .map(|(_, n)| n.clone())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_per_user_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        for i in 0..5 {
            dispatcher.dispatch(command(1, &format!("a{}", i)));
            dispatcher.dispatch(command(2, &format!("b{}", i)));
        }
        dispatcher.shutdown().await;

        assert_eq!(recorder.names_for(1), vec!["a0", "a1", "a2", "a3", "a4"]);
        assert_eq!(recorder.names_for(2), vec!["b0", "b1", "b2", "b3", "b4"]);
        assert_eq!(dispatcher.active_users(), 0);
    }

    #[tokio::test]
    async fn test_cancel_overtakes_queued_work() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        dispatcher.dispatch(command(1, "block"));
        dispatcher.dispatch(command(1, "after"));
        dispatcher.dispatch(command(1, "cancel"));

        tokio::time::timeout(Duration::from_secs(5), async {
            while recorder.names_for(1).is_empty() {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(recorder.names_for(1), vec!["cancel"]);

        recorder.gate.notify_one();
        dispatcher.shutdown().await;
        assert_eq!(recorder.names_for(1), vec!["cancel", "block", "after"]);
    }

    #[tokio::test]
    async fn test_worker_restarts_after_drain() {
        let recorder = Arc::new(Recorder::default());
        let dispatcher = Dispatcher::new(recorder.clone());

        dispatcher.dispatch(command(7, "first"));
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.active_users() > 0 {
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
        })
        .await
        .unwrap();

        dispatcher.dispatch(command(7, "second"));
        dispatcher.shutdown().await;
        assert_eq!(recorder.names_for(7), vec!["first", "second"]);
    }
}
