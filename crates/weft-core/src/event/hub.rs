//! Per-thread event broadcast hub.
//!
//! Each thread gets its own broadcast topic, so subscribers only ever see
//! events for the thread they asked about. Delivery is best-effort to
//! currently connected subscribers; there is no replay. What a late
//! subscriber gets instead is a synthetic recovery event summarizing the
//! thread's state at subscribe time, emitted before any live event.

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::broadcast;
use weft_types::event::ThreadEvent;
use weft_types::thread::Thread;

/// Broadcast buffer per topic. A subscriber that falls further behind than
/// this sees a lag notice and continues from the oldest retained event.
const TOPIC_CAPACITY: usize = 256;

/// Fan-out hub mapping thread ids to broadcast topics.
#[derive(Default)]
pub struct ThreadEventHub {
    topics: DashMap<String, broadcast::Sender<ThreadEvent>>,
}

impl ThreadEventHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish an event on its thread's topic.
    ///
    /// A send error just means nobody is listening right now; the event is
    /// dropped, matching live-only delivery semantics.
    pub fn publish(&self, event: ThreadEvent) {
        let sender = self.sender(event.thread_id());
        let _ = sender.send(event);
    }

    /// Subscribe to a thread's topic.
    ///
    /// The returned subscription yields a recovery event built from the
    /// given thread snapshot before any live event, so the subscriber can
    /// reconcile state it missed.
    pub fn subscribe(&self, thread: &Thread) -> ThreadSubscription {
        let receiver = self.sender(&thread.thread_id).subscribe();
        let recovery = ThreadEvent::Recovery {
            thread_id: thread.thread_id.clone(),
            session_ids: thread.session_ids.clone(),
            completed_steps: thread.completed_steps.clone(),
            timestamp: Utc::now(),
        };
        ThreadSubscription {
            pending: Some(recovery),
            receiver,
        }
    }

    /// Drop a thread's topic. Existing subscribers drain buffered events
    /// and then see end-of-stream.
    pub fn remove(&self, thread_id: &str) {
        self.topics.remove(thread_id);
    }

    fn sender(&self, thread_id: &str) -> broadcast::Sender<ThreadEvent> {
        self.topics
            .entry(thread_id.to_string())
            .or_insert_with(|| broadcast::channel(TOPIC_CAPACITY).0)
            .clone()
    }
}

/// A live subscription to one thread's events.
pub struct ThreadSubscription {
    pending: Option<ThreadEvent>,
    receiver: broadcast::Receiver<ThreadEvent>,
}

impl ThreadSubscription {
    /// Next event, or `None` once the topic is gone and drained.
    ///
    /// Lagged subscribers skip ahead to the oldest retained event rather
    /// than erroring out.
    pub async fn next(&mut self) -> Option<ThreadEvent> {
        if let Some(event) = self.pending.take() {
            return Some(event);
        }
        loop {
            match self.receiver.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "event subscriber lagged, skipping ahead");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::thread::ThreadStatus;

    fn thread(id: &str) -> Thread {
        Thread::new(id.to_string(), None)
    }

    #[tokio::test]
    async fn subscriber_gets_recovery_event_first() {
        let hub = ThreadEventHub::new();
        let mut t = thread("t1");
        t.completed_steps.push("a".to_string());
        t.session_ids.insert("a".to_string(), "s-1".to_string());

        let mut sub = hub.subscribe(&t);
        hub.publish(ThreadEvent::WorkflowComplete {
            thread_id: "t1".to_string(),
            status: ThreadStatus::Completed,
            timestamp: Utc::now(),
        });

        match sub.next().await.unwrap() {
            ThreadEvent::Recovery {
                completed_steps, ..
            } => assert_eq!(completed_steps, vec!["a"]),
            other => panic!("expected recovery first, got {other:?}"),
        }
        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::WorkflowComplete { .. }
        ));
    }

    #[tokio::test]
    async fn topics_are_isolated_per_thread() {
        let hub = ThreadEventHub::new();
        let mut sub_one = hub.subscribe(&thread("t1"));
        let mut sub_two = hub.subscribe(&thread("t2"));

        hub.publish(ThreadEvent::StepStart {
            thread_id: "t2".to_string(),
            step_id: "a".to_string(),
            session_id: "s-1".to_string(),
            timestamp: Utc::now(),
        });

        // t1's subscription only holds its recovery event.
        assert!(matches!(
            sub_one.next().await.unwrap(),
            ThreadEvent::Recovery { thread_id, .. } if thread_id == "t1"
        ));
        let _ = sub_two.next().await.unwrap(); // recovery
        assert!(matches!(
            sub_two.next().await.unwrap(),
            ThreadEvent::StepStart { thread_id, .. } if thread_id == "t2"
        ));
    }

    #[tokio::test]
    async fn removed_topic_ends_the_stream() {
        let hub = ThreadEventHub::new();
        let mut sub = hub.subscribe(&thread("t1"));
        let _ = sub.next().await; // recovery
        hub.remove("t1");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_a_noop() {
        let hub = ThreadEventHub::new();
        hub.publish(ThreadEvent::Error {
            thread_id: "t1".to_string(),
            step_id: None,
            message: "boom".to_string(),
            timestamp: Utc::now(),
        });
        // Late subscriber sees only its recovery event.
        let mut sub = hub.subscribe(&thread("t1"));
        assert!(matches!(
            sub.next().await.unwrap(),
            ThreadEvent::Recovery { .. }
        ));
    }
}
