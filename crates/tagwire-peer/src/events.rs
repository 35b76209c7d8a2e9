use std::net::SocketAddr;
use std::sync::Arc;

use tracing::warn;

use crate::error::PeerError;

/// Notification delivered to subscribers of a listener or client.
///
/// Client-side events use connection id `0`.
#[derive(Debug)]
pub enum PeerEvent<'a> {
    /// A connection was established.
    Connected { id: u64, peer: SocketAddr },
    /// A frame was decoded, whether or not a handler is registered for it.
    Message { id: u64, tag: u32, payload: &'a [u8] },
    /// A connection's read loop ended.
    Disconnected { id: u64 },
    /// An accept, read, decode or handler failure.
    Exception {
        id: Option<u64>,
        error: &'a PeerError,
    },
}

/// Callback receiving [`PeerEvent`]s.
///
/// Subscribers run inline on the connection's task; long work should be
/// handed off (for example over a channel).
pub type Subscriber = Arc<dyn Fn(&PeerEvent<'_>) + Send + Sync>;

/// Subscribers owned by one listener or client.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    list: Vec<Subscriber>,
}

impl Subscribers {
    pub(crate) fn push(&mut self, subscriber: Subscriber) {
        self.list.push(subscriber);
    }

    pub(crate) fn emit(&self, event: &PeerEvent<'_>) {
        for subscriber in &self.list {
            subscriber(event);
        }
    }

    /// Log and fan out one exception notification.
    pub(crate) fn exception(&self, id: Option<u64>, error: &PeerError) {
        warn!(?id, %error, "peer exception");
        self.emit(&PeerEvent::Exception { id, error });
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn emit_reaches_every_subscriber_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let mut subscribers = Subscribers::default();
        for name in ["first", "second"] {
            let seen = Arc::clone(&seen);
            subscribers.push(Arc::new(move |event: &PeerEvent<'_>| {
                if let PeerEvent::Message { tag, .. } = event {
                    seen.lock().expect("lock should not be poisoned").push((name, *tag));
                }
            }));
        }

        subscribers.emit(&PeerEvent::Message {
            id: 1,
            tag: 9,
            payload: b"x",
        });

        assert_eq!(
            *seen.lock().expect("lock should not be poisoned"),
            vec![("first", 9), ("second", 9)]
        );
    }

    #[test]
    fn exception_carries_error() {
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut subscribers = Subscribers::default();
        let sink = Arc::clone(&hits);
        subscribers.push(Arc::new(move |event: &PeerEvent<'_>| {
            if let PeerEvent::Exception { id, error } = event {
                sink.lock()
                    .expect("lock should not be poisoned")
                    .push((*id, error.to_string()));
            }
        }));

        subscribers.exception(Some(4), &PeerError::UnknownConnection(4));

        let hits = hits.lock().expect("lock should not be poisoned");
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, Some(4));
        assert!(hits[0].1.contains("4"));
    }
}
