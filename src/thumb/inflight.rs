/// Per-key load deduplication plus a global decode gate
///
/// The first caller for a key becomes its Leader and holds a `Ticket`. Later
/// callers for the same key become Followers and wait for the Leader's
/// outcome instead of repeating the work. Dropping a `Ticket` always clears
/// the key's marker, so an error or panic in the Leader cannot strand
/// Followers.
///
/// Leaders additionally take a permit from a counting semaphore before doing
/// any decode or disk work. Permits are awaited, never refused.
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};

use super::bitmap::DecodedThumbnail;
use super::key::CacheKey;

/// What a Leader publishes to its Followers
#[derive(Debug, Clone)]
pub enum LoadOutcome {
    Loaded(Arc<DecodedThumbnail>),
    Failed,
}

type Slot = watch::Receiver<Option<LoadOutcome>>;
type Tickets = Arc<Mutex<HashMap<CacheKey, Slot>>>;

#[derive(Debug)]
pub struct InFlight {
    tickets: Tickets,
    permits: Arc<Semaphore>,
    limit: usize,
}

/// Role handed out by [`InFlight::begin`]
#[derive(Debug)]
pub enum Admission {
    Leader(Ticket),
    Follower(Waiter),
}

impl InFlight {
    pub fn new(max_concurrent: usize) -> Self {
        let limit = max_concurrent.max(1);
        Self {
            tickets: Arc::new(Mutex::new(HashMap::new())),
            permits: Arc::new(Semaphore::new(limit)),
            limit,
        }
    }

    /// Join the load already running for `key`, or start leading a new one
    pub fn begin(&self, key: CacheKey) -> Admission {
        let mut tickets = self.tickets.lock();
        if let Some(slot) = tickets.get(&key) {
            tracing::debug!("Joining in-flight load for {}", key);
            return Admission::Follower(Waiter { rx: slot.clone() });
        }

        let (tx, rx) = watch::channel(None);
        tickets.insert(key, rx);
        Admission::Leader(Ticket {
            key,
            tx,
            tickets: Arc::clone(&self.tickets),
            permits: Arc::clone(&self.permits),
        })
    }

    /// Keys with a Leader right now
    pub fn in_flight(&self) -> usize {
        self.tickets.lock().len()
    }

    pub fn available_permits(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Held by the Leader of a key for the duration of its load
#[derive(Debug)]
pub struct Ticket {
    key: CacheKey,
    tx: watch::Sender<Option<LoadOutcome>>,
    tickets: Tickets,
    permits: Arc<Semaphore>,
}

impl Ticket {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Wait for a decode slot. `None` only if the gate was shut down.
    pub async fn admit(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Publish the result to Followers and release the key
    pub fn finish(self, outcome: LoadOutcome) {
        self.tx.send_replace(Some(outcome));
    }
}

impl Drop for Ticket {
    fn drop(&mut self) {
        // The sender drops right after this, waking any Follower still waiting.
        self.tickets.lock().remove(&self.key);
    }
}

/// Held by a Follower until the Leader is done
#[derive(Debug)]
pub struct Waiter {
    rx: Slot,
}

impl Waiter {
    /// The Leader's outcome, or `None` if it went away without publishing one
    pub async fn wait(mut self) -> Option<LoadOutcome> {
        match self.rx.wait_for(Option::is_some).await {
            Ok(outcome) => outcome.clone(),
            Err(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thumb::decoder::ResourceHandle;
    use image::RgbImage;
    use std::time::Duration;

    fn key(name: &str) -> CacheKey {
        CacheKey::derive(&ResourceHandle::new(name), 64, 64)
    }

    #[test]
    fn test_one_leader_per_key() {
        let inflight = InFlight::new(4);

        let first = inflight.begin(key("a"));
        let second = inflight.begin(key("a"));
        let other = inflight.begin(key("b"));

        assert!(matches!(first, Admission::Leader(_)));
        assert!(matches!(second, Admission::Follower(_)));
        assert!(matches!(other, Admission::Leader(_)));
        assert_eq!(inflight.in_flight(), 2);

        drop(first);
        assert_eq!(inflight.in_flight(), 1);
        assert!(matches!(inflight.begin(key("a")), Admission::Leader(_)));
    }

    #[tokio::test]
    async fn test_follower_sees_leader_outcome() {
        let inflight = InFlight::new(4);
        let Admission::Leader(ticket) = inflight.begin(key("a")) else {
            panic!("expected leader");
        };
        let Admission::Follower(waiter) = inflight.begin(key("a")) else {
            panic!("expected follower");
        };

        let follower = tokio::spawn(waiter.wait());
        let thumb = Arc::new(DecodedThumbnail::from_rgb(RgbImage::new(2, 2)));
        ticket.finish(LoadOutcome::Loaded(Arc::clone(&thumb)));

        match follower.await.unwrap() {
            Some(LoadOutcome::Loaded(got)) => assert!(Arc::ptr_eq(&got, &thumb)),
            other => panic!("unexpected outcome: {:?}", other),
        }
        assert_eq!(inflight.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_abandoned_ticket_releases_followers() {
        let inflight = InFlight::new(4);
        let Admission::Leader(ticket) = inflight.begin(key("a")) else {
            panic!("expected leader");
        };
        let Admission::Follower(waiter) = inflight.begin(key("a")) else {
            panic!("expected follower");
        };

        // Simulate a Leader bailing out on an error path.
        let leader = tokio::spawn(async move {
            let _ticket = ticket;
            Err::<(), &str>("decode blew up")
        });
        assert!(leader.await.unwrap().is_err());

        let outcome = tokio::time::timeout(Duration::from_secs(5), waiter.wait())
            .await
            .expect("follower must not hang");
        assert!(outcome.is_none());
        assert!(matches!(inflight.begin(key("a")), Admission::Leader(_)));
    }

    #[tokio::test]
    async fn test_admission_gate_blocks_past_limit() {
        let inflight = InFlight::new(2);
        let tickets: Vec<Ticket> = ["a", "b", "c"]
            .iter()
            .map(|name| match inflight.begin(key(name)) {
                Admission::Leader(ticket) => ticket,
                Admission::Follower(_) => panic!("distinct keys must lead"),
            })
            .collect();

        let first = tickets[0].admit().await.unwrap();
        let _second = tickets[1].admit().await.unwrap();
        assert_eq!(inflight.available_permits(), 0);

        let blocked = tokio::time::timeout(Duration::from_millis(50), tickets[2].admit()).await;
        assert!(blocked.is_err());

        drop(first);
        let third = tokio::time::timeout(Duration::from_secs(5), tickets[2].admit()).await;
        assert!(third.unwrap().is_some());
    }
}
