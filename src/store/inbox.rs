// ABOUTME: Durable inbox for operator requests handed from the CLI to the daemon.
// ABOUTME: One record per request, keyed so key order is submission order.

use chrono::Utc;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::atomic::{AtomicU32, Ordering};

use super::{Collection, Store, StoreError};

static SEQUENCE: AtomicU32 = AtomicU32::new(0);

#[derive(Debug, Clone)]
pub struct Inbox {
    store: Store,
}

impl Inbox {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Queue a request. Returns its key.
    pub fn submit<T: Serialize>(&self, request: &T) -> Result<String, StoreError> {
        let key = format!(
            "{}-{:010}-{:06}",
            Utc::now().format("%Y%m%dT%H%M%S%9f"),
            std::process::id(),
            SEQUENCE.fetch_add(1, Ordering::Relaxed)
        );
        self.store.put(Collection::Inbox, &key, request)?;
        Ok(key)
    }

    /// Pending requests, oldest first. Unreadable entries are dropped with
    /// a warning so they cannot wedge the queue.
    pub fn pending<T: DeserializeOwned>(&self) -> Result<Vec<(String, T)>, StoreError> {
        let mut requests = Vec::new();
        for key in self.store.keys(Collection::Inbox)? {
            match self.store.get(Collection::Inbox, &key) {
                Ok(Some(request)) => requests.push((key, request)),
                Ok(None) => {}
                Err(e @ StoreError::Decode { .. }) => {
                    tracing::warn!("dropping unreadable request: {}", e);
                    self.store.remove(Collection::Inbox, &key)?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(requests)
    }

    /// Remove a processed request.
    pub fn ack(&self, key: &str) -> Result<(), StoreError> {
        self.store.remove(Collection::Inbox, key)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    enum Request {
        Approve(String),
        Reject(String),
    }

    #[test]
    fn requests_come_back_in_submission_order() {
        let inbox = Inbox::new(Store::memory());
        inbox.submit(&Request::Approve("run-1".into())).unwrap();
        inbox.submit(&Request::Reject("run-2".into())).unwrap();

        let pending: Vec<(String, Request)> = inbox.pending().unwrap();
        let requests: Vec<_> = pending.iter().map(|(_, r)| r).collect();
        assert_eq!(
            requests,
            vec![
                &Request::Approve("run-1".into()),
                &Request::Reject("run-2".into())
            ]
        );

        inbox.ack(&pending[0].0).unwrap();
        assert_eq!(inbox.pending::<Request>().unwrap().len(), 1);
    }

    #[test]
    fn unreadable_requests_are_dropped() {
        let store = Store::memory();
        store.put(Collection::Inbox, "0-bad", &42).unwrap();
        let inbox = Inbox::new(store.clone());
        inbox.submit(&Request::Approve("run-1".into())).unwrap();

        let pending: Vec<(String, Request)> = inbox.pending().unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(store.keys(Collection::Inbox).unwrap().len(), 1);
    }
}
