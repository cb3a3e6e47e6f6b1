//! Pending-request table
//!
//! Maps correlation ids to one-shot continuations. Every entry is removed
//! exactly once: by its matching response, by a per-call timeout discard, or
//! by a process-wide fan-out failure. Once the table is closed (the channel
//! terminated), late registrations complete immediately with the closing
//! error instead of leaking.

use std::collections::HashMap;
use std::sync::Mutex;

use serde_json::Value as JsonValue;
use tokio::sync::oneshot;

use crate::error::ChannelError;

pub(crate) type CallResult = Result<JsonValue, ChannelError>;

#[derive(Default)]
pub(crate) struct PendingTable {
    state: Mutex<TableState>,
}

#[derive(Default)]
struct TableState {
    entries: HashMap<String, oneshot::Sender<CallResult>>,
    closed: Option<ChannelError>,
}

impl PendingTable {
    /// Arm a continuation for `id` and return its receiver.
    ///
    /// Must be called before the request is transmitted so a fast reply
    /// cannot arrive ahead of the waiting caller.
    pub fn register(&self, id: String) -> oneshot::Receiver<CallResult> {
        let (tx, rx) = oneshot::channel();
        let mut state = self.state.lock().expect("pending table lock poisoned");

        if let Some(error) = &state.closed {
            let _ = tx.send(Err(error.clone()));
            return rx;
        }

        let previous = state.entries.insert(id, tx);
        debug_assert!(previous.is_none(), "correlation id reused while pending");
        rx
    }

    /// Fire the continuation registered for `id`. Returns `false` when no
    /// entry matches (late or spurious response).
    pub fn complete(&self, id: &str, result: CallResult) -> bool {
        let sender = {
            let mut state = self.state.lock().expect("pending table lock poisoned");
            state.entries.remove(id)
        };
        match sender {
            Some(tx) => {
                let _ = tx.send(result);
                true
            }
            None => false,
        }
    }

    /// Drop the entry for `id` without firing it (per-call timeout).
    pub fn discard(&self, id: &str) {
        let mut state = self.state.lock().expect("pending table lock poisoned");
        state.entries.remove(id);
    }

    /// Reject every pending call with `error` and close the table.
    ///
    /// The first closing error sticks; later calls only drain entries that
    /// slipped in between.
    pub fn fail_all(&self, error: ChannelError) {
        let drained: Vec<_> = {
            let mut state = self.state.lock().expect("pending table lock poisoned");
            if state.closed.is_none() {
                state.closed = Some(error.clone());
            }
            state.entries.drain().collect()
        };
        for (_, tx) in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .expect("pending table lock poisoned")
            .entries
            .len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_responses_route_by_id_in_any_order() {
        let table = PendingTable::default();

        let receivers: Vec<_> = (1..=5)
            .map(|n| (n, table.register(n.to_string())))
            .collect();
        assert_eq!(table.len(), 5);

        // Complete in reverse arrival order
        for n in (1..=5).rev() {
            assert!(table.complete(&n.to_string(), Ok(json!(n * 10))));
        }

        for (n, rx) in receivers {
            assert_eq!(rx.await.unwrap().unwrap(), json!(n * 10));
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_unmatched_response_is_reported() {
        let table = PendingTable::default();
        let _rx = table.register("1".to_string());

        assert!(!table.complete("99", Ok(json!(null))));
        assert_eq!(table.len(), 1);
    }

    #[tokio::test]
    async fn test_entry_fires_at_most_once() {
        let table = PendingTable::default();
        let rx = table.register("1".to_string());

        assert!(table.complete("1", Ok(json!(5))));
        assert!(!table.complete("1", Ok(json!(6))));

        assert_eq!(rx.await.unwrap().unwrap(), json!(5));
    }

    #[tokio::test]
    async fn test_fail_all_rejects_everything_and_empties_table() {
        let table = PendingTable::default();
        let rx1 = table.register("1".to_string());
        let rx2 = table.register("2".to_string());
        let rx3 = table.register("3".to_string());

        table.fail_all(ChannelError::ProcessExited { code: Some(1) });

        for rx in [rx1, rx2, rx3] {
            let result = rx.await.unwrap();
            assert!(matches!(
                result,
                Err(ChannelError::ProcessExited { code: Some(1) })
            ));
        }
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_registration_after_close_fails_immediately() {
        let table = PendingTable::default();
        table.fail_all(ChannelError::Terminated);

        let rx = table.register("1".to_string());
        assert!(matches!(rx.await.unwrap(), Err(ChannelError::Terminated)));
        assert_eq!(table.len(), 0);
    }

    #[tokio::test]
    async fn test_first_closing_error_sticks() {
        let table = PendingTable::default();
        table.fail_all(ChannelError::ProcessExited { code: None });
        table.fail_all(ChannelError::Terminated);

        let rx = table.register("1".to_string());
        assert!(matches!(
            rx.await.unwrap(),
            Err(ChannelError::ProcessExited { code: None })
        ));
    }

    #[tokio::test]
    async fn test_discard_drops_without_firing() {
        let table = PendingTable::default();
        let rx = table.register("1".to_string());

        table.discard("1");
        assert_eq!(table.len(), 0);

        // Sender dropped without a value
        assert!(rx.await.is_err());
    }
}
