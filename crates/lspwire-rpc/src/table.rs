use std::collections::HashMap;

use lspwire_frame::{Id, ResponseError};
use serde_json::Value;
use tokio::sync::oneshot;

use crate::config::IdFormat;
use crate::error::{Result, RpcError};

/// What the dispatch loop hands back to a waiting caller.
pub(crate) type Reply = std::result::Result<Value, ResponseError>;

#[derive(Debug)]
struct PendingCall {
    method: String,
    reply: oneshot::Sender<Reply>,
}

/// In-flight calls keyed by request id.
///
/// Entries leave the table exactly once: on a matching response, when the
/// owning caller gives up, or when the table is closed. Closing drops every
/// sender, which the waiting receivers observe as connection closure.
#[derive(Debug)]
pub(crate) struct CorrelationTable {
    next_id: i64,
    pending: HashMap<Id, PendingCall>,
    closed: bool,
}

impl Default for CorrelationTable {
    fn default() -> Self {
        Self {
            next_id: 1,
            pending: HashMap::new(),
            closed: false,
        }
    }
}

impl CorrelationTable {
    /// Allocate a fresh id and register a pending call under it.
    pub(crate) fn register(
        &mut self,
        method: &str,
        format: IdFormat,
    ) -> Result<(Id, oneshot::Receiver<Reply>)> {
        if self.closed {
            return Err(RpcError::ConnectionClosed);
        }

        // Skip ids a caller somehow still holds; counter wrap is not a practical concern.
        let id = loop {
            let candidate = format.make(self.next_id);
            self.next_id += 1;
            if !self.pending.contains_key(&candidate) {
                break candidate;
            }
        };

        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingCall {
                method: method.to_string(),
                reply: tx,
            },
        );
        Ok((id, rx))
    }

    /// Deliver a reply to the caller registered under `id`.
    ///
    /// Returns `false` when no such call is pending.
    pub(crate) fn complete(&mut self, id: &Id, reply: Reply) -> bool {
        let Some(call) = self.pending.remove(id) else {
            return false;
        };
        if call.reply.send(reply).is_err() {
            tracing::debug!(method = %call.method, %id, "caller went away before its reply arrived");
        }
        true
    }

    /// Drop the entry for `id` without delivering anything.
    pub(crate) fn remove(&mut self, id: &Id) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Mark the table closed and release every pending caller.
    ///
    /// Returns how many calls were still waiting.
    pub(crate) fn close(&mut self) -> usize {
        self.closed = true;
        let abandoned = self.pending.len();
        for (id, call) in self.pending.drain() {
            tracing::debug!(method = %call.method, %id, "resolving pending call on close");
        }
        abandoned
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tokio::sync::oneshot::error::TryRecvError;

    use super::*;

    #[test]
    fn ids_are_unique_and_monotonic() {
        let mut table = CorrelationTable::default();
        let (a, _ra) = table.register("a", IdFormat::Number).unwrap();
        let (b, _rb) = table.register("b", IdFormat::Number).unwrap();
        let (c, _rc) = table.register("c", IdFormat::String).unwrap();

        assert_eq!(a, Id::Number(1));
        assert_eq!(b, Id::Number(2));
        assert_eq!(c, Id::String("3".to_string()));
        assert_eq!(table.len(), 3);
    }

    #[test]
    fn complete_delivers_once() {
        let mut table = CorrelationTable::default();
        let (id, mut rx) = table.register("initialize", IdFormat::Number).unwrap();

        assert!(table.complete(&id, Ok(json!({"capabilities": {}}))));
        assert!(!table.complete(&id, Ok(json!(null))));
        assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"capabilities": {}}));
        assert_eq!(table.len(), 0);
    }

    #[test]
    fn unknown_id_is_not_matched() {
        let mut table = CorrelationTable::default();
        assert!(!table.complete(&Id::Number(99), Ok(json!(1))));
    }

    #[test]
    fn remove_only_touches_own_entry() {
        let mut table = CorrelationTable::default();
        let (first, _r1) = table.register("a", IdFormat::Number).unwrap();
        let (second, mut r2) = table.register("b", IdFormat::Number).unwrap();

        assert!(table.remove(&first));
        assert!(!table.remove(&first));
        assert_eq!(table.len(), 1);
        assert!(matches!(r2.try_recv(), Err(TryRecvError::Empty)));
        assert!(table.complete(&second, Ok(json!(2))));
    }

    #[test]
    fn close_releases_waiters_and_blocks_registration() {
        let mut table = CorrelationTable::default();
        let (_id, mut rx) = table.register("a", IdFormat::Number).unwrap();

        assert_eq!(table.close(), 1);
        assert!(table.is_closed());
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Closed)));
        assert!(matches!(
            table.register("b", IdFormat::Number),
            Err(RpcError::ConnectionClosed)
        ));
    }
}
