use std::sync::{Mutex, PoisonError};

use futures_util::{Stream, StreamExt};
use lspwire_frame::{Envelope, FrameError, Response};
use tokio_util::sync::CancellationToken;

use crate::error::{Result, RpcError};
use crate::table::CorrelationTable;

/// Counters reported when the dispatch loop stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    /// Responses delivered to a waiting caller.
    pub responses: u64,
    /// Responses with no matching pending call.
    pub unmatched: u64,
    /// Peer-initiated requests and notifications.
    pub inbound: u64,
}

/// Read envelopes until the stream ends, fails, or `cancel` fires.
///
/// A clean end of stream (including one that cuts a message short) and
/// cancellation end the loop with `Ok`. Any other framing failure is
/// returned. Tearing down the table is left to the caller.
pub(crate) async fn dispatch<S>(
    mut stream: S,
    table: &Mutex<CorrelationTable>,
    cancel: &CancellationToken,
) -> (DispatchStats, Result<()>)
where
    S: Stream<Item = std::result::Result<Envelope, FrameError>> + Unpin,
{
    let mut stats = DispatchStats::default();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => {
                tracing::debug!("dispatch cancelled");
                return (stats, Ok(()));
            }
            next = stream.next() => next,
        };

        match next {
            None => return (stats, Ok(())),
            Some(Err(FrameError::ConnectionClosed)) => {
                tracing::debug!("peer closed the stream mid-message");
                return (stats, Ok(()));
            }
            Some(Err(err)) => {
                tracing::warn!(error = %err, "framing failure, closing connection");
                return (stats, Err(RpcError::Frame(err)));
            }
            Some(Ok(Envelope::Response(response))) => route(response, table, &mut stats),
            Some(Ok(Envelope::Request(request))) => {
                stats.inbound += 1;
                tracing::debug!(method = %request.method, id = %request.id, "ignoring peer request");
            }
            Some(Ok(Envelope::Notification(note))) => {
                stats.inbound += 1;
                tracing::debug!(method = %note.method, "ignoring peer notification");
            }
        }
    }
}

fn route(response: Response, table: &Mutex<CorrelationTable>, stats: &mut DispatchStats) {
    let Some(id) = response.id else {
        stats.unmatched += 1;
        match response.result {
            Err(error) => tracing::warn!(code = error.code, message = %error.message, "response without id"),
            Ok(_) => tracing::warn!("response without id"),
        }
        return;
    };

    let delivered = table
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .complete(&id, response.result);

    if delivered {
        stats.responses += 1;
        tracing::trace!(%id, "response delivered");
    } else {
        stats.unmatched += 1;
        tracing::warn!(%id, "discarding response with no pending call");
    }
}

#[cfg(test)]
mod tests {
    use futures_util::stream;
    use lspwire_frame::{Id, Notification, Request, ResponseError, METHOD_NOT_FOUND};
    use serde_json::json;

    use super::*;
    use crate::config::IdFormat;

    fn items(
        messages: Vec<std::result::Result<Envelope, FrameError>>,
    ) -> impl Stream<Item = std::result::Result<Envelope, FrameError>> + Unpin {
        stream::iter(messages)
    }

    #[tokio::test]
    async fn routes_out_of_order_responses() {
        let table = Mutex::new(CorrelationTable::default());
        let (first, rx1) = table.lock().unwrap().register("a", IdFormat::String).unwrap();
        let (second, rx2) = table.lock().unwrap().register("b", IdFormat::String).unwrap();

        let input = items(vec![
            Ok(Envelope::from(Response::success(second.clone(), json!("two")))),
            Ok(Envelope::from(Response::success(first.clone(), json!("one")))),
        ]);
        let (stats, result) = dispatch(input, &table, &CancellationToken::new()).await;

        assert!(result.is_ok());
        assert_eq!(stats.responses, 2);
        assert_eq!(rx1.await.unwrap().unwrap(), json!("one"));
        assert_eq!(rx2.await.unwrap().unwrap(), json!("two"));
    }

    #[tokio::test]
    async fn error_response_reaches_caller() {
        let table = Mutex::new(CorrelationTable::default());
        let (id, rx) = table.lock().unwrap().register("nope", IdFormat::Number).unwrap();

        let input = items(vec![Ok(Envelope::from(Response::failure(
            id,
            ResponseError::new(METHOD_NOT_FOUND, "unknown method"),
        )))]);
        let (_, result) = dispatch(input, &table, &CancellationToken::new()).await;

        assert!(result.is_ok());
        let err = rx.await.unwrap().unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND);
    }

    #[tokio::test]
    async fn unmatched_and_inbound_are_counted_not_fatal() {
        let table = Mutex::new(CorrelationTable::default());
        let input = items(vec![
            Ok(Envelope::from(Response::success(Id::Number(42), json!(null)))),
            Ok(Envelope::from(Notification::new("window/logMessage", json!({"message": "hi"})))),
            Ok(Envelope::from(Request::new(1, "workspace/configuration", json!({})))),
            Ok(Envelope::from(Response {
                id: None,
                result: Err(ResponseError::new(-32700, "parse error")),
            })),
        ]);

        let (stats, result) = dispatch(input, &table, &CancellationToken::new()).await;

        assert!(result.is_ok());
        assert_eq!(
            stats,
            DispatchStats {
                responses: 0,
                unmatched: 2,
                inbound: 2,
            }
        );
    }

    #[tokio::test]
    async fn framing_error_stops_the_loop() {
        let table = Mutex::new(CorrelationTable::default());
        let input = items(vec![
            Err(FrameError::MissingContentLength),
            Ok(Envelope::from(Response::success(1, json!(null)))),
        ]);

        let (stats, result) = dispatch(input, &table, &CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(RpcError::Frame(FrameError::MissingContentLength))
        ));
        assert_eq!(stats.unmatched, 0);
    }

    #[tokio::test]
    async fn cut_off_stream_ends_cleanly() {
        let table = Mutex::new(CorrelationTable::default());
        let input = items(vec![Err(FrameError::ConnectionClosed)]);

        let (_, result) = dispatch(input, &table, &CancellationToken::new()).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn cancellation_stops_a_blocked_loop() {
        let table = Mutex::new(CorrelationTable::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (stats, result) = dispatch(stream::pending(), &table, &cancel).await;
        assert!(result.is_ok());
        assert_eq!(stats, DispatchStats::default());
    }
}
