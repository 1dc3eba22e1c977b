//! Multi-frame responses.
//!
//! A streamed operation writes one request and then reads frames until one
//! carries the done flag. The connection stays checked out for the whole
//! stream and its lock is taken per frame. Streams are never retried.

use std::marker::PhantomData;

use tracing::debug;

use kvpb_common::{Message, StreamedMessage};

use crate::client::Client;
use crate::error::{ClientError, ClientResult};
use crate::pool::PooledConnection;
use crate::profile::{timed, Instrumenter, Profile};

/// Lazy iterator over the frames of one streamed response.
///
/// Yields frames in arrival order and ends after the frame marked done or
/// after the first error. Dropping it early discards the connection, since
/// unread frames may still be in flight, and emits the profile with
/// `abandoned` set, so it does not count as a success.
pub struct ResponseStream<Resp> {
    conn: Option<PooledConnection>,
    profile: Option<Profile>,
    sink: Option<Instrumenter>,
    _marker: PhantomData<fn() -> Resp>,
}

impl<Resp> ResponseStream<Resp> {
    /// Returns true once the stream can yield nothing more.
    pub fn is_finished(&self) -> bool {
        self.conn.is_none()
    }

    fn finish(&mut self, error: Option<ClientError>) {
        if let Some(conn) = self.conn.take() {
            if error.is_some() {
                conn.discard();
            } else {
                conn.release();
            }
        }
        if let Some(profile) = self.profile.take() {
            profile.complete(error, self.sink.as_ref());
        }
    }
}

impl<Resp: StreamedMessage> Iterator for ResponseStream<Resp> {
    type Item = ClientResult<Resp>;

    fn next(&mut self) -> Option<Self::Item> {
        let conn = self.conn.as_ref()?;
        let profile = self.profile.as_mut()?;

        let result = {
            let mut guard = timed(&mut profile.lock, || conn.lock());
            timed(&mut profile.response, || guard.response::<Resp>())
        };

        match result {
            Ok(resp) => {
                let resp = resp.unwrap_or_default();
                if resp.is_done() {
                    self.finish(None);
                }
                Some(Ok(resp))
            }
            Err(err) => {
                self.finish(Some(err.clone()));
                Some(Err(err))
            }
        }
    }
}

impl<Resp> Drop for ResponseStream<Resp> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            debug!(slot = conn.id(), "stream dropped before done, discarding connection");
            conn.discard();
        }
        if let Some(profile) = self.profile.take() {
            profile.abandon(self.sink.as_ref());
        }
    }
}

impl Client {
    /// Writes one request and returns the lazy stream of its responses.
    ///
    /// # Errors
    /// Checkout and request errors; later frame errors come through the
    /// iterator.
    pub fn stream<Req, Resp>(&self, op: &str, object: &str, code: u8, req: &Req) -> ClientResult<ResponseStream<Resp>>
    where
        Req: Message,
        Resp: StreamedMessage,
    {
        let settings = self.settings();
        let sink = self.sink();
        let mut profile = Profile::new(op, object);

        let conn = match self.checkout(&mut profile) {
            Ok(conn) => conn,
            Err(err) => {
                profile.complete(Some(err.clone()), sink.as_ref());
                return Err(err);
            }
        };

        let sent = {
            let mut guard = timed(&mut profile.lock, || conn.lock());
            settings.apply(&mut guard);
            timed(&mut profile.request, || guard.request(code, req))
        };
        if let Err(err) = sent {
            conn.discard();
            profile.complete(Some(err.clone()), sink.as_ref());
            return Err(err);
        }

        Ok(ResponseStream {
            conn: Some(conn),
            profile: Some(profile),
            sink,
            _marker: PhantomData,
        })
    }

    /// Collects a streamed response; returns the first error if any.
    pub fn execute_streaming<Req, Resp>(&self, op: &str, object: &str, code: u8, req: &Req) -> ClientResult<Vec<Resp>>
    where
        Req: Message,
        Resp: StreamedMessage,
    {
        self.stream(op, object, code, req)?.collect()
    }
}
