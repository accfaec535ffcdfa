//! Sequence-numbered command sending and reply correlation.
//!
//! Every command gets the next sequence number. Commands sent with a reply
//! handler register `(seq, handler)` in the correlation table *before* the
//! bytes hit the socket, so a fast reply can never miss its handler. The
//! first reply carrying that sequence number removes the entry and runs the
//! handler; replies with no entry are dropped.
//!
//! The channel never interprets response codes. Handlers receive the whole
//! [`Reply`] and decide what a non-zero code means.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use sdrlink_core::{Error, Result};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;

use crate::codec::{Reply, encode_command};

/// How long [`CommandChannel::command`] waits for a reply.
pub const REPLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Callback run with the reply to a command.
pub type ReplyHandler = Box<dyn FnOnce(Reply) + Send>;

type Writer = Box<dyn AsyncWrite + Unpin + Send>;

/// Outbound half of a control connection plus its correlation table.
pub struct CommandChannel {
    writer: tokio::sync::Mutex<Option<Writer>>,
    next_seq: AtomicU32,
    pending: Mutex<HashMap<u32, ReplyHandler>>,
    verbose: bool,
}

impl CommandChannel {
    /// Wrap the write half of a control connection.
    ///
    /// With `verbose` set, commands go out as `CD<seq>|...` and the radio
    /// appends a debug field to each reply.
    pub fn new<W>(writer: W, verbose: bool) -> Self
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self {
            writer: tokio::sync::Mutex::new(Some(Box::new(writer))),
            next_seq: AtomicU32::new(1),
            pending: Mutex::new(HashMap::new()),
            verbose,
        }
    }

    /// Allocate a sequence number. Zero is never handed out.
    fn next_sequence(&self) -> u32 {
        loop {
            let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
            if seq != 0 {
                return seq;
            }
        }
    }

    async fn write_command(&self, seq: u32, text: &str) -> Result<()> {
        let line = encode_command(seq, text, self.verbose);
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(Error::NotConnected)?;
        writer
            .write_all(&line)
            .await
            .map_err(|e| Error::Transport(format!("command write failed: {}", e)))?;
        writer
            .flush()
            .await
            .map_err(|e| Error::Transport(format!("command flush failed: {}", e)))?;
        tracing::trace!(seq = seq, command = %text, "Sent command");
        Ok(())
    }

    /// Send a command without waiting for its reply.
    ///
    /// Returns the sequence number, or 0 if nothing could be written.
    pub async fn send_command(&self, text: &str) -> u32 {
        let seq = self.next_sequence();
        match self.write_command(seq, text).await {
            Ok(()) => seq,
            Err(e) => {
                tracing::debug!(seq = seq, command = %text, error = %e, "Command not sent");
                0
            }
        }
    }

    /// Send a command and run `handler` when its reply arrives.
    ///
    /// Returns the sequence number, or 0 if nothing could be written, in
    /// which case the handler is dropped without being called.
    pub async fn send_reply_command(&self, text: &str, handler: ReplyHandler) -> u32 {
        let seq = self.next_sequence();
        self.pending.lock().insert(seq, handler);

        match self.write_command(seq, text).await {
            Ok(()) => seq,
            Err(e) => {
                self.pending.lock().remove(&seq);
                tracing::debug!(seq = seq, command = %text, error = %e, "Command not sent");
                0
            }
        }
    }

    /// Send a command and wait up to [`REPLY_TIMEOUT`] for its reply.
    pub async fn command(&self, text: &str) -> Result<Reply> {
        let (tx, rx) = oneshot::channel();
        let handler: ReplyHandler = Box::new(move |reply| {
            let _ = tx.send(reply);
        });

        let seq = self.send_reply_command(text, handler).await;
        if seq == 0 {
            return Err(Error::NotConnected);
        }

        match tokio::time::timeout(REPLY_TIMEOUT, rx).await {
            Ok(Ok(reply)) => Ok(reply),
            Ok(Err(_)) => Err(Error::ConnectionLost),
            Err(_) => {
                self.forget(seq);
                tracing::debug!(seq = seq, command = %text, "Reply timed out");
                Err(Error::Timeout)
            }
        }
    }

    /// Route a reply to its handler. Returns `false` if nothing was waiting.
    ///
    /// The handler runs after the table lock is released.
    pub fn dispatch_reply(&self, reply: Reply) -> bool {
        let handler = self.pending.lock().remove(&reply.sequence);
        match handler {
            Some(handler) => {
                handler(reply);
                true
            }
            None => {
                tracing::trace!(seq = reply.sequence, code = reply.code, "Reply with no pending command");
                false
            }
        }
    }

    /// Drop the handler for `seq` without running it.
    pub fn forget(&self, seq: u32) -> bool {
        self.pending.lock().remove(&seq).is_some()
    }

    /// Drop every pending handler. Returns how many were abandoned.
    pub fn clear(&self) -> usize {
        let abandoned: Vec<ReplyHandler> = self.pending.lock().drain().map(|(_, h)| h).collect();
        abandoned.len()
    }

    /// Shut down and release the writer. Later sends return 0.
    pub async fn close(&self) {
        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            let _ = writer.shutdown().await;
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, seq: u32) -> bool {
        self.pending.lock().contains_key(&seq)
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    #[cfg(test)]
    pub(crate) fn set_next_sequence(&self, seq: u32) {
        self.next_seq.store(seq, Ordering::Relaxed);
    }
}
