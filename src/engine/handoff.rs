//! Single-slot inbound hand-off.
//!
//! The read loop [`push`](Handoff::push)es one message frame at a time and
//! blocks until the consumer has taken it *and* finished reading it. The
//! consumer [`take`](HandoffReceiver::take)s a [`ConnReader`]; dropping the
//! reader is the "done" signal. At most one undelivered message exists, so a
//! slow consumer stalls inbound delivery instead of dropping frames.

// ============================================================================
// Imports
// ============================================================================

use std::io::{self, Read};

use tokio::sync::{Mutex, mpsc, oneshot};

use crate::error::{Error, Result};
use crate::transport::{Frame, MessageType};

// ============================================================================
// Types
// ============================================================================

/// A frame in flight plus the consumer's completion signal.
struct Delivery {
    frame: Frame,
    done: oneshot::Sender<()>,
}

/// Creates a connected hand-off pair.
pub(crate) fn channel() -> (Handoff, HandoffReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (Handoff { tx }, HandoffReceiver { rx: Mutex::new(rx) })
}

// ============================================================================
// Handoff
// ============================================================================

/// Producer side, owned by the read loop.
///
/// Dropping it ends the stream: waiting and future consumers get
/// [`Error::EndOfStream`].
pub(crate) struct Handoff {
    tx: mpsc::Sender<Delivery>,
}

impl Handoff {
    /// Hands `frame` to the consumer and waits until it has been read.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndOfStream`] if the receiver is gone.
    pub(crate) async fn push(&self, frame: Frame) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.tx
            .send(Delivery { frame, done })
            .await
            .map_err(|_| Error::EndOfStream)?;

        // Either an explicit signal or the reader being dropped
        let _ = finished.await;
        Ok(())
    }
}

// ============================================================================
// HandoffReceiver
// ============================================================================

/// Consumer side, owned by the connection.
pub(crate) struct HandoffReceiver {
    rx: Mutex<mpsc::Receiver<Delivery>>,
}

impl HandoffReceiver {
    /// Waits for the next message frame.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EndOfStream`] once the producer is gone.
    pub(crate) async fn take(&self) -> Result<ConnReader> {
        let delivery = self.rx.lock().await.recv().await.ok_or(Error::EndOfStream)?;
        Ok(ConnReader {
            message_type: delivery.frame.message_type,
            data: delivery.frame.data,
            position: 0,
            done: Some(delivery.done),
        })
    }
}

// ============================================================================
// ConnReader
// ============================================================================

/// One inbound message, borrowed from the read loop.
///
/// The read loop stays blocked until this reader is closed or dropped.
#[derive(Debug)]
pub struct ConnReader {
    message_type: MessageType,
    data: Vec<u8>,
    position: usize,
    done: Option<oneshot::Sender<()>>,
}

impl ConnReader {
    /// Returns the payload encoding.
    #[inline]
    #[must_use]
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// Returns the whole payload regardless of the read position.
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Returns the number of bytes not yet read through [`Read`].
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    /// Releases the read loop.
    pub fn close(mut self) {
        self.signal_done();
    }

    fn signal_done(&mut self) {
        if let Some(done) = self.done.take() {
            let _ = done.send(());
        }
    }
}

impl AsRef<[u8]> for ConnReader {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Read for ConnReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rest = &self.data[self.position..];
        let n = rest.read(buf)?;
        self.position += n;
        Ok(n)
    }
}

impl Drop for ConnReader {
    fn drop(&mut self) {
        self.signal_done();
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use std::time::Duration;

    use tokio::time::timeout;

    use crate::transport::FrameKind;

    #[tokio::test]
    async fn test_push_blocks_until_reader_dropped() {
        let (handoff, receiver) = channel();

        let producer = tokio::spawn(async move {
            handoff
                .push(Frame::message(MessageType::Text, "hello"))
                .await
        });

        let mut reader = receiver.take().await.expect("frame");
        let mut text = String::new();
        reader.read_to_string(&mut text).expect("read");
        assert_eq!(text, "hello");
        assert_eq!(reader.remaining(), 0);

        tokio::task::yield_now().await;
        assert!(!producer.is_finished());

        drop(reader);
        let result = timeout(Duration::from_secs(1), producer)
            .await
            .expect("producer released")
            .expect("join");
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_single_slot() {
        let (handoff, receiver) = channel();

        let producer = tokio::spawn(async move {
            for n in 0..2 {
                handoff
                    .push(Frame::new(FrameKind::Message, n.to_string()))
                    .await?;
            }
            Ok::<_, Error>(())
        });

        let first = receiver.take().await.expect("first");
        assert_eq!(first.as_bytes(), b"0");

        // Second frame cannot be delivered while the first is held
        assert!(
            timeout(Duration::from_millis(50), receiver.take())
                .await
                .is_err()
        );

        first.close();
        let second = receiver.take().await.expect("second");
        assert_eq!(second.as_bytes(), b"1");
        drop(second);

        producer.await.expect("join").expect("pushed both");
    }

    #[tokio::test]
    async fn test_dropped_producer_ends_stream() {
        let (handoff, receiver) = channel();
        drop(handoff);
        assert!(matches!(receiver.take().await, Err(Error::EndOfStream)));
    }
}
