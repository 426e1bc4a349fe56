//! Newline-delimited JSON queue over any reader
//!
//! Each non-blank line is one message. Requeued messages go to the back of
//! the queue and are handed out again once the reader is drained, until they
//! have been delivered `max_redeliveries + 1` times.

use crate::queue::dispatcher::{Delivery, MessageSource};
use crate::Result;
use std::io::BufRead;
use std::sync::mpsc::{self, Receiver, Sender};

/// A message returned for another attempt
struct Redelivery {
    payload: String,
    deliveries: u32,
}

/// Queue reading one message per line
pub struct LineQueue<R> {
    reader: R,
    line_number: usize,
    max_redeliveries: u32,
    requeue_tx: Sender<Redelivery>,
    requeue_rx: Receiver<Redelivery>,
}

impl<R: BufRead> LineQueue<R> {
    pub fn new(reader: R, max_redeliveries: u32) -> Self {
        let (requeue_tx, requeue_rx) = mpsc::channel();
        Self {
            reader,
            line_number: 0,
            max_redeliveries,
            requeue_tx,
            requeue_rx,
        }
    }

    fn delivery(&self, payload: String, deliveries: u32) -> LineDelivery {
        LineDelivery {
            payload,
            deliveries,
            max_redeliveries: self.max_redeliveries,
            requeue: self.requeue_tx.clone(),
        }
    }
}

impl<R: BufRead> MessageSource for LineQueue<R> {
    type Delivery = LineDelivery;

    fn next_delivery(&mut self) -> Result<Option<LineDelivery>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                break;
            }
            self.line_number += 1;
            let payload = line.trim();
            if !payload.is_empty() {
                tracing::trace!(line = self.line_number, "Read message");
                return Ok(Some(self.delivery(payload.to_string(), 1)));
            }
        }

        Ok(self
            .requeue_rx
            .try_recv()
            .ok()
            .map(|r| self.delivery(r.payload, r.deliveries + 1)))
    }
}

/// One line handed out by a [`LineQueue`]
#[derive(Debug)]
pub struct LineDelivery {
    payload: String,
    deliveries: u32,
    max_redeliveries: u32,
    requeue: Sender<Redelivery>,
}

impl LineDelivery {
    /// How many times this message has been handed out, counting this one
    pub fn deliveries(&self) -> u32 {
        self.deliveries
    }
}

impl Delivery for LineDelivery {
    fn payload(&self) -> &[u8] {
        self.payload.as_bytes()
    }

    fn ack(self) -> Result<()> {
        tracing::debug!(deliveries = self.deliveries, "Message acked");
        Ok(())
    }

    fn nack(self, requeue: bool) -> Result<()> {
        if !requeue {
            return Ok(());
        }
        if self.deliveries > self.max_redeliveries {
            tracing::warn!(
                deliveries = self.deliveries,
                payload = %self.payload,
                "Redelivery limit reached, dropping message"
            );
            return Ok(());
        }
        // The queue owns the receiver for as long as deliveries exist
        let _ = self.requeue.send(Redelivery {
            payload: self.payload,
            deliveries: self.deliveries,
        });
        Ok(())
    }
}
