//! Message-at-a-time dispatch into the orchestrator

use crate::crawler::{Orchestrator, RunReport};
use crate::queue::message::{decode_request, CrawlRequest};
use crate::{HarvestError, Result};
use std::fmt;

/// A message handed out by a queue, settled exactly once
pub trait Delivery {
    fn payload(&self) -> &[u8];

    /// Confirms the message was processed
    fn ack(self) -> Result<()>;

    /// Gives the message back; with `requeue` false it is dropped
    fn nack(self, requeue: bool) -> Result<()>;
}

/// Anything that hands out deliveries one at a time
pub trait MessageSource {
    type Delivery: Delivery;

    /// Returns the next delivery, or `None` when the source is drained
    fn next_delivery(&mut self) -> Result<Option<Self::Delivery>>;
}

/// Runs one routed request
pub trait CrawlHandler {
    fn handle(&self, request: &CrawlRequest) -> Result<RunReport>;
}

impl<H: CrawlHandler + ?Sized> CrawlHandler for &H {
    fn handle(&self, request: &CrawlRequest) -> Result<RunReport> {
        (**self).handle(request)
    }
}

impl CrawlHandler for Orchestrator<'_> {
    fn handle(&self, request: &CrawlRequest) -> Result<RunReport> {
        match request {
            CrawlRequest::ParentId(id) => self.run_for_parent_id(id),
            CrawlRequest::ParentKey(key) => self.run_for_parent_key(key),
            CrawlRequest::ChildId(id) => self.run_for_child_id(id),
            CrawlRequest::ChildLocator(locator) => self.run_for_child_locator(locator),
        }
    }
}

/// How a delivery was settled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Acked,
    /// Malformed or permanently failing; nacked without requeue
    Rejected,
    /// Failed in a way a later attempt may fix; nacked with requeue
    Requeued,
}

/// Totals across one `consume` call
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ConsumeSummary {
    pub acked: usize,
    pub rejected: usize,
    pub requeued: usize,
    /// True if consumption stopped because every credential was spent
    pub stopped_exhausted: bool,
    pub report: RunReport,
}

impl fmt::Display for ConsumeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Messages: {} acked, {} rejected, {} requeued",
            self.acked, self.rejected, self.requeued
        )?;
        if self.stopped_exhausted {
            writeln!(f, "Stopped early: credentials exhausted")?;
        }
        write!(f, "{}", self.report)
    }
}

/// Feeds queue messages to a handler, acknowledging only after success
pub struct QueueDispatcher<H> {
    handler: H,
}

impl<H: CrawlHandler> QueueDispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Processes one delivery and settles it
    ///
    /// A run that finished but left records failing transiently is requeued
    /// with its report, so a redelivery retries those records.
    ///
    /// # Returns
    ///
    /// * `Ok((Disposition, outcome))` - How the delivery was settled, with the
    ///   report of the run or the error that settled it
    /// * `Err(HarvestError)` - The delivery itself could not be settled
    pub fn dispatch<D: Delivery>(
        &self,
        delivery: D,
    ) -> Result<(Disposition, std::result::Result<RunReport, HarvestError>)> {
        let request = match decode_request(delivery.payload()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Dropping malformed message");
                delivery.nack(false)?;
                return Ok((Disposition::Rejected, Err(e)));
            }
        };

        tracing::info!(request = %request, "Dispatching message");
        match self.handler.handle(&request) {
            Ok(report) if report.has_retryable_errors() => {
                let failed: Vec<String> = report
                    .entity_errors
                    .iter()
                    .filter(|e| e.retryable)
                    .map(|e| e.external_id.clone())
                    .collect();
                tracing::warn!(
                    request = %request,
                    failed = ?failed,
                    "Records failed transiently, requeueing"
                );
                delivery.nack(true)?;
                Ok((Disposition::Requeued, Ok(report)))
            }
            Ok(report) => {
                delivery.ack()?;
                Ok((Disposition::Acked, Ok(report)))
            }
            Err(e) if e.is_resumable() => {
                tracing::warn!(request = %request, error = %e, "Message failed, requeueing");
                delivery.nack(true)?;
                Ok((Disposition::Requeued, Err(e)))
            }
            Err(e) => {
                tracing::warn!(request = %request, error = %e, "Message failed permanently, dropping");
                delivery.nack(false)?;
                Ok((Disposition::Rejected, Err(e)))
            }
        }
    }

    /// Dispatches deliveries until the source is drained
    ///
    /// Stops early once a message fails on exhausted credentials; that message
    /// is requeued and the rest stay in the source.
    pub fn consume<S: MessageSource>(&self, source: &mut S) -> Result<ConsumeSummary> {
        let mut summary = ConsumeSummary::default();

        while let Some(delivery) = source.next_delivery()? {
            let (disposition, outcome) = self.dispatch(delivery)?;
            match disposition {
                Disposition::Acked => summary.acked += 1,
                Disposition::Rejected => summary.rejected += 1,
                Disposition::Requeued => summary.requeued += 1,
            }
            match outcome {
                Ok(report) => summary.report.absorb(report),
                Err(HarvestError::CredentialsExhausted { operation }) => {
                    tracing::warn!(operation, "Credentials exhausted, stopping consumer");
                    summary.stopped_exhausted = true;
                    break;
                }
                Err(_) => {}
            }
        }

        tracing::info!(
            acked = summary.acked,
            rejected = summary.rejected,
            requeued = summary.requeued,
            "Consumer finished"
        );
        Ok(summary)
    }
}
