//! Queue consumer boundary
//!
//! Single-entity crawl requests arrive as JSON messages. Each one is decoded,
//! routed to the orchestrator and acknowledged only after it succeeds.
//! Malformed messages are dropped rather than requeued so they cannot loop.

mod dispatcher;
mod line_source;
mod message;

pub use dispatcher::{
    ConsumeSummary, CrawlHandler, Delivery, Disposition, MessageSource, QueueDispatcher,
};
pub use line_source::{LineDelivery, LineQueue};
pub use message::{decode_request, CrawlRequest, MessageBody, QueueMessage};
