//! Integration tests for Quota-Harvest
//!
//! Pipeline and queue tests run the orchestrator over a temporary SQLite
//! database and a `ScriptedSource`. The YouTube client tests use wiremock
//! to check the HTTP mapping end-to-end.

mod common;
mod pipeline_tests;
mod queue_tests;
mod youtube_tests;
