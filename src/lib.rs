//! # portfolio-work
//!
//! Work orchestration for a portfolio-trading backend.
//!
//! Work types are registered with a priority, a market-timing window, an
//! interval, and dependencies. A scheduling loop runs whichever (work type,
//! subject) items are due, a durable job queue runs on-demand requests with
//! retry and backoff, and both share one bounded worker pool. Lifecycle and
//! progress events are published on an in-process bus and streamed over HTTP.

pub mod bus;
pub mod catalog;
pub mod completion;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod event;
pub mod http;
pub mod market;
pub mod model;
pub mod progress;
pub mod queue;
pub mod registry;
pub mod status;
pub mod telemetry;
