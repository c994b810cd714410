//! Core data model.
//!
//! Work types describe what can run and when; work items are the concrete
//! (work type, subject) units the scheduler reasons about; jobs are queued
//! on-demand requests to run a work type.

pub mod job;
pub mod work;
