//! Event sink system for observability.
//!
//! Run lifecycle events flow from the executor and operators into the
//! `EventSink` of the run's `PipelineContext`. Contexts built without one
//! discard their events.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
