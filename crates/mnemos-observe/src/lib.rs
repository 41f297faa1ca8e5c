//! Observability setup for Mnemos: structured logging and optional
//! OpenTelemetry trace export for the memory pipeline spans.

pub mod tracing_setup;
