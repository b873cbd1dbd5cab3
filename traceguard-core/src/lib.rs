//! Tracing instrumentation for OpenAI client calls.
//!
//! Target methods live in a [`registry::MethodRegistry`]. An
//! [`instrumentor::Instrumentor`] swaps each one for an
//! [`interceptor::InstrumentedMethod`] that records a client span per call,
//! including streamed calls, whose chunks are reassembled by
//! [`stream::ReassemblingStream`].

pub mod call;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod http_client;
pub mod instrumentor;
pub mod interceptor;
pub mod method;
pub mod model;
pub mod payload;
pub mod policy;
pub mod providers;
pub mod registry;
pub mod stream;
pub mod telemetry;
pub mod version;
