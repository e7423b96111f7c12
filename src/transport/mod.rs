//! HTTP transport: builds the pooled `reqwest` client a batch runs on.
//!
//! The transport itself is opaque to the scheduler. It only has to honour the
//! connection cap and the TLS verification flag from the batch configuration.

mod http;

pub use http::{HttpTransport, TransportError};
