//! fakedns - the fake-IP DNS interception engine of a tunneling proxy.
//!
//! This library exposes the engine and its building blocks for embedding,
//! benchmarking and testing.

pub mod dns;
pub mod error;
pub mod fakeip;
pub mod packet;
pub mod pending;
pub mod policy;
pub mod proxy;
pub mod stats;
pub mod tamper;
pub mod transport;

pub use error::{Error, Result};
pub use proxy::{DnsProxy, ProxyConfig};
