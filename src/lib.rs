//! Offline-first request interceptor.
//!
//! Sits between a web front end's pages and the network, serving each request
//! cache-first, network-first, or straight from the network depending on its
//! route, with cache contents partitioned into versioned generations that are
//! replaced wholesale on each deployment.

pub mod cache;
pub mod config;
pub mod error;
pub mod interceptor;
pub mod registration;

pub use error::InterceptError;
pub use interceptor::Interceptor;
pub use registration::Registration;
