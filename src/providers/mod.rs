//! Built-in data providers

mod http;

pub use http::HttpJsonProvider;
