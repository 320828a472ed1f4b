//! Shared HTTP client with retry and backoff

mod client;

pub use client::{HttpClient, HttpClientBuilder};
