//! Outbound HTTP for tether scripts
//!
//! Backs the script-side `fetch` binding. Responses are normalised into a
//! fetch-like JSON object (`ok`, `status`, `statusText`, `headers`, `body`)
//! so the script runtime never has to deal with reqwest types. An offline
//! mode answers from registered mocks instead of the network.

pub mod client;
pub mod errors;
pub mod types;

pub use client::{HttpClient, HttpManager};
pub use errors::HttpError;
pub use types::{HttpMethod, HttpMethodError};

pub use tether_config::HttpConfig;
