//! Translation between native HTTP values and the Express-style objects
//! handed to script handlers

pub mod cookie;
pub mod request;
pub mod response;

pub use cookie::CookieOptions;
pub use request::{client_ip, BridgeRequest, NativeRequest};
pub use response::{
    mime_for, sniff_content_type, BridgeResponse, ChannelWriter, CommittedResponse,
    NativeResponse, Payload, ResponseHandle, ResponseWriter, INTERNAL_ERROR_BODY,
};
