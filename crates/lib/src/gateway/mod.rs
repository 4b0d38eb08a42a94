//! Gateway: HTTP front end for whitelisted commands.
//!
//! Requests are translated into an [`Invocation`](crate::invocation::Invocation), checked against
//! the whitelist, executed, and the outcome is returned as JSON or plain text.

mod request;
mod response;
mod server;

pub use request::{from_get, from_post, from_post_body, PostBody};
pub use response::{format_outcome, GatewayError, JsonOutput};
pub use server::{router, run, run_gateway, serve, GatewayState};
