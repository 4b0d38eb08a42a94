//! cligateway core library: translate HTTP requests into whitelisted command invocations,
//! run them, and shape the output as JSON or plain text.

pub mod config;
pub mod exec;
pub mod gateway;
pub mod invocation;
