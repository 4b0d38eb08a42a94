//! Request translators: GET path/query and POST JSON body into an [`Invocation`].

use serde::Deserialize;

use crate::gateway::response::GatewayError;
use crate::invocation::{Invocation, StringMap};

/// POST body: `{"command": "cmd subcmd", "flags": {"k": "v"}, "args": ["a"], "envs": {"K": "V"}}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PostBody {
    #[serde(default)]
    pub command: String,
    #[serde(default)]
    pub flags: Option<StringMap>,
    #[serde(default)]
    pub args: Option<Vec<String>>,
    #[serde(default)]
    pub envs: Option<StringMap>,
}

/// Translate `/{command}/{args...}?flag=value`. `path` is the request path without the leading `/`.
/// Empty segments are kept as args; the sanitizer drops them later.
pub fn from_get(path: &str, query: &[(String, String)]) -> Result<Invocation, GatewayError> {
    let (command, rest) = match path.split_once('/') {
        Some((c, r)) => (c, Some(r)),
        None => (path, None),
    };
    if command.is_empty() {
        return Err(GatewayError::BadRequest("no command given".to_string()));
    }

    let mut inv = Invocation::new(command);
    if let Some(rest) = rest {
        inv.args = rest.split('/').map(String::from).collect();
    }
    for (k, v) in query {
        if !k.is_empty() {
            inv.flags.entry(k.clone()).or_insert_with(|| v.clone());
        }
    }
    Ok(inv)
}

/// Parse and translate a POST body. Malformed JSON is a client error.
pub fn from_post(body: &[u8]) -> Result<Invocation, GatewayError> {
    let body: PostBody =
        serde_json::from_slice(body).map_err(|e| GatewayError::BadRequest(e.to_string()))?;
    from_post_body(body)
}

/// `command` is split on whitespace: the first token is the program, the rest are subcommands.
pub fn from_post_body(body: PostBody) -> Result<Invocation, GatewayError> {
    let mut tokens = body.command.split_whitespace().map(String::from);
    let Some(command) = tokens.next() else {
        return Err(GatewayError::BadRequest("no command given".to_string()));
    };
    Ok(Invocation {
        command,
        subcommands: tokens.collect(),
        flags: body.flags.unwrap_or_default(),
        args: body.args.unwrap_or_default(),
        envs: body.envs.unwrap_or_default(),
    })
}
