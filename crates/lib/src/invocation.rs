//! Invocation model: one normalized command execution request.
//!
//! Both request shapes (GET path + query, POST JSON body) are translated into an
//! [`Invocation`]; the argument vector and the child environment are derived from it here.

use indexmap::IndexMap;

/// Flags and envs in the order the caller sent them (query order, JSON document order).
pub type StringMap = IndexMap<String, String>;

/// Rendering options for flags and envs (from the process configuration).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ArgOptions {
    /// Prefix bare flag keys with `-` (one char) or `--` (longer).
    pub add_dashes: bool,
    /// Upper-case environment variable names.
    pub env_key_to_upper: bool,
}

/// A command execution request:
/// `[ENV=VAL] command [subcommands] [--flag value] [args]`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Invocation {
    /// Program name; checked against the whitelist as-is.
    pub command: String,
    /// Extra tokens from a POST `command` field (e.g. `install` in `"pip install"`).
    pub subcommands: Vec<String>,
    pub flags: StringMap,
    pub args: Vec<String>,
    pub envs: StringMap,
}

impl Invocation {
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    /// `subcommands ++ flag_strings(flags) ++ args`. Not yet sanitized.
    pub fn full_args(&self, opts: ArgOptions) -> Vec<String> {
        let mut args = self.subcommands.clone();
        args.extend(flag_strings(&self.flags, opts.add_dashes));
        args.extend(self.args.iter().cloned());
        args
    }

    /// Complete child environment as `KEY=VALUE` strings.
    pub fn env_strings(&self, opts: ArgOptions) -> Vec<String> {
        env_strings(&self.envs, opts.env_key_to_upper)
    }
}

/// Convert flags to argv tokens:
/// `{"k0": "", "k1": "v1"}` => `["--k0", "--k1", "v1"]` (with `add_dashes`).
pub fn flag_strings(flags: &StringMap, add_dashes: bool) -> Vec<String> {
    let mut out = Vec::with_capacity(flags.len() * 2);
    for (k, v) in flags.iter() {
        let k = k.trim();
        let v = v.trim();
        let key = if add_dashes && !k.starts_with('-') {
            if k.chars().count() == 1 {
                format!("-{}", k)
            } else {
                format!("--{}", k)
            }
        } else {
            k.to_string()
        };
        out.push(key);
        if !v.is_empty() {
            out.push(v.to_string());
        }
    }
    out
}

/// Convert envs to `KEY=VALUE` strings: `{"k": "v"}` => `["K=v"]` (with `upper_keys`).
pub fn env_strings(envs: &StringMap, upper_keys: bool) -> Vec<String> {
    envs.iter()
        .map(|(k, v)| {
            let k = k.trim();
            let v = v.trim();
            if upper_keys {
                format!("{}={}", k.to_uppercase(), v)
            } else {
                format!("{}={}", k, v)
            }
        })
        .collect()
}

/// Drop blank tokens and trim the rest. Applied to the argument vector only, never the command.
pub fn sanitize_args<I>(args: I) -> Vec<String>
where
    I: IntoIterator<Item = String>,
{
    args.into_iter()
        .filter_map(|a| {
            let t = a.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .collect()
}
