//! Tool-server descriptors and `mcp.json` parsing.

use serde::de::{MapAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize};
use std::{collections::HashMap, collections::HashSet, fmt, fs, path::Path};

use super::error::{McpError, McpResult};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct McpConfig {
    #[serde(rename = "mcpServers", default)]
    pub mcp_servers: ServerEntries,
}

/// Server entries in declaration order.
///
/// Unlike a map, duplicate keys survive parsing so that a batch containing
/// them can be rejected instead of silently keeping the last one.
#[derive(Debug, Clone, Default)]
pub struct ServerEntries(pub Vec<(String, McpServerEntry)>);

impl<'de> Deserialize<'de> for ServerEntries {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct EntriesVisitor;

        impl<'de> Visitor<'de> for EntriesVisitor {
            type Value = ServerEntries;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of server name to server entry")
            }

            fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
                while let Some((name, entry)) = map.next_entry::<String, McpServerEntry>()? {
                    entries.push((name, entry));
                }
                Ok(ServerEntries(entries))
            }
        }

        deserializer.deserialize_map(EntriesVisitor)
    }
}

/// One raw `mcpServers` entry.
///
/// `url` takes precedence when an entry carries both keys. A process entry
/// needs both `command` and `args`. Anything that matches neither shape is
/// kept as [`McpServerEntry::Unrecognized`] so the registry can report it
/// instead of failing the whole file.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(untagged)]
pub enum McpServerEntry {
    RemoteHttp {
        url: String,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Stdio {
        command: String,
        args: Vec<String>,
        #[serde(default)]
        env: HashMap<String, String>,
    },
    Unrecognized(serde_json::Value),
}

impl McpServerEntry {
    /// Validate the entry and expand `${VAR}` placeholders.
    pub fn to_descriptor(&self, name: &str) -> McpResult<ServerDescriptor> {
        match self {
            Self::RemoteHttp { url, env } => {
                let env = expand_env_map(env);
                let url = expand_with(url, &env);
                Ok(ServerDescriptor {
                    name: name.to_string(),
                    transport: Transport::Stream { url },
                    env,
                })
            }
            Self::Stdio { command, args, env } => {
                let env = expand_env_map(env);
                Ok(ServerDescriptor {
                    name: name.to_string(),
                    transport: Transport::Process {
                        command: expand_with(command, &env),
                        args: args.iter().map(|a| expand_with(a, &env)).collect(),
                    },
                    env,
                })
            }
            Self::Unrecognized(_) => Err(McpError::InvalidDescriptor {
                server: name.to_string(),
                reason: "entry has neither `url` nor `command` with `args`".to_string(),
            }),
        }
    }
}

impl McpConfig {
    pub fn load(path: impl AsRef<Path>) -> McpResult<Self> {
        let path = path.as_ref();
        let txt = fs::read_to_string(path)
            .map_err(|e| McpError::Config(format!("failed to read {}: {e}", path.display())))?;
        Self::from_json(&txt)
    }

    pub fn from_json(txt: &str) -> McpResult<Self> {
        serde_json::from_str(txt).map_err(|e| McpError::Config(e.to_string()))
    }

    pub fn entries(&self) -> &[(String, McpServerEntry)] {
        &self.mcp_servers.0
    }

    pub fn len(&self) -> usize {
        self.mcp_servers.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mcp_servers.0.is_empty()
    }

    /// Reject the batch if two entries share a name.
    pub fn ensure_unique_names(&self) -> McpResult<()> {
        ensure_unique(self.entries().iter().map(|(name, _)| name.as_str()))
    }
}

pub(crate) fn ensure_unique<'a>(names: impl IntoIterator<Item = &'a str>) -> McpResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(McpError::DuplicateServer(name.to_string()));
        }
    }
    Ok(())
}

/// How a tool server is reached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Streamable HTTP event-stream endpoint.
    Stream { url: String },
    /// Local subprocess speaking line-delimited JSON-RPC over stdio.
    Process { command: String, args: Vec<String> },
}

impl Transport {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Stream { .. } => TransportKind::Stream,
            Self::Process { .. } => TransportKind::Process,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportKind {
    Stream,
    Process,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream => f.write_str("stream"),
            Self::Process => f.write_str("process"),
        }
    }
}

/// A validated tool-server descriptor.
///
/// `env` is handed to the transport when connecting; it never touches the
/// environment of the current process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDescriptor {
    pub name: String,
    pub transport: Transport,
    pub env: HashMap<String, String>,
}

impl ServerDescriptor {
    pub fn stream(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: Transport::Stream { url: url.into() },
            env: HashMap::new(),
        }
    }

    pub fn process<I, S>(name: impl Into<String>, command: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            transport: Transport::Process {
                command: command.into(),
                args: args.into_iter().map(Into::into).collect(),
            },
            env: HashMap::new(),
        }
    }

    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }
}

/// Expand `${NAME}` placeholders using `lookup`.
///
/// Unknown names and unterminated placeholders are left unchanged.
pub fn expand_placeholders(input: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find('}') {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(&value),
                    None => out.push_str(&rest[start..start + 2 + end + 1]),
                }
                rest = &after[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Expand placeholders from the process environment.
pub fn expand_env_placeholders(input: &str) -> String {
    expand_placeholders(input, |name| std::env::var(name).ok())
}

pub fn expand_env_map(map: &HashMap<String, String>) -> HashMap<String, String> {
    map.iter()
        .map(|(k, v)| (k.clone(), expand_env_placeholders(v)))
        .collect()
}

/// Descriptor env first, then the process environment.
fn expand_with(input: &str, env: &HashMap<String, String>) -> String {
    expand_placeholders(input, |name| {
        env.get(name).cloned().or_else(|| std::env::var(name).ok())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_preserves_declaration_order() {
        let cfg = McpConfig::from_json(
            r#"{
                "mcpServers": {
                    "zeta": { "url": "http://127.0.0.1:8080/sse" },
                    "alpha": { "command": "echo", "args": ["hi"] },
                    "mid": { "command": "uvx", "args": ["weather"], "env": { "KEY": "v" } }
                }
            }"#,
        )
        .unwrap();

        let names: Vec<&str> = cfg.entries().iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    }

    #[test]
    fn test_duplicate_names_survive_parsing_and_are_rejected() {
        let cfg = McpConfig::from_json(
            r#"{ "mcpServers": { "a": { "url": "http://x" }, "a": { "command": "echo" } } }"#,
        )
        .unwrap();

        assert_eq!(cfg.len(), 2);
        assert!(matches!(
            cfg.ensure_unique_names(),
            Err(McpError::DuplicateServer(name)) if name == "a"
        ));
    }

    #[test]
    fn test_entry_without_url_or_command_is_unrecognized() {
        let cfg = McpConfig::from_json(r#"{ "mcpServers": { "bad": { "args": ["x"] } } }"#).unwrap();
        let (name, entry) = &cfg.entries()[0];

        assert!(matches!(entry, McpServerEntry::Unrecognized(_)));
        assert!(matches!(
            entry.to_descriptor(name),
            Err(McpError::InvalidDescriptor { .. })
        ));
    }

    #[test]
    fn test_command_without_args_is_unrecognized() {
        let cfg = McpConfig::from_json(r#"{ "mcpServers": { "bare": { "command": "echo" } } }"#)
            .unwrap();
        let (name, entry) = &cfg.entries()[0];

        assert!(matches!(entry, McpServerEntry::Unrecognized(_)));
        assert!(matches!(
            entry.to_descriptor(name),
            Err(McpError::InvalidDescriptor { server, .. }) if server == "bare"
        ));
    }

    #[test]
    fn test_url_wins_over_command() {
        let cfg = McpConfig::from_json(
            r#"{ "mcpServers": { "both": { "url": "http://x", "command": "echo" } } }"#,
        )
        .unwrap();
        let descriptor = cfg.entries()[0].1.to_descriptor("both").unwrap();
        assert_eq!(descriptor.transport.kind(), TransportKind::Stream);
    }

    #[test]
    fn test_missing_servers_key_is_empty() {
        let cfg = McpConfig::from_json("{}").unwrap();
        assert!(cfg.is_empty());
    }

    #[test]
    fn test_expand_placeholders() {
        let lookup = |name: &str| (name == "TOKEN").then(|| "s3cret".to_string());

        assert_eq!(
            expand_placeholders("https://h/mcp?key=${TOKEN}", lookup),
            "https://h/mcp?key=s3cret"
        );
        assert_eq!(expand_placeholders("${MISSING}/x", lookup), "${MISSING}/x");
        assert_eq!(expand_placeholders("tail ${TOKEN", lookup), "tail ${TOKEN");
        assert_eq!(expand_placeholders("no vars", lookup), "no vars");
    }

    #[test]
    fn test_descriptor_env_resolves_url_placeholders() {
        let entry = McpServerEntry::RemoteHttp {
            url: "http://h/sse?k=${API_TOKEN_FOR_TEST_ONLY}".to_string(),
            env: HashMap::from([(
                "API_TOKEN_FOR_TEST_ONLY".to_string(),
                "abc".to_string(),
            )]),
        };
        let descriptor = entry.to_descriptor("remote").unwrap();
        assert_eq!(
            descriptor.transport,
            Transport::Stream {
                url: "http://h/sse?k=abc".to_string()
            }
        );
        assert_eq!(descriptor.env.get("API_TOKEN_FOR_TEST_ONLY").unwrap(), "abc");
    }
}
