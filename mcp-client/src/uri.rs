//! `mcp://` resource references.
//!
//! A reference has the form `mcp://<server>/<resource>` where `<resource>`
//! is everything after the slash that follows the server segment. The
//! resource part may itself carry a scheme (`mcp://files/file:///a.txt`).

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct McpUri {
    pub server: String,
    pub resource: String,
}

const SCHEME: &str = "mcp://";

/// Punctuation that commonly trails a URI embedded in prose.
const TRAILING: &[char] = &['.', ',', ';', ':', '!', '?', ')', ']', '}', '"', '\''];

impl FromStr for McpUri {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix(SCHEME)
            .ok_or_else(|| anyhow::anyhow!("not an mcp:// URI: {s}"))?;
        let (server, resource) = rest
            .split_once('/')
            .ok_or_else(|| anyhow::anyhow!("missing resource segment in {s}"))?;
        if server.is_empty() {
            anyhow::bail!("empty server segment in {s}");
        }
        if resource.is_empty() {
            anyhow::bail!("empty resource segment in {s}");
        }
        Ok(Self {
            server: server.to_string(),
            resource: resource.to_string(),
        })
    }
}

impl fmt::Display for McpUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}", self.server, self.resource)
    }
}

/// Extract every well-formed MCP URI from free text, in order of first
/// appearance, with duplicates (same server and resource) removed.
pub fn extract_uris(text: &str) -> Vec<McpUri> {
    let mut found = Vec::new();
    let mut start = 0;
    while let Some(pos) = text[start..].find(SCHEME) {
        let begin = start + pos;
        let tail = &text[begin..];
        let end = tail
            .find(|c: char| c.is_whitespace() || c == '<' || c == '>')
            .unwrap_or(tail.len());
        let candidate = tail[..end].trim_end_matches(TRAILING);
        if let Ok(uri) = candidate.parse::<McpUri>() {
            if !found.contains(&uri) {
                found.push(uri);
            }
        }
        start = begin + SCHEME.len();
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parse_round_trip() {
        let raw = "mcp://test-server/file:///test.txt";
        let uri: McpUri = raw.parse().expect("parse");
        assert_eq!(uri.server, "test-server");
        assert_eq!(uri.resource, "file:///test.txt");
        assert_eq!(uri.to_string(), raw);
    }

    #[test]
    fn rejects_malformed() {
        assert!("http://x/y".parse::<McpUri>().is_err());
        assert!("mcp://server".parse::<McpUri>().is_err());
        assert!("mcp:///resource".parse::<McpUri>().is_err());
        assert!("mcp://server/".parse::<McpUri>().is_err());
    }

    #[test]
    fn extracts_in_order_without_duplicates() {
        let text = "see mcp://a/one and mcp://b/two, then mcp://a/one again";
        let uris = extract_uris(text);
        assert_eq!(
            uris,
            vec![
                McpUri {
                    server: "a".into(),
                    resource: "one".into()
                },
                McpUri {
                    server: "b".into(),
                    resource: "two".into()
                },
            ]
        );
    }

    #[test]
    fn strips_trailing_punctuation_but_keeps_inner_schemes() {
        let uris = extract_uris("summarize mcp://files/file:///notes.txt.");
        assert_eq!(uris.len(), 1);
        assert_eq!(uris[0].resource, "file:///notes.txt");
    }

    #[test]
    fn ignores_candidates_with_empty_segments() {
        assert!(extract_uris("mcp:// and mcp://x/").is_empty());
    }
}
