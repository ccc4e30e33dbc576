// ABOUTME: Destination parsing for the command line.
// ABOUTME: Accepts "host", "user@host", "host:port", "[v6]:port", and "user@host:path" forms.

use crate::error::{Error, Result};

/// A remote host named on the command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Destination {
    pub user: Option<String>,
    pub host: String,
    pub port: Option<u16>,
}

impl Destination {
    /// Parse `[user@]host[:port]`. IPv6 literals need brackets to carry a port.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidDestination {
            input: s.to_string(),
            reason: reason.to_string(),
        };
        if s.is_empty() {
            return Err(invalid("destination cannot be empty"));
        }

        let (user, rest) = split_user(s);
        if user == Some("") {
            return Err(invalid("user name cannot be empty"));
        }

        let (host, port) = if let Some(inner) = rest.strip_prefix('[') {
            let (host, after) = inner
                .split_once(']')
                .ok_or_else(|| invalid("unclosed '[' in address"))?;
            let port = match after {
                "" => None,
                _ => {
                    let port = after
                        .strip_prefix(':')
                        .ok_or_else(|| invalid("expected ':' after ']'"))?;
                    Some(parse_port(port).ok_or_else(|| invalid("invalid port"))?)
                }
            };
            (host, port)
        } else if rest.matches(':').count() == 1 {
            let (host, port) = rest.split_once(':').unwrap_or((rest, ""));
            (host, Some(parse_port(port).ok_or_else(|| invalid("invalid port"))?))
        } else {
            // Bare name, or an unbracketed IPv6 literal without a port.
            (rest, None)
        };

        if host.is_empty() {
            return Err(invalid("hostname cannot be empty"));
        }

        Ok(Self {
            user: user.map(str::to_string),
            host: host.to_string(),
            port,
        })
    }

    /// Parse scp-style `[user@]host:path`. An empty path means the remote
    /// user's home directory.
    pub fn parse_remote_path(s: &str) -> Result<(Self, String)> {
        let s = s.trim();
        let invalid = |reason: &str| Error::InvalidDestination {
            input: s.to_string(),
            reason: reason.to_string(),
        };

        let (user, rest) = split_user(s);
        let (host, path) = if let Some(inner) = rest.strip_prefix('[') {
            let (host, after) = inner
                .split_once(']')
                .ok_or_else(|| invalid("unclosed '[' in address"))?;
            let path = after
                .strip_prefix(':')
                .ok_or_else(|| invalid("expected host:path"))?;
            (host, path)
        } else {
            rest.split_once(':')
                .ok_or_else(|| invalid("expected host:path"))?
        };

        if host.is_empty() {
            return Err(invalid("hostname cannot be empty"));
        }
        if user == Some("") {
            return Err(invalid("user name cannot be empty"));
        }

        let path = if path.is_empty() { "." } else { path };
        Ok((
            Self {
                user: user.map(str::to_string),
                host: host.to_string(),
                port: None,
            },
            path.to_string(),
        ))
    }
}

fn split_user(s: &str) -> (Option<&str>, &str) {
    match s.rsplit_once('@') {
        Some((user, rest)) => (Some(user), rest),
        None => (None, s),
    }
}

fn parse_port(s: &str) -> Option<u16> {
    s.parse::<u16>().ok().filter(|&p| p != 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_only() {
        let d = Destination::parse("example.com").unwrap();
        assert_eq!(d.host, "example.com");
        assert_eq!(d.user, None);
        assert_eq!(d.port, None);
    }

    #[test]
    fn parses_user_host_port() {
        let d = Destination::parse("deploy@web2.example.com:2222").unwrap();
        assert_eq!(d.user.as_deref(), Some("deploy"));
        assert_eq!(d.host, "web2.example.com");
        assert_eq!(d.port, Some(2222));
    }

    #[test]
    fn parses_ipv6_forms() {
        let d = Destination::parse("[::1]:2022").unwrap();
        assert_eq!((d.host.as_str(), d.port), ("::1", Some(2022)));

        let d = Destination::parse("fe80::1").unwrap();
        assert_eq!((d.host.as_str(), d.port), ("fe80::1", None));
    }

    #[test]
    fn rejects_bad_ports_and_empty_parts() {
        assert!(Destination::parse("host:0").is_err());
        assert!(Destination::parse("host:ssh").is_err());
        assert!(Destination::parse("host:70000").is_err());
        assert!(Destination::parse("@host").is_err());
        assert!(Destination::parse(":22").is_err());
        assert!(Destination::parse("").is_err());
        assert!(Destination::parse("[::1").is_err());
    }

    #[test]
    fn parses_remote_paths() {
        let (d, path) = Destination::parse_remote_path("joebob@box:/tmp/out").unwrap();
        assert_eq!(d.user.as_deref(), Some("joebob"));
        assert_eq!(d.host, "box");
        assert_eq!(path, "/tmp/out");

        let (d, path) = Destination::parse_remote_path("[::1]:uploads").unwrap();
        assert_eq!(d.host, "::1");
        assert_eq!(path, "uploads");

        let (_, path) = Destination::parse_remote_path("box:").unwrap();
        assert_eq!(path, ".");
    }

    #[test]
    fn remote_path_needs_a_colon() {
        assert!(Destination::parse_remote_path("box").is_err());
        assert!(Destination::parse_remote_path(":/tmp").is_err());
    }
}
