// ABOUTME: Integration tests for configuration parsing.
// ABOUTME: Tests YAML parsing, defaults, discovery, and destination forms.

use sshclient::config::*;
use std::path::PathBuf;
use std::time::Duration;

mod parsing {
    use super::*;

    #[test]
    fn parse_empty_config_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.client.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.client.command_timeout, Duration::from_secs(300));
        assert_eq!(config.client.host_key_policy, HostKeyCheck::KnownHosts);
        assert_eq!(config.server.hostname, "localhost");
        assert_eq!(config.server.handler, HandlerKind::Echo);
    }

    #[test]
    fn parse_full_config() {
        let yaml = r#"
client:
  host: build.example.com
  port: 2222
  user: deploy
  key_path: /home/deploy/.ssh/id_ed25519
  host_key_policy: trust_on_first_use
  known_hosts: /tmp/known_hosts
  connect_timeout: 3s
  command_timeout: 2m
  terminal:
    width: 132

server:
  hostname: 0.0.0.0
  port: 12200
  username: joebob
  password: howdy!
  key_file: ~/.ssh/id_ed25519
  handler:
    kind: mock
    rc: 23
    stdout: meh
    stderr: we have a failure to communicate
"#;
        let config = Config::from_yaml(yaml).unwrap();

        let client = &config.client;
        assert_eq!(client.host.as_deref(), Some("build.example.com"));
        assert_eq!(client.port, Some(2222));
        assert_eq!(client.connect_timeout, Duration::from_secs(3));
        assert_eq!(client.command_timeout, Duration::from_secs(120));
        assert_eq!(client.host_key_policy, HostKeyCheck::TrustOnFirstUse);
        let terminal = client.terminal.as_ref().unwrap();
        assert_eq!(terminal.term, "xterm");
        assert_eq!((terminal.width, terminal.height), (132, 40));

        let server = &config.server;
        assert_eq!(server.port, Some(12200));
        assert_eq!(server.key_file, Some(PathBuf::from("~/.ssh/id_ed25519")));
        assert_eq!(
            server.handler,
            HandlerKind::Mock {
                rc: 23,
                stdout: "meh".to_string(),
                stderr: "we have a failure to communicate".to_string(),
            }
        );
    }

    #[test]
    fn zero_timeout_means_forever() {
        let config = Config::from_yaml("client:\n  command_timeout: 0s\n").unwrap();
        assert!(config.client.command_timeout.is_zero());
    }

    #[test]
    fn shell_handler_kind() {
        let config = Config::from_yaml("server:\n  handler:\n    kind: shell\n").unwrap();
        assert_eq!(config.server.handler, HandlerKind::Shell);
    }

    #[test]
    fn unknown_handler_kind_returns_error() {
        let result = Config::from_yaml("server:\n  handler:\n    kind: telnet\n");
        assert!(result.is_err());
    }

    #[test]
    fn bad_duration_returns_error() {
        let result = Config::from_yaml("client:\n  connect_timeout: soon\n");
        assert!(result.is_err());
    }
}

mod discovery {
    use super::*;

    #[test]
    fn discover_without_file_returns_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert!(config.client.host.is_none());
    }

    #[test]
    fn discover_reads_yml() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILENAME), "client:\n  user: alice\n").unwrap();
        let config = Config::discover(dir.path()).unwrap();
        assert_eq!(config.client.user.as_deref(), Some("alice"));
    }

    #[test]
    fn load_missing_file_returns_error() {
        let err = Config::load(std::path::Path::new("/nonexistent/sshclient.yml")).unwrap_err();
        assert!(matches!(err, sshclient::error::Error::ConfigNotFound(_)));
    }
}

mod destination_parsing {
    use super::*;

    #[test]
    fn parse_simple_host() {
        let dest = Destination::parse("example.com").unwrap();
        assert_eq!(dest.host, "example.com");
        assert_eq!(dest.port, None);
        assert_eq!(dest.user, None);
    }

    #[test]
    fn parse_full_format() {
        let dest = Destination::parse("joebob@localhost:12200").unwrap();
        assert_eq!(dest.user.as_deref(), Some("joebob"));
        assert_eq!(dest.host, "localhost");
        assert_eq!(dest.port, Some(12200));
    }

    #[test]
    fn destination_feeds_connect_config() {
        let client = ClientConfig {
            password: Some("howdy!".to_string()),
            ..ClientConfig::default()
        };
        let dest = Destination::parse("joebob@[::1]:2022").unwrap();
        let connect = client.connect_config(Some(&dest)).unwrap();
        assert_eq!(connect.host, "::1");
        assert_eq!(connect.port, 2022);
        assert_eq!(connect.user, "joebob");
    }
}
