//! A single export point and its client grants, i.e. one line of an exports file.
//!
//! A line holds an export point followed by whitespace-separated client specs:
//!
//! ```text
//! <export_point> <host1>(<opt>,<opt>) <host2> ...
//! ```
//!
//! Hosts and options are opaque strings; nothing here validates them against
//! the NFS option vocabulary.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;

use crate::error::{ExportError, Result};

/// Column the first client is aligned to when serializing.
pub const EXPORT_POINT_WIDTH: usize = 32;

/// Set of export options attached to one client grant.
pub type ClientOptions = BTreeSet<String>;

/// Mapping from host spec to its export options.
pub type Clients = BTreeMap<String, ClientOptions>;

// Host part: ip, network, hostname or wildcard pattern. Options: anything up
// to the closing paren.
static CLIENT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?P<host>[a-z0-9*./-]+)(\((?P<options>[^)]+)\))?$")
        .expect("client pattern is a valid regex")
});

static HOST_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9*./-]+$").expect("host pattern is a valid regex"));

/// Characters an export option can never contain and still survive a
/// serialize/deserialize cycle.
const OPTION_FORBIDDEN: &[char] = &[',', '(', ')', '#'];

/// An exported filesystem and the clients allowed to mount it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Export {
    export_point: String,
    clients: Clients,
}

impl Export {
    /// Creates an export; fails with `NoClients` when `clients` is empty.
    pub fn new(export_point: impl Into<String>, clients: Clients) -> Result<Self> {
        let export_point = export_point.into();
        if clients.is_empty() {
            return Err(ExportError::NoClients { export_point });
        }
        Ok(Self {
            export_point,
            clients,
        })
    }

    /// Creates an export with exactly one client grant.
    pub fn with_client(
        export_point: impl Into<String>,
        host: impl Into<String>,
        options: ClientOptions,
    ) -> Self {
        let mut clients = Clients::new();
        clients.insert(host.into(), options);
        Self {
            export_point: export_point.into(),
            clients,
        }
    }

    /// The exported path.
    pub fn export_point(&self) -> &str {
        &self.export_point
    }

    /// All client grants of this export.
    pub fn clients(&self) -> &Clients {
        &self.clients
    }

    /// Options granted to `host`, if it has a grant.
    pub fn options(&self, host: &str) -> Option<&ClientOptions> {
        self.clients.get(host)
    }

    /// Whether `host` has a grant on this export.
    pub fn has_client(&self, host: &str) -> bool {
        self.clients.contains_key(host)
    }

    /// Number of granted hosts.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Consumes the export, returning its client grants.
    pub fn into_clients(self) -> Clients {
        self.clients
    }

    /// Projects the grants to `host -> [options]`, the shape reported to callers.
    pub fn client_listing(&self) -> BTreeMap<String, Vec<String>> {
        self.clients
            .iter()
            .map(|(host, options)| (host.clone(), options.iter().cloned().collect()))
            .collect()
    }

    /// Parses one exports line; comments must already be stripped.
    ///
    /// A later token for the same host replaces an earlier one.
    pub fn deserialize(line: &str) -> Result<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            return Err(ExportError::Deserialization {
                reason: format!("'{}' is not a valid export line", line),
            });
        }
        if parts[0].starts_with('(') {
            return Err(ExportError::Deserialization {
                reason: format!("'{}' is an option group, not an export point", parts[0]),
            });
        }

        let mut clients = Clients::new();
        for token in &parts[1..] {
            let (host, options) = parse_client(token)?;
            clients.insert(host, options);
        }

        Self::new(parts[0], clients)
    }

    /// Renders this export as an exports line, clients aligned to column 32.
    pub fn serialize(&self) -> String {
        let mut clients = String::new();
        for (host, options) in &self.clients {
            clients.push(' ');
            clients.push_str(host);
            if !options.is_empty() {
                let joined: Vec<&str> = options.iter().map(String::as_str).collect();
                clients.push('(');
                clients.push_str(&joined.join(","));
                clients.push(')');
            }
        }

        format!(
            "{:<width$} {}",
            self.export_point,
            clients,
            width = EXPORT_POINT_WIDTH
        )
    }
}

fn parse_client(token: &str) -> Result<(String, ClientOptions)> {
    let captures = CLIENT_PATTERN
        .captures(token)
        .ok_or_else(|| ExportError::Deserialization {
            reason: format!("Unable to parse client from {}", token),
        })?;

    let host = captures["host"].to_string();
    let options = match captures.name("options") {
        Some(list) => {
            let options: ClientOptions = list
                .as_str()
                .split(',')
                .filter(|o| !o.is_empty())
                .map(str::to_string)
                .collect();
            if options.is_empty() {
                return Err(ExportError::Deserialization {
                    reason: format!("Empty option group in {}", token),
                });
            }
            options
        }
        None => ClientOptions::new(),
    };
    Ok((host, options))
}

/// Checks that `host` and `options` can be written to an exports line and
/// read back unchanged.
pub fn validate_client(host: &str, options: &ClientOptions) -> Result<()> {
    if !HOST_PATTERN.is_match(host) {
        return Err(ExportError::InvalidClient {
            reason: format!("'{}' is not a valid host", host),
        });
    }
    for option in options {
        if option.is_empty()
            || option.contains(OPTION_FORBIDDEN)
            || option.chars().any(char::is_whitespace)
        {
            return Err(ExportError::InvalidClient {
                reason: format!("'{}' is not a valid export option for {}", option, host),
            });
        }
    }
    Ok(())
}

impl fmt::Display for Export {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for Export {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::deserialize(s)
    }
}


#[cfg(test)]
mod tests {
    use super::strategies::arb_export;
    use super::*;
    use proptest::prelude::*;

    fn opts(options: &[&str]) -> ClientOptions {
        options.iter().map(|o| o.to_string()).collect()
    }

    #[test]
    fn test_deserialize_bare_host() {
        let export = Export::deserialize("/fs 192.168.0.1").unwrap();
        assert_eq!(export.export_point(), "/fs");
        assert_eq!(export.client_count(), 1);
        assert_eq!(export.options("192.168.0.1"), Some(&ClientOptions::new()));
    }

    #[test]
    fn test_deserialize_network_and_wildcard_with_options() {
        let export =
            Export::deserialize("/fs 10.0.0.0/24(rw,sync) *.clients.internal(rw)").unwrap();
        assert_eq!(export.options("10.0.0.0/24"), Some(&opts(&["rw", "sync"])));
        assert_eq!(export.options("*.clients.internal"), Some(&opts(&["rw"])));
        assert_eq!(export.client_count(), 2);
    }

    #[test]
    fn test_deserialize_collapses_duplicate_options() {
        let export = Export::deserialize("/fs host(rw,sync,rw)").unwrap();
        assert_eq!(export.options("host"), Some(&opts(&["rw", "sync"])));
    }

    #[test]
    fn test_deserialize_hyphenated_hostname() {
        let export = Export::deserialize("/fs nfs-client-01.lan(ro)").unwrap();
        assert!(export.has_client("nfs-client-01.lan"));
    }

    #[test]
    fn test_deserialize_duplicate_host_last_wins() {
        let export = Export::deserialize("/fs host(ro) host(rw,sync)").unwrap();
        assert_eq!(export.client_count(), 1);
        assert_eq!(export.options("host"), Some(&opts(&["rw", "sync"])));
    }

    #[test]
    fn test_deserialize_tolerates_extra_whitespace() {
        let export = Export::deserialize("  /fs\t\thost1(rw)    host2  ").unwrap();
        assert_eq!(export.export_point(), "/fs");
        assert_eq!(export.client_count(), 2);
    }

    #[test]
    fn test_deserialize_single_token_fails() {
        let err = Export::deserialize("/filesystem").unwrap_err();
        assert!(matches!(err, ExportError::Deserialization { .. }));
    }

    #[test]
    fn test_deserialize_empty_line_fails() {
        assert!(matches!(
            Export::deserialize("   "),
            Err(ExportError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_deserialize_option_group_alone_fails() {
        assert!(matches!(
            Export::deserialize("(rw,sync)"),
            Err(ExportError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_deserialize_options_without_host_fails() {
        assert!(matches!(
            Export::deserialize("/fs (rw)"),
            Err(ExportError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_deserialize_detached_option_group_fails() {
        assert!(matches!(
            Export::deserialize("/fs host (rw)"),
            Err(ExportError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_deserialize_empty_option_group_fails() {
        assert!(Export::deserialize("/fs host()").is_err());
        assert!(matches!(
            Export::deserialize("/fs host(,)"),
            Err(ExportError::Deserialization { .. })
        ));
    }

    #[test]
    fn test_deserialize_drops_empty_option_items() {
        let export = Export::deserialize("/fs host(rw,,sync,)").unwrap();
        assert_eq!(export.options("host"), Some(&opts(&["rw", "sync"])));
        let reparsed = Export::deserialize(&export.serialize()).unwrap();
        assert_eq!(reparsed, export);
    }

    #[test]
    fn test_deserialize_option_group_as_export_point_fails() {
        let err = Export::deserialize("(rw,sync) 10.0.0.1").unwrap_err();
        assert!(matches!(err, ExportError::Deserialization { .. }));
    }

    #[test]
    fn test_validate_client() {
        assert!(validate_client("10.0.0.0/24", &opts(&["rw", "fsid=0"])).is_ok());
        assert!(validate_client("*.lan", &ClientOptions::new()).is_ok());
        for host in ["Client01", "a b", "h#1", "h(rw)", ""] {
            assert!(matches!(
                validate_client(host, &ClientOptions::new()),
                Err(ExportError::InvalidClient { .. })
            ));
        }
        for option in ["", "rw,sync", "a)", "(a", "no root", "x#y"] {
            assert!(matches!(
                validate_client("host", &opts(&[option])),
                Err(ExportError::InvalidClient { .. })
            ));
        }
    }

    #[test]
    fn test_deserialize_uppercase_host_fails() {
        assert!(Export::deserialize("/fs HOST(rw)").is_err());
    }

    #[test]
    fn test_new_without_clients_fails() {
        let err = Export::new("/fs", Clients::new()).unwrap_err();
        assert!(matches!(err, ExportError::NoClients { .. }));
    }

    #[test]
    fn test_serialize_aligns_clients_to_column_32() {
        let export = Export::with_client("/test_export", "10.0.0.1", opts(&["rw"]));
        assert_eq!(
            export.serialize(),
            "/test_export                      10.0.0.1(rw)"
        );
    }

    #[test]
    fn test_serialize_long_export_point_is_not_truncated() {
        let point = format!("/{}", "x".repeat(40));
        let export = Export::with_client(point.clone(), "host", ClientOptions::new());
        assert_eq!(export.serialize(), format!("{}  host", point));
    }

    #[test]
    fn test_serialize_bare_host_has_no_parens() {
        let export = Export::with_client("/fs", "host", ClientOptions::new());
        assert!(export.serialize().ends_with(" host"));
        assert!(!export.serialize().contains('('));
    }

    #[test]
    fn test_display_matches_serialize() {
        let export = Export::deserialize("/fs a(rw) b").unwrap();
        assert_eq!(export.to_string(), export.serialize());
    }

    #[test]
    fn test_from_str() {
        let export: Export = "/fs host(rw)".parse().unwrap();
        assert_eq!(export.export_point(), "/fs");
    }

    #[test]
    fn test_client_listing() {
        let export = Export::deserialize("/fs host(sync,rw) other").unwrap();
        let listing = export.client_listing();
        assert_eq!(listing["host"], vec!["rw".to_string(), "sync".to_string()]);
        assert!(listing["other"].is_empty());
    }

    proptest! {
        #[test]
        fn prop_export_roundtrip(export in arb_export()) {
            let line = export.serialize();
            let parsed = Export::deserialize(&line).unwrap();
            prop_assert_eq!(parsed, export);
        }

        #[test]
        fn prop_generated_clients_are_valid(export in arb_export()) {
            for (host, options) in export.clients() {
                prop_assert!(validate_client(host, options).is_ok());
            }
        }
    }
}
