//! The whole exports file: a mapping from export point to [`Export`].

use std::collections::btree_map;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use tracing::debug;

use crate::error::{ExportError, Result};
use crate::export::{validate_client, ClientOptions, Export};

/// A set of exports that can be written out as an exports file.
///
/// Entries are kept ordered by export point so the serialized file is
/// deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportTable {
    exports: BTreeMap<String, Export>,
}

impl ExportTable {
    /// An empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a table from exports; a later export with the same export point
    /// replaces an earlier one.
    pub fn from_exports(exports: impl IntoIterator<Item = Export>) -> Self {
        Self {
            exports: exports
                .into_iter()
                .map(|export| (export.export_point().to_string(), export))
                .collect(),
        }
    }

    /// The export for `export_point`, if any.
    pub fn get(&self, export_point: &str) -> Option<&Export> {
        self.exports.get(export_point)
    }

    /// Whether `export_point` has at least one grant.
    pub fn contains(&self, export_point: &str) -> bool {
        self.exports.contains_key(export_point)
    }

    /// Number of export points.
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Whether the table has no export point.
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }

    /// Exports in export point order.
    pub fn iter(&self) -> impl Iterator<Item = &Export> {
        self.exports.values()
    }

    /// Grants `host` access to `export_point`, creating the export if needed.
    ///
    /// Fails with `ClientExists` when the host already has a grant and with
    /// `InvalidClient` when the grant could not be read back from the file;
    /// the table is left untouched in both cases.
    pub fn add_client(
        &mut self,
        export_point: &str,
        host: &str,
        options: Option<ClientOptions>,
    ) -> Result<()> {
        let options = options.unwrap_or_default();
        validate_client(host, &options)?;

        let export = match self.exports.get(export_point) {
            None => {
                let export = Export::with_client(export_point, host, options);
                debug!("Export created: {:?}", export);
                export
            }
            Some(existing) => {
                if existing.has_client(host) {
                    return Err(ExportError::ClientExists {
                        reason: format!("Client '{}' is already defined", host),
                    });
                }
                let mut clients = existing.clients().clone();
                clients.insert(host.to_string(), options);
                let export = Export::new(export_point, clients)?;
                debug!("Export updated: {:?}", export);
                export
            }
        };

        self.exports.insert(export_point.to_string(), export);
        Ok(())
    }

    /// Revokes the grant of `host` on `export_point`.
    ///
    /// The export point is dropped from the table together with its last client.
    pub fn remove_client(&mut self, export_point: &str, host: &str) -> Result<()> {
        let export = match self.exports.entry(export_point.to_string()) {
            btree_map::Entry::Vacant(_) => {
                return Err(ExportError::ExportNotFound {
                    reason: format!("No export point found for '{}'", export_point),
                })
            }
            btree_map::Entry::Occupied(entry) => entry,
        };

        if !export.get().has_client(host) {
            return Err(ExportError::ClientNotFound {
                reason: format!("'{}' has no access defined for '{}'", export_point, host),
            });
        }

        if export.get().client_count() > 1 {
            let mut clients = export.get().clients().clone();
            clients.remove(host);
            let updated = Export::new(export_point, clients)?;
            *export.into_mut() = updated;
        } else {
            export.remove();
        }

        debug!("'{}' revoked from export '{}'", host, export_point);
        Ok(())
    }

    /// Parses the lines of an exports file.
    ///
    /// Everything from `#` onwards is a comment; blank lines are skipped. The
    /// first malformed line aborts the whole load.
    pub fn deserialize<I, S>(lines: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut exports = Vec::new();
        for line in lines {
            let content = strip_comment(line.as_ref());
            if content.trim().is_empty() {
                continue;
            }
            exports.push(Export::deserialize(content)?);
        }
        Ok(Self::from_exports(exports))
    }

    /// Renders the table in exports file format, one line per export plus a
    /// trailing newline.
    pub fn serialize(&self) -> String {
        let lines: Vec<String> = self.exports.values().map(Export::serialize).collect();
        let mut out = lines.join("\n");
        out.push('\n');
        out
    }
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

impl fmt::Display for ExportTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

impl FromStr for ExportTable {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self> {
        Self::deserialize(s.lines())
    }
}

impl<'a> IntoIterator for &'a ExportTable {
    type Item = &'a Export;
    type IntoIter = btree_map::Values<'a, String, Export>;

    fn into_iter(self) -> Self::IntoIter {
        self.exports.values()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::export::strategies::arb_export;
    use proptest::prelude::*;

    fn opts(options: &[&str]) -> ClientOptions {
        options.iter().map(|o| o.to_string()).collect()
    }

    fn sample_table() -> ExportTable {
        ExportTable::deserialize([
            "/export 192.168.0.1(rw) hostname(rw) 192.168.100.0/24(rw)",
            "/otherexport 192.168.0.1(rw)",
        ])
        .unwrap()
    }

    #[test]
    fn test_deserialize_skips_comments_and_blank_lines() {
        let table = ExportTable::deserialize([
            "# exports managed by nasgw",
            "",
            "   ",
            "/p1 host1(rw) # trailing comment",
            "\t# indented comment",
        ])
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(
            table.get("/p1"),
            Some(&Export::deserialize("/p1 host1(rw)").unwrap())
        );
    }

    #[test]
    fn test_deserialize_failure_aborts_load() {
        let err = ExportTable::deserialize(["/ok host", "/broken", "/later host"]).unwrap_err();
        assert!(matches!(err, ExportError::Deserialization { .. }));
    }

    #[test]
    fn test_deserialize_comment_hides_clients() {
        // Only the export point survives the comment, which is not a valid line.
        assert!(ExportTable::deserialize(["/p1 #host1(rw)"]).is_err());
    }

    #[test]
    fn test_from_str_parses_whole_file() {
        let table: ExportTable = "/a h1\n/b h2(ro)\n".parse().unwrap();
        assert_eq!(table.len(), 2);
        assert!(table.contains("/a"));
        assert!(table.contains("/b"));
    }

    #[test]
    fn test_serialize_empty_table() {
        assert_eq!(ExportTable::new().serialize(), "\n");
    }

    #[test]
    fn test_serialize_one_line_per_export() {
        let out = sample_table().serialize();
        assert_eq!(out.lines().count(), 2);
        assert!(out.ends_with('\n'));
        assert!(!out.ends_with("\n\n"));
    }

    #[test]
    fn test_add_client_creates_export() {
        let mut table = ExportTable::new();
        table.add_client("/share", "h1", Some(opts(&["rw"]))).unwrap();
        assert_eq!(
            table.get("/share"),
            Some(&Export::with_client("/share", "h1", opts(&["rw"])))
        );
    }

    #[test]
    fn test_add_client_none_options_is_empty_set() {
        let mut table = ExportTable::new();
        table.add_client("/share", "h1", None).unwrap();
        assert_eq!(
            table.get("/share").unwrap().options("h1"),
            Some(&ClientOptions::new())
        );
    }

    #[test]
    fn test_add_client_keeps_existing_hosts() {
        let mut table = sample_table();
        table.add_client("/otherexport", "10.0.0.0/16", None).unwrap();
        let export = table.get("/otherexport").unwrap();
        assert_eq!(export.client_count(), 2);
        assert_eq!(export.options("192.168.0.1"), Some(&opts(&["rw"])));
        assert_eq!(table.get("/export").unwrap().client_count(), 3);
    }

    #[test]
    fn test_add_client_duplicate_host_fails_unchanged() {
        let mut table = sample_table();
        let before = table.clone();
        let err = table
            .add_client("/export", "hostname", Some(opts(&["ro"])))
            .unwrap_err();
        assert!(matches!(err, ExportError::ClientExists { .. }));
        assert_eq!(table, before);
    }

    #[test]
    fn test_add_client_rejects_unparsable_grants() {
        let mut table = sample_table();
        let before = table.clone();
        for (host, options) in [
            ("Client01", ClientOptions::new()),
            ("h1 h2", ClientOptions::new()),
            ("h1", opts(&["rw,sync"])),
            ("h1", opts(&["#rw"])),
            ("h1", opts(&[""])),
        ] {
            let err = table.add_client("/export", host, Some(options)).unwrap_err();
            assert!(matches!(err, ExportError::InvalidClient { .. }));
        }
        assert_eq!(table, before);
    }

    #[test]
    fn test_remove_client_keeps_other_grants() {
        let mut table = sample_table();
        table.remove_client("/export", "192.168.100.0/24").unwrap();
        let expected = ExportTable::deserialize([
            "/export 192.168.0.1(rw) hostname(rw)",
            "/otherexport 192.168.0.1(rw)",
        ])
        .unwrap();
        assert_eq!(table, expected);
    }

    #[test]
    fn test_remove_last_client_drops_export() {
        let mut table = sample_table();
        table.remove_client("/otherexport", "192.168.0.1").unwrap();
        assert!(!table.contains("/otherexport"));
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn test_remove_client_unknown_export() {
        let mut table = sample_table();
        let err = table.remove_client("/missing", "hostname").unwrap_err();
        assert!(matches!(err, ExportError::ExportNotFound { .. }));
    }

    #[test]
    fn test_remove_client_unknown_host() {
        let mut table = sample_table();
        let before = table.clone();
        let err = table.remove_client("/export", "ungranted").unwrap_err();
        assert!(matches!(err, ExportError::ClientNotFound { .. }));
        assert_eq!(table, before);
    }

    #[test]
    fn test_grant_revoke_lifecycle() {
        let mut table = ExportTable::new();
        table.add_client("/share", "h1", Some(opts(&["rw"]))).unwrap();
        table.add_client("/share", "h2", Some(ClientOptions::new())).unwrap();

        let reparsed: ExportTable = table.serialize().parse().unwrap();
        assert_eq!(reparsed, table);
        let share = reparsed.get("/share").unwrap();
        assert_eq!(share.options("h1"), Some(&opts(&["rw"])));
        assert_eq!(share.options("h2"), Some(&ClientOptions::new()));

        table.remove_client("/share", "h1").unwrap();
        let share = table.get("/share").unwrap();
        assert_eq!(share.client_count(), 1);
        assert!(share.has_client("h2"));

        table.remove_client("/share", "h2").unwrap();
        assert!(table.is_empty());
        assert_eq!(table.serialize(), "\n");
    }

    #[test]
    fn test_equality_ignores_insertion_order() {
        let a = ExportTable::deserialize(["/a h1", "/b h2"]).unwrap();
        let b = ExportTable::deserialize(["/b h2", "/a h1"]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_iter_visits_every_export() {
        let table = sample_table();
        let points: Vec<&str> = table.iter().map(Export::export_point).collect();
        assert_eq!(points, vec!["/export", "/otherexport"]);
        assert_eq!((&table).into_iter().count(), 2);
    }

    proptest! {
        #[test]
        fn prop_table_roundtrip(exports in prop::collection::vec(arb_export(), 0..20)) {
            let table = ExportTable::from_exports(exports);
            let text = table.serialize();
            let parsed = ExportTable::deserialize(text.lines()).unwrap();
            prop_assert_eq!(parsed, table);
        }

        #[test]
        fn prop_add_then_remove_restores_table(
            exports in prop::collection::vec(arb_export(), 0..8),
            host in "[a-z]{1,8}\\.test",
        ) {
            let table = ExportTable::from_exports(exports);
            let mut mutated = table.clone();
            mutated.add_client("/prop-share", &host, None).unwrap();
            mutated.remove_client("/prop-share", &host).unwrap();
            prop_assert_eq!(mutated, table);
        }
    }
}
