//! Mix compile-manifest discovery and parsing.
//!
//! After a Mix build, each compiled application leaves a `.compile.elixir`
//! manifest under `_build/` recording Erlang tuples of the form
//! `{<<"path/to/Elixir.Mod.beam">>, 'Elixir.Mod', module, <<"lib/mod.ex">>}`.
//! This module locates those manifests and extracts the module entries so a
//! session can report what the project actually compiled.
//!
//! Parsing is textual, not a real Erlang term parser: tuples are matched
//! with a regex and fields split on commas, which is sufficient for the
//! paths and module atoms Mix writes. Tuples that do not carry the `module`
//! tag, or whose fields do not parse, are skipped.

use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// File name Mix gives its Elixir compiler manifest.
pub const MANIFEST_FILE_NAME: &str = ".compile.elixir";

/// One compiled module recorded in a manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    /// Path of the compiled `.beam`, relative to the project root.
    pub beam_file: String,
    /// Fully qualified module atom, e.g. `Elixir.Calculator`.
    pub module: String,
    /// Source file the module was compiled from.
    pub source: String,
}

/// Recursively collects every compile manifest under `build_dir`.
pub fn find_manifests(build_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_manifests(build_dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_manifests(dir: &Path, found: &mut Vec<PathBuf>) -> Result<()> {
    let entries = fs::read_dir(dir).map_err(|source| Error::BuildDirScan {
        path: dir.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| Error::BuildDirScan {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_manifests(&path, found)?;
        } else if path
            .file_name()
            .is_some_and(|name| name == MANIFEST_FILE_NAME)
        {
            found.push(path);
        }
    }
    Ok(())
}

/// Reads one manifest file and returns the module entries it records.
pub fn parse_manifest(path: &Path) -> Result<Vec<ManifestEntry>> {
    let raw = fs::read_to_string(path).map_err(|source| Error::ManifestRead {
        path: path.to_path_buf(),
        source,
    })?;
    let entries = parse_entries(&raw);
    debug!(
        manifest = %path.display(),
        modules = entries.len(),
        "parsed compile manifest"
    );
    Ok(entries)
}

/// Extracts module entries from raw manifest text.
pub fn parse_entries(raw: &str) -> Vec<ManifestEntry> {
    let tuple = Regex::new(r"(?s)\{(.*?)\}").expect("tuple pattern is valid");

    let mut entries = Vec::new();
    for caps in tuple.captures_iter(raw) {
        let fields: Vec<&str> = caps[1].split(',').map(str::trim).collect();
        // {beam_binary, module_atom, module, source_binary}
        if fields.len() < 4 || fields[2] != "module" {
            continue;
        }
        match (
            binary_literal(fields[0]),
            atom_literal(fields[1]),
            binary_literal(fields[3]),
        ) {
            (Some(beam_file), Some(module), Some(source)) => entries.push(ManifestEntry {
                beam_file,
                module,
                source,
            }),
            _ => warn!(tuple = &caps[1], "skipping malformed manifest tuple"),
        }
    }
    entries
}

/// Unwraps an Erlang binary literal: `<<"text">>`.
fn binary_literal(field: &str) -> Option<String> {
    field
        .strip_prefix("<<\"")
        .and_then(|rest| rest.strip_suffix("\">>"))
        .map(str::to_string)
}

/// Unwraps a quoted Erlang atom: `'Elixir.Mod'`.
fn atom_literal(field: &str) -> Option<String> {
    field
        .strip_prefix('\'')
        .and_then(|rest| rest.strip_suffix('\''))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE: &str = concat!(
        "{<<\"_build/dev/lib/calculator/ebin/Elixir.Calculator.beam\">>,",
        "'Elixir.Calculator',module,<<\"lib/calculator.ex\">>}.\n",
        "{<<\"lib/other.ex\">>,source}.\n",
        "{<<\"_build/dev/lib/calculator/ebin/Elixir.Calculator.CLI.beam\">>,",
        "'Elixir.Calculator.CLI',module,<<\"lib/cli.ex\">>}.\n",
    );

    #[test]
    fn parses_module_tuples() {
        let entries = parse_entries(SAMPLE);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].module, "Elixir.Calculator");
        assert_eq!(
            entries[0].beam_file,
            "_build/dev/lib/calculator/ebin/Elixir.Calculator.beam"
        );
        assert_eq!(entries[0].source, "lib/calculator.ex");
        assert_eq!(entries[1].module, "Elixir.Calculator.CLI");
    }

    #[test]
    fn skips_tuples_without_the_module_tag() {
        let entries = parse_entries("{<<\"lib/other.ex\">>,source}.");
        assert!(entries.is_empty());
    }

    #[test]
    fn skips_malformed_fields() {
        // Second field is not a quoted atom.
        let entries =
            parse_entries("{<<\"a.beam\">>,Elixir.Bad,module,<<\"lib/bad.ex\">>}.");
        assert!(entries.is_empty());
    }

    #[test]
    fn tuples_spanning_lines_still_parse() {
        let raw = "{<<\"a.beam\">>,\n 'Elixir.A',\n module,\n <<\"lib/a.ex\">>}.";
        let entries = parse_entries(raw);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].module, "Elixir.A");
    }

    #[test]
    fn finds_manifests_in_nested_build_dirs() {
        let dir = tempfile::tempdir().expect("create temp dir");
        let nested = dir.path().join("dev/lib/calculator/.mix");
        fs::create_dir_all(&nested).expect("create nested dirs");
        fs::write(nested.join(MANIFEST_FILE_NAME), SAMPLE).expect("write manifest");
        fs::write(nested.join("compile.lock"), "").expect("write decoy");

        let found = find_manifests(dir.path()).expect("scan build dir");
        assert_eq!(found.len(), 1);
        assert!(found[0].ends_with(".compile.elixir"));

        let entries = parse_manifest(&found[0]).expect("parse manifest");
        assert_eq!(entries.len(), 2);
    }

    #[test]
    fn missing_build_dir_is_an_error() {
        let err = find_manifests(Path::new("/nonexistent/_build"))
            .expect_err("scan should fail");
        assert!(matches!(err, Error::BuildDirScan { .. }));
    }
}
