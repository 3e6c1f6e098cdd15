use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

const GOOD_PATTERN: &str = "*.good.json";
const BAD_PATTERN: &str = "*.bad.json";
const ALL_PATTERN: &str = "*.json";

/// Which assertion a case runs against its fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CheckKind {
    /// Subject must exit 0 and re-emit semantically equivalent JSON.
    Good,
    /// Subject must exit non-zero.
    Bad,
    /// Subject run under the leak wrapper must exit 0.
    Leaks,
}

impl CheckKind {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            CheckKind::Good => "good",
            CheckKind::Bad => "bad",
            CheckKind::Leaks => "leaks",
        }
    }
}

/// One planned test case. The full list is materialized before any check
/// runs, so the case set is inspectable (`--list`) and reproducible.
#[derive(Debug, Clone)]
pub(crate) struct CaseDecl {
    pub id: String,
    pub kind: CheckKind,
    pub fixture: PathBuf,
}

/// Fixture paths by suffix classification, each sorted by file name.
/// `all` holds every `*.json` including the good/bad files.
#[derive(Debug, Default)]
pub(crate) struct FixtureSet {
    pub good: Vec<PathBuf>,
    pub bad: Vec<PathBuf>,
    pub all: Vec<PathBuf>,
}

fn build_globset() -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pat in [GOOD_PATTERN, BAD_PATTERN, ALL_PATTERN] {
        builder.add(Glob::new(pat).with_context(|| format!("invalid fixture glob: {pat:?}"))?);
    }
    builder.build().context("build fixture globset")
}

/// Lists `dir` (non-recursively) and classifies every matching file name.
/// Dot-prefixed names are skipped. An empty directory yields empty sets;
/// only the listing itself failing is an error. Fixture contents are not
/// opened here.
pub(crate) fn scan_fixture_dir(dir: &Path) -> Result<FixtureSet> {
    let globs = build_globset()?;
    let mut set = FixtureSet::default();

    let entries =
        std::fs::read_dir(dir).with_context(|| format!("list fixture dir: {}", dir.display()))?;
    for entry in entries {
        let entry =
            entry.with_context(|| format!("list fixture dir: {}", dir.display()))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let matched = globs.matches(Path::new(&name));
        if matched.is_empty() {
            continue;
        }
        if matched.contains(&0) {
            set.good.push(path.clone());
        }
        if matched.contains(&1) {
            set.bad.push(path.clone());
        }
        if matched.contains(&2) {
            set.all.push(path);
        }
    }

    set.good.sort();
    set.bad.sort();
    set.all.sort();
    Ok(set)
}

/// Expands a fixture set into the case list: one good case per good
/// fixture, one bad case per bad fixture, and (only when a leak tool is
/// in play) one leaks case per `*.json` file. Sorted by id.
pub(crate) fn plan_cases(set: &FixtureSet, include_leaks: bool) -> Vec<CaseDecl> {
    let mut cases: Vec<CaseDecl> = Vec::new();
    for path in &set.good {
        cases.push(decl(CheckKind::Good, path));
    }
    for path in &set.bad {
        cases.push(decl(CheckKind::Bad, path));
    }
    if include_leaks {
        for path in &set.all {
            cases.push(decl(CheckKind::Leaks, path));
        }
    }
    cases.sort_by(|a, b| a.id.cmp(&b.id));
    cases
}

fn decl(kind: CheckKind, path: &Path) -> CaseDecl {
    let name = match path.file_name() {
        Some(n) => n.to_string_lossy().into_owned(),
        None => path.display().to_string(),
    };
    CaseDecl {
        id: format!("{}/{}", kind.as_str(), name),
        kind,
        fixture: path.to_path_buf(),
    }
}
