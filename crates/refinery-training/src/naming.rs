//! Artifact name derivation.
//!
//! Target names have the shape `<base>:<version>`. The base comes from the
//! human job name, the version defaults to `latest`.

use once_cell::sync::Lazy;
use regex::Regex;

const LATEST: &str = "latest";

static NAME_DISALLOWED: Lazy<Regex> = Lazy::new(|| compiled(r"[^a-zA-Z0-9\s-]"));
static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| compiled(r"\s+"));
static HYPHEN_RUN: Lazy<Regex> = Lazy::new(|| compiled(r"-+"));
static VERSION_DISALLOWED: Lazy<Regex> = Lazy::new(|| compiled(r"[^a-zA-Z0-9\-_.]"));
static PACKAGE_DISALLOWED: Lazy<Regex> = Lazy::new(|| compiled(r"[^a-zA-Z0-9.-]"));

fn compiled(pattern: &str) -> Regex {
    Regex::new(pattern).expect("static naming pattern is valid")
}

/// Derives the target artifact name from a human name and optional version.
///
/// `"My Cool Model!!"` becomes `my-cool-model:latest`; with version `"1.0"`
/// it becomes `my-cool-model:1.0`.
#[must_use]
pub fn derive_target_name(name: &str, version: Option<&str>) -> String {
    let base = sanitize_base(name);
    match version.map(str::trim).filter(|v| !v.is_empty()) {
        Some(version) => format!("{base}:{}", sanitize_version(version)),
        None => format!("{base}:{LATEST}"),
    }
}

fn sanitize_base(name: &str) -> String {
    let stripped = NAME_DISALLOWED.replace_all(name, "");
    let hyphenated = WHITESPACE_RUN.replace_all(&stripped, "-").to_lowercase();
    let collapsed = HYPHEN_RUN.replace_all(&hyphenated, "-");
    collapsed.trim_matches('-').to_string()
}

fn sanitize_version(version: &str) -> String {
    VERSION_DISALLOWED.replace_all(version, "-").to_lowercase()
}

/// Re-sanitizes a target name right before packaging.
///
/// The version suffix after the first `:` is kept verbatim; names without a
/// suffix get `:latest`.
#[must_use]
pub fn packaging_name(target: &str) -> String {
    match target.split_once(':') {
        Some((base, version)) => format!("{}:{version}", sanitize_package_base(base)),
        None => format!("{}:{LATEST}", sanitize_package_base(target)),
    }
}

fn sanitize_package_base(base: &str) -> String {
    PACKAGE_DISALLOWED
        .replace_all(&base.to_lowercase(), "-")
        .trim_matches('-')
        .to_string()
}

/// Replaces the version suffix of `name` with `latest`.
#[must_use]
pub fn latest_alias(name: &str) -> String {
    format!("{}:{LATEST}", base_name(name))
}

/// Directory name used for an artifact on disk (`:` and `/` become `_`).
#[must_use]
pub fn artifact_dir_name(name: &str) -> String {
    name.replace([':', '/'], "_")
}

/// Base part of an artifact name (everything before the first `:`).
#[must_use]
pub fn base_name(name: &str) -> &str {
    name.split_once(':').map_or(name, |(base, _)| base)
}
