//! Contact-point discovery and extraction.
//!
//! The contact-points tree mirrors the container tree by relative path:
//! a file stored at `<contact_points_dir>/<rel>` pairs with
//! `<container_root>/<rel>`.
//!
//! [`discover`] fills the runtime record by pairing every contact-point
//! file with its container counterpart; files without a counterpart
//! (deleted, renamed, or rewritten upstream) go to the error record only
//! and are left for manual resolution.
//!
//! [`extract`] is the earlier phase: it scans the configured container
//! subtrees for files carrying the marker token and copies them into the
//! contact-points tree, validating marker structure on the way.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::AppConfig;
use crate::errors::{CoreError, DiscoveryError};
use crate::marker;
use crate::policy::FilePolicy;
use crate::record::{ErrorEntry, ErrorRecord, RuntimeEntry, RuntimeRecord};

// ---------------------------------------------------------------------------
// Tree walking
// ---------------------------------------------------------------------------

/// All regular files under `root`, as sorted forward-slash paths relative
/// to `root`.
fn walk_relative(root: &Path) -> Result<Vec<String>, DiscoveryError> {
    if !root.is_dir() {
        return Err(DiscoveryError::RootNotFound(root.display().to_string()));
    }
    let mut files = Vec::new();
    walk_into(root, root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_into(root: &Path, dir: &Path, out: &mut Vec<String>) -> Result<(), DiscoveryError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            // Nested repositories and VCS metadata are not contact points.
            if path.file_name().is_some_and(|n| n == ".git") {
                continue;
            }
            walk_into(root, &path, out)?;
        } else if file_type.is_file() {
            out.push(rel_string(root, &path)?);
        }
    }
    Ok(())
}

/// `path` relative to `root`, forward-slash separated.
fn rel_string(root: &Path, path: &Path) -> Result<String, DiscoveryError> {
    let rel = path
        .strip_prefix(root)
        .map_err(|_| DiscoveryError::OutsideRoot {
            root: root.display().to_string(),
            path: path.display().to_string(),
        })?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Counts from a discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryReport {
    /// Entries queued for a normal merge.
    pub matched: usize,
    /// Entries queued for whole-file copy.
    pub pure_copies: usize,
    /// Contact points with no container counterpart (error record only).
    pub unmatched: usize,
    /// Files skipped by the file policy.
    pub skipped: usize,
}

/// Walk the contact-points tree and fill the runtime record with one
/// entry per matched file. The record is persisted once, after the walk.
pub fn discover(
    config: &AppConfig,
    record: &mut RuntimeRecord,
    errors: &ErrorRecord,
) -> Result<DiscoveryReport, CoreError> {
    let contact_dir = &config.trees.contact_points_dir;
    let container_root = &config.trees.container_root;
    let policy = FilePolicy::from_options(&config.options);
    let token = &config.marker.token;

    info!(
        contact_dir = %contact_dir.display(),
        container = %container_root.display(),
        "matching contact points against the container tree"
    );

    let mut report = DiscoveryReport::default();

    for rel in walk_relative(contact_dir)? {
        if !policy.evaluate_path(contact_dir, &rel).is_allowed() {
            report.skipped += 1;
            continue;
        }

        let candidate = container_root.join(&rel);
        if !candidate.is_file() {
            warn!(path = %rel, "no counterpart in container tree — needs manual resolution");
            errors.append(&ErrorEntry::new(
                rel.clone(),
                "",
                "not found in container tree (deleted, renamed, or rewritten upstream)",
            ))?;
            report.unmatched += 1;
            continue;
        }

        let contact_path = contact_dir.join(&rel);
        match fs::read_to_string(&contact_path) {
            Ok(text) if marker::is_pure_copy(&text, token) => {
                debug!(path = %rel, "whole file is marker content — queued as pure copy");
                record.push(RuntimeEntry::pure_copy(rel.clone(), rel));
                report.pure_copies += 1;
            }
            Ok(_) => {
                debug!(path = %rel, "queued for merge");
                record.push(RuntimeEntry::merge(rel.clone(), rel));
                report.matched += 1;
            }
            Err(e) => {
                warn!(path = %rel, error = %e, "contact point is not readable text");
                errors.append(&ErrorEntry::new(rel, "", format!("unreadable: {e}")))?;
                report.unmatched += 1;
            }
        }
    }

    record.save()?;
    info!(
        matched = report.matched,
        pure_copies = report.pure_copies,
        unmatched = report.unmatched,
        skipped = report.skipped,
        "discovery complete"
    );
    Ok(report)
}

// ---------------------------------------------------------------------------
// Extraction
// ---------------------------------------------------------------------------

/// Counts from an extraction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtractReport {
    /// Marker-bearing files copied into the contact-points tree.
    pub copied: usize,
    /// Files skipped by the file policy.
    pub skipped: usize,
    /// Files with malformed marker structure (error record only).
    pub malformed: usize,
}

/// Scan the configured container subtrees for files containing the marker
/// token and copy them into the contact-points tree, preserving relative
/// paths. Files with unbalanced markers are reported and skipped.
pub fn extract(config: &AppConfig, errors: &ErrorRecord) -> Result<ExtractReport, CoreError> {
    let container_root = &config.trees.container_root;
    let contact_dir = &config.trees.contact_points_dir;
    let policy = FilePolicy::from_options(&config.options);
    let token = &config.marker.token;

    let roots: Vec<PathBuf> = if config.trees.source_roots.is_empty() {
        vec![container_root.clone()]
    } else {
        config
            .trees
            .source_roots
            .iter()
            .map(|r| container_root.join(r))
            .collect()
    };

    let mut report = ExtractReport::default();

    for scan_root in &roots {
        info!(root = %scan_root.display(), "scanning for contact points");
        for rel_to_scan in walk_relative(scan_root)? {
            let full = scan_root.join(&rel_to_scan);
            // The contact-points tree may live inside the container; its
            // own files are never extraction candidates.
            if full.starts_with(contact_dir) {
                continue;
            }
            let rel = rel_string(container_root, &full)?;

            if !policy.evaluate(&rel, fs::metadata(&full)?.len()).is_allowed() {
                report.skipped += 1;
                continue;
            }

            // Only text files can carry the marker.
            let Ok(text) = fs::read_to_string(&full) else {
                continue;
            };
            if !text.contains(token.as_str()) {
                continue;
            }

            if let Err(e) = marker::validate_markers(&text, token) {
                warn!(path = %rel, error = %e, "malformed markers — fix the file and re-extract");
                errors.append(&ErrorEntry::new(rel, "", e.to_string()))?;
                report.malformed += 1;
                continue;
            }

            let target = contact_dir.join(&rel);
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(&full, &target)?;
            debug!(path = %rel, "extracted contact point");
            report.copied += 1;
        }
    }

    info!(
        copied = report.copied,
        skipped = report.skipped,
        malformed = report.malformed,
        "extraction complete"
    );
    Ok(report)
}
