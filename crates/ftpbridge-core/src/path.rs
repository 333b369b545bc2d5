//! # Path Rules
//!
//! Folder normalization and archive destination templates.
//!
//! ## Archive Template Shapes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  recursive │ grouped │ destination                                      │
//! │  ──────────┼─────────┼───────────────────────────────────────────────── │
//! │  yes       │ yes     │ <archive>/<date>/<parent>/<ts>-<name>            │
//! │  yes       │ no      │ <archive>/<parent>/<ts>-<name>                   │
//! │  no        │ yes     │ <archive>/<date>/<ts>-<name>                     │
//! │  no        │ no      │ <archive>/<ts>-<name>                            │
//! │                                                                         │
//! │  <ts> = yyyyMMddHHmmss    <date> = GroupingPolicy format                │
//! │  Empty segments (root archive, file at scan root) are omitted.         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The template is computed once per endpoint; only its date, parent and
//! name placeholders change from file to file.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::grouping::GroupingPolicy;
use crate::ARCHIVE_TIMESTAMP_FORMAT;

// =============================================================================
// Normalization
// =============================================================================

/// Normalizes a configured folder.
///
/// Surrounding whitespace and slashes are removed, so `"/a/b/"` becomes
/// `"a/b"` and `"/"` becomes `""` (the remote root). Runs of slashes are
/// stripped entirely, not one at a time: `"//a//"` becomes `"a"`. The
/// function is total and idempotent.
pub fn normalize_folder(path: &str) -> String {
    path.trim_matches(|c: char| c == '/' || c.is_whitespace())
        .to_string()
}

/// Joins path segments with `/`, skipping empty ones.
pub fn join_segments<'a, I>(segments: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    segments
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// Splits a remote path into its parent folder and file name.
pub fn split_parent(path: &str) -> (&str, &str) {
    let path = path.trim_end_matches('/');
    match path.rfind('/') {
        Some(idx) => (&path[..idx], &path[idx + 1..]),
        None => ("", path),
    }
}

/// Strips `folder` from the front of `path` on a segment boundary.
///
/// An empty folder is the root and strips nothing.
pub fn strip_folder<'a>(path: &'a str, folder: &str) -> Option<&'a str> {
    if folder.is_empty() {
        return Some(path);
    }
    let rest = path.strip_prefix(folder)?;
    if rest.is_empty() {
        Some(rest)
    } else {
        rest.strip_prefix('/')
    }
}

/// Returns the name a file carried before it was archived.
///
/// Archived names are `<ts>-<name>`; everything up to and including the
/// first `-` is dropped. Names without a dash are returned unchanged.
pub fn original_file_name(archived_name: &str) -> &str {
    match archived_name.split_once('-') {
        Some((_, name)) => name,
        None => archived_name,
    }
}

// =============================================================================
// Archive Template
// =============================================================================

/// Which of the four destination shapes an endpoint uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateShape {
    RecursiveGrouped,
    RecursiveUngrouped,
    FlatGrouped,
    FlatUngrouped,
}

impl TemplateShape {
    /// Selects the shape for a recursion flag and grouping policy.
    pub fn select(recursive: bool, policy: GroupingPolicy) -> Self {
        match (recursive, policy.is_grouped()) {
            (true, true) => TemplateShape::RecursiveGrouped,
            (true, false) => TemplateShape::RecursiveUngrouped,
            (false, true) => TemplateShape::FlatGrouped,
            (false, false) => TemplateShape::FlatUngrouped,
        }
    }

    pub fn has_date(&self) -> bool {
        matches!(
            self,
            TemplateShape::RecursiveGrouped | TemplateShape::FlatGrouped
        )
    }

    pub fn has_parent(&self) -> bool {
        matches!(
            self,
            TemplateShape::RecursiveGrouped | TemplateShape::RecursiveUngrouped
        )
    }
}

/// Archive destination template of one endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArchiveTemplate {
    archive_folder: String,
    policy: GroupingPolicy,
    shape: TemplateShape,
}

/// Builds the archive template for an already-normalized archive folder.
pub fn compute_archive_target(
    archive_folder: &str,
    policy: GroupingPolicy,
    recursive: bool,
) -> ArchiveTemplate {
    ArchiveTemplate {
        archive_folder: archive_folder.to_string(),
        policy,
        shape: TemplateShape::select(recursive, policy),
    }
}

impl ArchiveTemplate {
    pub fn archive_folder(&self) -> &str {
        &self.archive_folder
    }

    pub fn policy(&self) -> GroupingPolicy {
        self.policy
    }

    pub fn shape(&self) -> TemplateShape {
        self.shape
    }

    /// Placeholder form of the template, as shown in wire descriptors.
    ///
    /// ```rust
    /// use ftpbridge_core::grouping::GroupingPolicy;
    /// use ftpbridge_core::path::compute_archive_target;
    ///
    /// let t = compute_archive_target("done", GroupingPolicy::Daily, true);
    /// assert_eq!(t.pattern(), "done/{yyyy-MM-dd}/{parent}/{yyyyMMddHHmmss}-{name}");
    /// ```
    pub fn pattern(&self) -> String {
        let date = self
            .policy
            .format_key()
            .filter(|_| self.shape.has_date())
            .map(|key| format!("{{{}}}", key));
        let parent = self.shape.has_parent().then_some("{parent}");

        join_segments([
            self.archive_folder.as_str(),
            date.as_deref().unwrap_or(""),
            parent.unwrap_or(""),
            "{yyyyMMddHHmmss}-{name}",
        ])
    }

    /// Renders the destination of a file named `name` found in `parent` at `now`.
    ///
    /// `parent` is ignored for flat templates.
    pub fn render(&self, now: NaiveDateTime, parent: &str, name: &str) -> String {
        let date = if self.shape.has_date() {
            self.policy.format_date(now.date())
        } else {
            None
        };
        let parent = if self.shape.has_parent() {
            normalize_folder(parent)
        } else {
            String::new()
        };
        let file = format!("{}-{}", now.format(ARCHIVE_TIMESTAMP_FORMAT), name);

        join_segments([
            self.archive_folder.as_str(),
            date.as_deref().unwrap_or(""),
            parent.as_str(),
            file.as_str(),
        ])
    }

    /// Relative path of a file's parent below the input folder.
    ///
    /// `observed_parent` may be either the original parent (`inbox/sub`) or
    /// the parent of the archived copy (`done/2024-03/inbox/sub`); the
    /// archive prefix and date segment are dropped before the input folder
    /// is stripped. Paths outside the input folder are returned as-is.
    pub fn relative_parent(&self, observed_parent: &str, input_folder: &str) -> String {
        let observed = normalize_folder(observed_parent);
        let mut rest = observed.as_str();

        if !self.archive_folder.is_empty() {
            if let Some(inside) = strip_folder(rest, &self.archive_folder) {
                rest = inside;
                if self.shape.has_date() {
                    rest = rest.split_once('/').map(|(_, r)| r).unwrap_or("");
                }
            }
        }

        let rest = strip_folder(rest, input_folder).unwrap_or(rest);
        normalize_folder(rest)
    }
}

impl std::fmt::Display for ArchiveTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.pattern())
    }
}
