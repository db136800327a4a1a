use std::collections::HashSet;

use url::Url;

use crate::bundle::FileReference;

/// A unique (destination, source) pair ready to be archived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedEntry {
    pub destination: String,
    pub source: String,
}

/// Compute archive destinations for a file list and drop collisions.
///
/// Entries without an explicit destination take the path of their source
/// URI. Destinations are normalized into safe entry names before they are
/// compared; the first entry claiming a name wins and later ones are
/// silently dropped, so resubmitting the same list is idempotent.
pub fn resolve_destinations(files: &[FileReference]) -> Vec<ResolvedEntry> {
    let mut seen = HashSet::with_capacity(files.len());
    let mut resolved = Vec::with_capacity(files.len());

    for file in files {
        let destination = match file.explicit_destination() {
            Some(explicit) => normalize_entry_name(explicit),
            None => derive_destination(&file.source),
        };

        if seen.insert(destination.clone()) {
            resolved.push(ResolvedEntry {
                destination,
                source: file.source.clone(),
            });
        }
    }

    resolved
}

/// Destination for a source with no explicit one: its normalized URI path,
/// falling back to the host when the path is empty.
pub fn derive_destination(source: &str) -> String {
    let (host, path) = split_source(source);
    let name = normalize_entry_name(&path);
    if name.is_empty() {
        normalize_entry_name(&host)
    } else {
        name
    }
}

/// Turn an arbitrary path into a relative archive entry name.
///
/// Backslashes are treated as separators; empty, `.` and `..` segments are
/// removed so the name can never escape the archive root.
pub fn normalize_entry_name(path: &str) -> String {
    path.split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != "." && *segment != "..")
        .collect::<Vec<_>>()
        .join("/")
}

/// Host and path (without query or fragment) of a source URI.
fn split_source(source: &str) -> (String, String) {
    if let Ok(url) = Url::parse(source) {
        let host = url.host_str().unwrap_or_default().to_owned();
        return (host, url.path().to_owned());
    }

    let without_suffix = source.split(['?', '#']).next().unwrap_or_default();
    match without_suffix.split_once("://") {
        Some((_scheme, rest)) => match rest.split_once('/') {
            Some((host, path)) => (host.to_owned(), path.to_owned()),
            None => (rest.to_owned(), String::new()),
        },
        None => (String::new(), without_suffix.to_owned()),
    }
}
