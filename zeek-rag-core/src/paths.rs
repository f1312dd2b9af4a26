//! Path helpers shared by the steps that write generated trees.

use std::path::{Component, Path, PathBuf};

/// Absolute, symlink-resolved form of `path`, which need not exist yet.
///
/// The longest existing ancestor is canonicalised and the remaining components are
/// appended lexically.
pub fn resolve(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut existing = absolute.as_path();
    let mut rest: Vec<&std::ffi::OsStr> = Vec::new();
    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut out = canonical;
            for part in rest.iter().rev() {
                out.push(part);
            }
            return normalize(&out);
        }
        match (existing.parent(), existing.file_name()) {
            (Some(parent), Some(name)) => {
                rest.push(name);
                existing = parent;
            }
            _ => return normalize(&absolute),
        }
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// True when `candidate` is `root` or lies below it.
pub fn is_same_or_inside(candidate: &Path, root: &Path) -> bool {
    resolve(candidate).starts_with(resolve(root))
}

/// True when either directory contains the other, so recreating one would destroy the other.
pub fn overlaps(a: &Path, b: &Path) -> bool {
    is_same_or_inside(a, b) || is_same_or_inside(b, a)
}

/// `/`-joined relative path, independent of the platform separator.
pub fn slash_path(relative: &Path) -> String {
    relative
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}
