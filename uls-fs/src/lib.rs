//! UTF-8 filesystem helpers built on `cap-std` and `camino`.
//!
//! Archive readers and the store use these helpers so path handling stays
//! consistent across zip files, unpacked directories and database files.
#![forbid(unsafe_code)]

use camino::{Utf8Path, Utf8PathBuf};
use cap_std::{ambient_authority, fs_utf8};
use std::io;
use std::path::Component;

/// Open a file for reading using ambient authority.
pub fn open_utf8_file(path: &Utf8Path) -> io::Result<fs_utf8::File> {
    fs_utf8::File::open_ambient(path, ambient_authority())
}

/// Read a whole UTF-8 text file.
pub fn read_utf8_file(path: &Utf8Path) -> io::Result<String> {
    let (dir, name) = parent_dir_and_name(path)?;
    dir.read_to_string(name.as_str())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Utf8Path) -> io::Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_str().is_empty() || parent == Utf8Path::new("/") {
        return Ok(());
    }
    let (base, relative) = split_ambient_base(parent)?;
    if relative.as_str().is_empty() {
        return Ok(());
    }
    base.create_dir_all(&relative)
}

/// Whether `path` exists and is a regular file.
pub fn file_is_file(path: &Utf8Path) -> io::Result<bool> {
    let (dir, name) = match parent_dir_and_name(path) {
        Ok(found) => found,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(err) => return Err(err),
    };
    match dir.metadata(name.as_str()) {
        Ok(meta) => Ok(meta.is_file()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(err) => Err(err),
    }
}

/// Whether `path` exists and is a directory.
pub fn dir_is_dir(path: &Utf8Path) -> io::Result<bool> {
    match fs_utf8::Dir::open_ambient_dir(path, ambient_authority()) {
        Ok(_) => Ok(true),
        Err(err) if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) => {
            Ok(false)
        }
        Err(err) => Err(err),
    }
}

/// List regular files in `dir` whose extension matches `extension`
/// case-insensitively, sorted by file name.
///
/// Sub-directories are not descended into.
pub fn list_files_with_extension(dir: &Utf8Path, extension: &str) -> io::Result<Vec<Utf8PathBuf>> {
    list_files_where(dir, |name| {
        Utf8Path::new(name)
            .extension()
            .is_some_and(|found| found.eq_ignore_ascii_case(extension))
    })
}

/// List regular files in `dir` whose name matches the wildcard `pattern`,
/// sorted by file name. See [`name_matches`] for the pattern syntax.
pub fn list_files_matching(dir: &Utf8Path, pattern: &str) -> io::Result<Vec<Utf8PathBuf>> {
    list_files_where(dir, |name| name_matches(pattern, name))
}

/// Match a file name against a wildcard pattern, ignoring ASCII case.
///
/// `*` matches any run of characters and `?` matches exactly one.
///
/// # Examples
/// ```
/// use uls_fs::name_matches;
///
/// assert!(name_matches("*.zip", "l_amat.ZIP"));
/// assert!(name_matches("l_am_???.zip", "l_am_mon.zip"));
/// assert!(!name_matches("l_am_*.zip", "l_amat.zip"));
/// ```
#[must_use]
pub fn name_matches(pattern: &str, name: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().map(|c| c.to_ascii_lowercase()).collect();
    let name: Vec<char> = name.chars().map(|c| c.to_ascii_lowercase()).collect();
    let (mut p, mut n) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;
    while n < name.len() {
        match pattern.get(p).copied() {
            Some('*') => {
                backtrack = Some((p, n));
                p += 1;
            }
            Some(expected) if expected == '?' || name.get(n) == Some(&expected) => {
                p += 1;
                n += 1;
            }
            _ => match backtrack {
                Some((star, consumed)) => {
                    p = star + 1;
                    n = consumed + 1;
                    backtrack = Some((star, consumed + 1));
                }
                None => return false,
            },
        }
    }
    pattern.iter().skip(p).all(|c| *c == '*')
}

fn list_files_where<F>(dir: &Utf8Path, mut keep: F) -> io::Result<Vec<Utf8PathBuf>>
where
    F: FnMut(&str) -> bool,
{
    let handle = fs_utf8::Dir::open_ambient_dir(dir, ambient_authority())?;
    let mut names = Vec::new();
    for entry in handle.entries()? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        let name = entry.file_name()?;
        if keep(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names.into_iter().map(|name| dir.join(name)).collect())
}

fn parent_dir_and_name(path: &Utf8Path) -> io::Result<(fs_utf8::Dir, String)> {
    let parent = path
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or_else(|| Utf8Path::new("."));
    let name = path
        .file_name()
        .ok_or_else(|| io::Error::other(format!("{path} does not name a file")))?
        .to_owned();
    let dir = fs_utf8::Dir::open_ambient_dir(parent, ambient_authority())?;
    Ok((dir, name))
}

/// Split `parent` into an ambient base directory (root, drive prefix or the
/// working directory) and the path relative to it.
fn split_ambient_base(parent: &Utf8Path) -> io::Result<(fs_utf8::Dir, Utf8PathBuf)> {
    let std_parent = parent.as_std_path();
    let (base, relative) = match std_parent.components().next() {
        Some(Component::Prefix(prefix)) => {
            let prefix = prefix
                .as_os_str()
                .to_str()
                .ok_or_else(|| io::Error::other("non-UTF-8 path prefix"))?;
            let base = Utf8PathBuf::from(prefix).join(std::path::MAIN_SEPARATOR.to_string());
            let relative = parent
                .strip_prefix(&base)
                .or_else(|_| parent.strip_prefix(prefix))
                .map_err(|_| io::Error::other("failed to strip prefix from parent path"))?
                .to_owned();
            (base, relative)
        }
        Some(Component::RootDir) => {
            let base = Utf8PathBuf::from(std::path::MAIN_SEPARATOR.to_string());
            let relative = parent
                .strip_prefix(&base)
                .map_err(|_| io::Error::other("failed to strip root from absolute path"))?
                .to_owned();
            (base, relative)
        }
        _ => (Utf8PathBuf::from("."), parent.to_owned()),
    };
    let dir = fs_utf8::Dir::open_ambient_dir(&base, ambient_authority())?;
    Ok((dir, relative))
}
