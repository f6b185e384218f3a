//! Archive utilities
//!
//! Blocking filesystem primitives: tar, untar and gzip, glob-based listing, path
//! containment checks and cleanup bounded to the work root. Async callers run these
//! inside `tokio::task::spawn_blocking`.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::contents::{enumerate_contents, ContentsReport};
use crate::error::{ArchiveError, ArchiveResult};

/// Include/exclude glob filter over paths relative to a root.
#[derive(Debug, Clone, Default)]
pub struct GlobFilter {
    include: Option<GlobSet>,
    exclude: Option<GlobSet>,
}

impl GlobFilter {
    pub fn new(include: &[String], exclude: &[String]) -> ArchiveResult<Self> {
        Ok(Self {
            include: build_set(include)?,
            exclude: build_set(exclude)?,
        })
    }

    /// `true` if `relative` matches an include pattern (or there are none) and no
    /// exclude pattern.
    pub fn matches(&self, relative: &str) -> bool {
        let included = self
            .include
            .as_ref()
            .map(|set| set.is_match(relative))
            .unwrap_or(true);
        let excluded = self
            .exclude
            .as_ref()
            .map(|set| set.is_match(relative))
            .unwrap_or(false);
        included && !excluded
    }
}

fn build_set(patterns: &[String]) -> ArchiveResult<Option<GlobSet>> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(Some(builder.build()?))
}

/// Forward-slash path of `path` relative to `root`.
pub fn relative_str(root: &Path, path: &Path) -> ArchiveResult<String> {
    let relative = path
        .strip_prefix(root)
        .map_err(|_| ArchiveError::PathEscape {
            path: path.to_path_buf(),
            root: root.to_path_buf(),
        })?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/"))
}

/// Join `relative` onto `root`, rejecting absolute paths and `..` components.
pub fn resolve_within(root: &Path, relative: &Path) -> ArchiveResult<PathBuf> {
    let mut resolved = root.to_path_buf();
    for component in relative.components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(ArchiveError::PathEscape {
                    path: relative.to_path_buf(),
                    root: root.to_path_buf(),
                });
            }
        }
    }
    Ok(resolved)
}

/// Whether `path` lies strictly below `root` without any `..` component.
pub fn is_within(root: &Path, path: &Path) -> bool {
    match path.strip_prefix(root) {
        Ok(rest) => {
            rest.components().next().is_some()
                && rest.components().all(|c| matches!(c, Component::Normal(_)))
        }
        Err(_) => false,
    }
}

/// Location in the work tree that mirrors `source` relative to `source_root`.
pub fn mirror_path(source_root: &Path, work_root: &Path, source: &Path) -> ArchiveResult<PathBuf> {
    let relative = source
        .strip_prefix(source_root)
        .map_err(|_| ArchiveError::PathEscape {
            path: source.to_path_buf(),
            root: source_root.to_path_buf(),
        })?;
    resolve_within(work_root, relative)
}

/// Fail with [`ArchiveError::PermissionDenied`] unless `path` can be read.
pub fn ensure_readable(path: &Path) -> ArchiveResult<()> {
    let metadata = fs::metadata(path).map_err(|e| ArchiveError::io(path, e))?;
    if metadata.is_dir() {
        fs::read_dir(path).map_err(|e| ArchiveError::io(path, e))?;
    } else {
        File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    }
    Ok(())
}

/// Files directly inside `dir` whose name matches `pattern`, sorted by name.
pub fn list_dir_glob(dir: &Path, pattern: &str) -> ArchiveResult<Vec<PathBuf>> {
    let matcher = Glob::new(pattern)?.compile_matcher();
    let mut found = Vec::new();
    for entry in fs::read_dir(dir).map_err(|e| ArchiveError::io(dir, e))? {
        let entry = entry.map_err(|e| ArchiveError::io(dir, e))?;
        if matcher.is_match(entry.file_name()) {
            found.push(entry.path());
        }
    }
    found.sort();
    Ok(found)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TarStats {
    pub files: usize,
    pub bytes: u64,
}

/// Tar `dir` into `dest`, with entries named `<dir name>/<relative path>`.
///
/// Members are exactly the `included` entries of [`enumerate_contents`]: subtrees named
/// in `exclude_folders` are pruned, broken symlinks and unreadable files are left out,
/// and symlinks to files are stored with their target's content.
pub fn tar_directory(
    dir: &Path,
    dest: &Path,
    exclude_folders: &[String],
    gzip: bool,
) -> ArchiveResult<TarStats> {
    let contents = enumerate_contents(dir, exclude_folders)?;
    let file = File::create(dest).map_err(|e| ArchiveError::io(dest, e))?;

    if gzip {
        let encoder = GzEncoder::new(BufWriter::new(file), Compression::default());
        let mut builder = tar::Builder::new(encoder);
        let stats = append_included(&mut builder, dir, &contents)?;
        let encoder = builder.into_inner().map_err(|e| ArchiveError::tar(dest, e))?;
        let mut writer = encoder.finish().map_err(|e| ArchiveError::io(dest, e))?;
        writer.flush().map_err(|e| ArchiveError::io(dest, e))?;
        Ok(stats)
    } else {
        let mut builder = tar::Builder::new(BufWriter::new(file));
        let stats = append_included(&mut builder, dir, &contents)?;
        let mut writer = builder.into_inner().map_err(|e| ArchiveError::tar(dest, e))?;
        writer.flush().map_err(|e| ArchiveError::io(dest, e))?;
        Ok(stats)
    }
}

fn append_included<W: Write>(
    builder: &mut tar::Builder<W>,
    dir: &Path,
    contents: &ContentsReport,
) -> ArchiveResult<TarStats> {
    let base_name = dir
        .file_name()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("root"));
    let mut stats = TarStats::default();

    for relative in &contents.included {
        let path = dir.join(relative);
        // Opening follows symlinks, so linked files are archived with their data.
        let mut source = File::open(&path).map_err(|e| ArchiveError::io(&path, e))?;
        builder
            .append_file(base_name.join(relative), &mut source)
            .map_err(|e| ArchiveError::tar(&path, e))?;
        stats.files += 1;
        stats.bytes += source.metadata().map(|m| m.len()).unwrap_or(0);
    }

    Ok(stats)
}

/// Tar the given files (all directly under `base_dir`) into `dest` by file name.
pub fn tar_files(base_dir: &Path, files: &[PathBuf], dest: &Path) -> ArchiveResult<TarStats> {
    let file = File::create(dest).map_err(|e| ArchiveError::io(dest, e))?;
    let mut builder = tar::Builder::new(BufWriter::new(file));
    let mut stats = TarStats::default();

    for path in files {
        let name = path.strip_prefix(base_dir).map_err(|_| ArchiveError::PathEscape {
            path: path.clone(),
            root: base_dir.to_path_buf(),
        })?;
        let mut source = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
        builder
            .append_file(name, &mut source)
            .map_err(|e| ArchiveError::tar(path, e))?;
        stats.files += 1;
        stats.bytes += source.metadata().map(|m| m.len()).unwrap_or(0);
    }

    builder
        .into_inner()
        .and_then(|mut w| w.flush())
        .map_err(|e| ArchiveError::tar(dest, e))?;
    Ok(stats)
}

fn open_archive(path: &Path) -> ArchiveResult<tar::Archive<Box<dyn Read>>> {
    let file = File::open(path).map_err(|e| ArchiveError::io(path, e))?;
    let gzipped = path
        .extension()
        .map(|ext| ext == "gz" || ext == "tgz")
        .unwrap_or(false);
    let reader: Box<dyn Read> = if gzipped {
        Box::new(GzDecoder::new(BufReader::new(file)))
    } else {
        Box::new(BufReader::new(file))
    };
    Ok(tar::Archive::new(reader))
}

/// Names of the regular-file members of a tar (gzip detected by extension).
pub fn list_tar_members(path: &Path) -> ArchiveResult<Vec<String>> {
    let mut archive = open_archive(path)?;
    let mut members = Vec::new();
    for entry in archive.entries().map_err(|e| ArchiveError::tar(path, e))? {
        let entry = entry.map_err(|e| ArchiveError::tar(path, e))?;
        if entry.header().entry_type().is_file() {
            let name = entry.path().map_err(|e| ArchiveError::tar(path, e))?;
            members.push(name.to_string_lossy().into_owned());
        }
    }
    Ok(members)
}

/// Extract one member of `tar_path` under `dest_dir`, unless it is already there.
/// Returns the member's path on disk and whether it was extracted by this call.
pub fn extract_member(tar_path: &Path, member: &str, dest_dir: &Path) -> ArchiveResult<(PathBuf, bool)> {
    let target = resolve_within(dest_dir, Path::new(member))?;
    if target.exists() {
        return Ok((target, false));
    }

    fs::create_dir_all(dest_dir).map_err(|e| ArchiveError::io(dest_dir, e))?;
    let mut archive = open_archive(tar_path)?;
    for entry in archive.entries().map_err(|e| ArchiveError::tar(tar_path, e))? {
        let mut entry = entry.map_err(|e| ArchiveError::tar(tar_path, e))?;
        let name = entry
            .path()
            .map_err(|e| ArchiveError::tar(tar_path, e))?
            .to_string_lossy()
            .into_owned();
        if name == member {
            let unpacked = entry
                .unpack_in(dest_dir)
                .map_err(|e| ArchiveError::tar(tar_path, e))?;
            if !unpacked {
                return Err(ArchiveError::PathEscape {
                    path: PathBuf::from(member),
                    root: dest_dir.to_path_buf(),
                });
            }
            return Ok((target, true));
        }
    }

    Err(ArchiveError::tar(
        tar_path,
        format!("member {} not found", member),
    ))
}

/// Gzip `source` into `dest`. Returns the compressed size.
pub fn gzip_file(source: &Path, dest: &Path) -> ArchiveResult<u64> {
    let mut input = BufReader::new(File::open(source).map_err(|e| ArchiveError::io(source, e))?);
    let output = File::create(dest).map_err(|e| ArchiveError::io(dest, e))?;
    let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
    io::copy(&mut input, &mut encoder).map_err(|e| ArchiveError::io(source, e))?;
    let mut writer = encoder.finish().map_err(|e| ArchiveError::io(dest, e))?;
    writer.flush().map_err(|e| ArchiveError::io(dest, e))?;
    fs::metadata(dest)
        .map(|m| m.len())
        .map_err(|e| ArchiveError::io(dest, e))
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovalReport {
    pub removed_file: bool,
    pub removed_dirs: Vec<PathBuf>,
}

/// Delete `path` and then every ancestor directory that became empty, stopping at
/// (and never removing) `work_root`. Paths outside the work root are refused.
///
/// Files or directories already removed by another worker count as removed; a
/// directory that is not empty ends the walk.
pub fn safe_remove_file_and_empty_parents(
    work_root: &Path,
    path: &Path,
    dry_run: bool,
) -> ArchiveResult<RemovalReport> {
    if !is_within(work_root, path) {
        return Err(ArchiveError::PathEscape {
            path: path.to_path_buf(),
            root: work_root.to_path_buf(),
        });
    }

    let mut report = RemovalReport::default();
    if dry_run {
        tracing::info!(path = %path.display(), "Dry run: would delete");
        return Ok(report);
    }

    let removal = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match removal {
        Ok(()) => report.removed_file = true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "Already removed");
        }
        Err(e) => return Err(ArchiveError::io(path, e)),
    }

    let mut current = path.parent();
    while let Some(dir) = current {
        if dir == work_root || !is_within(work_root, dir) {
            break;
        }
        match fs::remove_dir(dir) {
            Ok(()) => report.removed_dirs.push(dir.to_path_buf()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(dir = %dir.display(), "Directory already removed by another worker");
            }
            Err(e) => {
                let has_entries = fs::read_dir(dir)
                    .map(|mut entries| entries.next().is_some())
                    .unwrap_or(false);
                if has_entries {
                    break;
                }
                return Err(ArchiveError::io(dir, e));
            }
        }
        current = dir.parent();
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(path: &Path, content: &str) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let mut f = File::create(path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
    }

    #[test]
    fn glob_filter_applies_include_then_exclude() {
        let filter = GlobFilter::new(
            &["run*/**".to_string()],
            &["**/*.tmp".to_string()],
        )
        .unwrap();
        assert!(filter.matches("run1/a.dat"));
        assert!(!filter.matches("run1/a.tmp"));
        assert!(!filter.matches("other/a.dat"));
        assert!(GlobFilter::default().matches("anything"));
    }

    #[test]
    fn resolve_within_rejects_parent_components() {
        let root = Path::new("/work");
        assert_eq!(
            resolve_within(root, Path::new("a/b.tar")).unwrap(),
            PathBuf::from("/work/a/b.tar")
        );
        assert!(resolve_within(root, Path::new("../etc/passwd")).is_err());
        assert!(resolve_within(root, Path::new("/etc/passwd")).is_err());
    }

    #[test]
    fn is_within_is_strict() {
        let root = Path::new("/work");
        assert!(is_within(root, Path::new("/work/a")));
        assert!(!is_within(root, Path::new("/work")));
        assert!(!is_within(root, Path::new("/work/../etc")));
        assert!(!is_within(root, Path::new("/workshop/a")));
    }

    #[test]
    fn tar_directory_prunes_excluded_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("sample");
        touch(&dir.join("a.txt"), "a");
        touch(&dir.join("sub/b.txt"), "bb");
        touch(&dir.join("cache/c.txt"), "ccc");

        let dest = tmp.path().join("sample.tar");
        let stats = tar_directory(&dir, &dest, &["cache".to_string()], false).unwrap();
        assert_eq!(stats.files, 2);

        let mut members = list_tar_members(&dest).unwrap();
        members.sort();
        assert_eq!(members, vec!["sample/a.txt", "sample/sub/b.txt"]);
    }

    #[cfg(unix)]
    #[test]
    fn tar_members_match_contents_manifest() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("run1");
        touch(&dir.join("real.dat"), "hello");
        std::os::unix::fs::symlink(dir.join("missing.dat"), dir.join("broken")).unwrap();
        std::os::unix::fs::symlink(dir.join("real.dat"), dir.join("alias")).unwrap();

        let dest = tmp.path().join("run1.tar");
        let stats = tar_directory(&dir, &dest, &[], false).unwrap();
        assert_eq!(stats.files, 2);
        assert_eq!(stats.bytes, 10);

        let contents = enumerate_contents(&dir, &[]).unwrap();
        let mut expected: Vec<String> = contents
            .included
            .iter()
            .map(|name| format!("run1/{}", name))
            .collect();
        expected.sort();
        let mut members = list_tar_members(&dest).unwrap();
        members.sort();
        assert_eq!(members, expected);
        assert_eq!(members, vec!["run1/alias", "run1/real.dat"]);

        let mut archive = tar::Archive::new(File::open(&dest).unwrap());
        for entry in archive.entries().unwrap() {
            let mut entry = entry.unwrap();
            assert!(entry.header().entry_type().is_file());
            let mut body = String::new();
            entry.read_to_string(&mut body).unwrap();
            assert_eq!(body, "hello");
        }
    }

    #[test]
    fn extract_member_skips_existing_target() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("src");
        touch(&dir.join("x.txt"), "x");
        touch(&dir.join("y.txt"), "y");
        let tar_path = tmp.path().join("src.tar");
        tar_files(&dir, &[dir.join("x.txt"), dir.join("y.txt")], &tar_path).unwrap();

        let out = tmp.path().join("out");
        let (path, extracted) = extract_member(&tar_path, "y.txt", &out).unwrap();
        assert!(extracted);
        assert_eq!(fs::read_to_string(&path).unwrap(), "y");
        assert!(!out.join("x.txt").exists());

        let (_, extracted) = extract_member(&tar_path, "y.txt", &out).unwrap();
        assert!(!extracted);
    }

    #[test]
    fn gzip_round_trips_through_tar_reader() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        touch(&dir.join("f.txt"), "hello");
        let dest = tmp.path().join("d.tar.gz");
        tar_directory(&dir, &dest, &[], true).unwrap();
        assert_eq!(list_tar_members(&dest).unwrap(), vec!["d/f.txt"]);

        let plain = tmp.path().join("plain.txt");
        touch(&plain, &"x".repeat(4096));
        let size = gzip_file(&plain, &tmp.path().join("plain.txt.gz")).unwrap();
        assert!(size > 0 && size < 4096);
    }

    #[test]
    fn cleanup_removes_empty_parents_up_to_work_root() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        let file = root.join("a/b/c/part.tar");
        touch(&file, "t");
        touch(&root.join("a/keep.txt"), "k");

        let report = safe_remove_file_and_empty_parents(&root, &file, false).unwrap();
        assert!(report.removed_file);
        assert_eq!(report.removed_dirs.len(), 2);
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep.txt").exists());
        assert!(root.exists());
    }

    #[test]
    fn cleanup_tolerates_missing_file_and_refuses_escape() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        fs::create_dir_all(root.join("x")).unwrap();
        let outside = tmp.path().join("outside.txt");
        touch(&outside, "o");

        safe_remove_file_and_empty_parents(&root, &root.join("x/gone.tar"), false).unwrap();
        assert!(!root.join("x").exists());

        let crafted = root.join("../outside.txt");
        assert!(safe_remove_file_and_empty_parents(&root, &crafted, false).is_err());
        assert!(outside.exists());
    }

    #[test]
    fn dry_run_deletes_nothing() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("work");
        let file = root.join("a/f.tar");
        touch(&file, "t");
        safe_remove_file_and_empty_parents(&root, &file, true).unwrap();
        assert!(file.exists());
    }
}
