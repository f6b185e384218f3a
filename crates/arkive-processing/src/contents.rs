//! Tar-contents enumeration for directories archived whole.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{ArchiveError, ArchiveResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExclusionReason {
    BrokenSymlink,
    Unreadable,
    ExcludedFolder,
}

impl ExclusionReason {
    fn as_str(&self) -> &'static str {
        match self {
            ExclusionReason::BrokenSymlink => "broken symlink",
            ExclusionReason::Unreadable => "unreadable",
            ExclusionReason::ExcludedFolder => "excluded folder",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentsReport {
    /// Paths relative to the enumerated directory.
    pub included: Vec<String>,
    pub excluded: Vec<(String, ExclusionReason)>,
}

impl ContentsReport {
    /// Write the included and excluded listings, one path per line.
    pub fn write_manifests(&self, included_path: &Path, excluded_path: &Path) -> ArchiveResult<()> {
        let mut included = BufWriter::new(
            File::create(included_path).map_err(|e| ArchiveError::io(included_path, e))?,
        );
        for name in &self.included {
            writeln!(included, "{}", name).map_err(|e| ArchiveError::io(included_path, e))?;
        }
        included
            .flush()
            .map_err(|e| ArchiveError::io(included_path, e))?;

        let mut excluded = BufWriter::new(
            File::create(excluded_path).map_err(|e| ArchiveError::io(excluded_path, e))?,
        );
        for (name, reason) in &self.excluded {
            writeln!(excluded, "{}\t{}", name, reason.as_str())
                .map_err(|e| ArchiveError::io(excluded_path, e))?;
        }
        excluded
            .flush()
            .map_err(|e| ArchiveError::io(excluded_path, e))
    }
}

fn readable(path: &Path) -> bool {
    File::open(path).is_ok()
}

/// Classify every entry below `dir`. Excluded folders are recorded once and not
/// descended into.
pub fn enumerate_contents(dir: &Path, exclude_folders: &[String]) -> ArchiveResult<ContentsReport> {
    let mut report = ContentsReport::default();
    let mut walker = WalkDir::new(dir).min_depth(1).sort_by_file_name().into_iter();

    while let Some(entry) = walker.next() {
        let entry = entry?;
        let relative = relative_name(dir, entry.path())?;
        let file_type = entry.file_type();

        if file_type.is_dir() {
            let name = entry.file_name().to_string_lossy();
            if exclude_folders.iter().any(|f| f.as_str() == name) {
                report
                    .excluded
                    .push((relative, ExclusionReason::ExcludedFolder));
                walker.skip_current_dir();
            }
            continue;
        }

        if file_type.is_symlink() {
            match fs::metadata(entry.path()) {
                Ok(target) if target.is_file() && readable(entry.path()) => {
                    report.included.push(relative)
                }
                Ok(target) if target.is_dir() => {}
                Ok(_) => report.excluded.push((relative, ExclusionReason::Unreadable)),
                Err(_) => report
                    .excluded
                    .push((relative, ExclusionReason::BrokenSymlink)),
            }
            continue;
        }

        if file_type.is_file() && readable(entry.path()) {
            report.included.push(relative);
        } else {
            report.excluded.push((relative, ExclusionReason::Unreadable));
        }
    }

    Ok(report)
}

fn relative_name(root: &Path, path: &Path) -> ArchiveResult<String> {
    path.strip_prefix(root)
        .map(|p| p.to_string_lossy().into_owned())
        .map_err(|_| ArchiveError::PathEscape {
            path: PathBuf::from(path),
            root: root.to_path_buf(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_entries_and_prunes_excluded_folders() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("d");
        fs::create_dir_all(dir.join("skip/deep")).unwrap();
        fs::create_dir_all(dir.join("sub")).unwrap();
        fs::write(dir.join("a.txt"), "a").unwrap();
        fs::write(dir.join("sub/b.txt"), "b").unwrap();
        fs::write(dir.join("skip/deep/c.txt"), "c").unwrap();
        #[cfg(unix)]
        {
            std::os::unix::fs::symlink(dir.join("a.txt"), dir.join("link.txt")).unwrap();
            std::os::unix::fs::symlink(dir.join("missing"), dir.join("broken")).unwrap();
        }

        let report = enumerate_contents(&dir, &["skip".to_string()]).unwrap();

        assert!(report.included.contains(&"a.txt".to_string()));
        assert!(report.included.contains(&"sub/b.txt".to_string()));
        assert!(!report.included.iter().any(|n| n.contains("c.txt")));
        assert!(report
            .excluded
            .contains(&("skip".to_string(), ExclusionReason::ExcludedFolder)));
        #[cfg(unix)]
        {
            assert!(report.included.contains(&"link.txt".to_string()));
            assert!(report
                .excluded
                .contains(&("broken".to_string(), ExclusionReason::BrokenSymlink)));
        }
    }

    #[test]
    fn manifests_list_one_entry_per_line() {
        let tmp = tempfile::tempdir().unwrap();
        let report = ContentsReport {
            included: vec!["a".to_string(), "b/c".to_string()],
            excluded: vec![("x".to_string(), ExclusionReason::Unreadable)],
        };
        let inc = tmp.path().join("inc.txt");
        let exc = tmp.path().join("exc.txt");
        report.write_manifests(&inc, &exc).unwrap();

        assert_eq!(fs::read_to_string(&inc).unwrap(), "a\nb/c\n");
        assert_eq!(fs::read_to_string(&exc).unwrap(), "x\tunreadable\n");
    }
}
