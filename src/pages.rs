use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;

use crate::parser::ParseError;

const PAGE_EXTENSIONS: &[&str] = &["html", "htm"];

/// A saved timetable page waiting to be decoded.
#[derive(Debug, Clone)]
pub struct PageRef {
    pub name: String,
    pub path: PathBuf,
}

impl PageRef {
    pub fn from_path(path: &Path) -> Self {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        PageRef {
            name,
            path: path.to_path_buf(),
        }
    }

    pub fn read(&self) -> Result<String, ParseError> {
        let bytes = std::fs::read(&self.path).map_err(|source| ParseError::Read {
            page: self.name.clone(),
            source,
        })?;
        String::from_utf8(bytes).map_err(|_| ParseError::NotUtf8 {
            page: self.name.clone(),
        })
    }
}

/// All cached pages in `dir`, sorted by file name.
pub fn list(dir: &Path, limit: Option<usize>) -> Result<Vec<PageRef>> {
    let entries = std::fs::read_dir(dir)
        .with_context(|| format!("Failed to read page cache {}", dir.display()))?;

    let mut pages = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_page = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| PAGE_EXTENSIONS.iter().any(|x| e.eq_ignore_ascii_case(x)));
        if path.is_file() && is_page {
            pages.push(PageRef::from_path(&path));
        }
    }
    pages.sort_by(|a, b| a.name.cmp(&b.name));

    info!("Found {} cached pages in {}", pages.len(), dir.display());
    if let Some(n) = limit {
        pages.truncate(n);
    }
    Ok(pages)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lists_html_sorted_and_limited() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["week_02.html", "week_01.HTM", "notes.txt", "week_03.html"] {
            std::fs::write(dir.path().join(name), "<table></table>").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.html")).unwrap();

        let all = list(dir.path(), None).unwrap();
        let names: Vec<&str> = all.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["week_01.HTM", "week_02.html", "week_03.html"]);

        let two = list(dir.path(), Some(2)).unwrap();
        assert_eq!(two.len(), 2);
    }

    #[test]
    fn read_failures_are_page_errors() {
        let dir = tempfile::tempdir().unwrap();
        let bad = dir.path().join("bad.html");
        std::fs::write(&bad, [0xff, 0xfe, 0x00]).unwrap();
        let err = PageRef::from_path(&bad).read().unwrap_err();
        assert!(matches!(err, ParseError::NotUtf8 { .. }));

        let missing = PageRef::from_path(&dir.path().join("gone.html"));
        assert!(matches!(missing.read(), Err(ParseError::Read { .. })));
    }

    #[test]
    fn missing_cache_dir_is_an_error() {
        assert!(list(Path::new("does/not/exist"), None).is_err());
    }
}
