//! Cached `.gitignore` matching.
//!
//! A [`Checker`] is initialised with a base path and collects every
//! `.gitignore` file from there up to the filesystem root. Parsed files
//! are cached by absolute path in a shared, thread-safe map so sibling
//! directory workers never parse the same file twice.
//!
//! Within one file, patterns are evaluated in reverse order: the last
//! pattern in file order that matches a candidate decides, and a
//! negated pattern (leading `!`) re-includes the candidate.

use globset::{GlobBuilder, GlobMatcher};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

pub const GITIGNORE_FILENAME: &str = ".gitignore";
pub const GIT_FOLDER_NAME: &str = ".git";

/// Decides whether a path is excluded by the `.gitignore` files
/// relevant to one base path.
pub struct Checker {
    gitignores: Vec<Arc<GitignoreFile>>,
    cache: Arc<GitignoreCache>,
}

impl Checker {
    pub fn new() -> Self {
        Self::with_cache(Arc::new(GitignoreCache::new()))
    }

    pub fn with_cache(cache: Arc<GitignoreCache>) -> Self {
        Self {
            gitignores: Vec::new(),
            cache,
        }
    }

    /// Re-initialise the checker for a new base path, loading all
    /// `.gitignore` files from the base up to the filesystem root.
    /// Already known files come from the cache.
    pub fn load_base_path(&mut self, path: &Path) -> std::io::Result<()> {
        let mut current = std::path::absolute(path)?;
        self.gitignores.clear();

        loop {
            let ignore_file = current.join(GITIGNORE_FILENAME);
            if ignore_file.is_file() {
                self.gitignores.push(self.cache.get(&ignore_file)?);
            }
            if !current.pop() {
                break;
            }
        }
        Ok(())
    }

    /// Whether the candidate is excluded. The nearest `.gitignore` with
    /// a matching pattern decides.
    pub fn is_ignored(&self, path: &Path, is_dir: bool) -> bool {
        for gitignore in &self.gitignores {
            if let Some(ignored) = gitignore.check(path, is_dir) {
                return ignored;
            }
        }
        false
    }
}

impl Default for Checker {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared map of parsed `.gitignore` files keyed by absolute path.
///
/// Readers take the lock shared; a miss parses outside the lock and
/// inserts exclusively. Two workers may race on the same file; both
/// produce equivalent pattern lists and the last insert wins.
pub struct GitignoreCache {
    cache: RwLock<HashMap<PathBuf, Arc<GitignoreFile>>>,
}

impl GitignoreCache {
    pub fn new() -> Self {
        Self {
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, path: &Path) -> std::io::Result<Arc<GitignoreFile>> {
        if let Ok(cache) = self.cache.read() {
            if let Some(gitignore) = cache.get(path) {
                return Ok(Arc::clone(gitignore));
            }
        }
        let gitignore = Arc::new(GitignoreFile::load(path)?);
        if let Ok(mut cache) = self.cache.write() {
            cache.insert(path.to_path_buf(), Arc::clone(&gitignore));
        }
        Ok(gitignore)
    }
}

impl Default for GitignoreCache {
    fn default() -> Self {
        Self::new()
    }
}

/// All patterns of one `.gitignore` file.
pub struct GitignoreFile {
    base_path: PathBuf,
    patterns: Vec<Pattern>,
}

impl GitignoreFile {
    fn load(path: &Path) -> std::io::Result<Self> {
        let base_path = path.parent().unwrap_or(Path::new("")).to_path_buf();
        let raw = fs::read(path)?;
        let mut file = Self {
            base_path,
            patterns: Vec::new(),
        };
        for line in String::from_utf8_lossy(&raw).lines() {
            file.add_pattern(line);
        }
        Ok(file)
    }

    /// `Some(ignored)` when any pattern matches, walking the list in
    /// reverse so the last pattern in file order wins.
    fn check(&self, path: &Path, is_dir: bool) -> Option<bool> {
        let full = std::path::absolute(path).ok()?;
        let relative = full.strip_prefix(&self.base_path).ok()?;
        let mut candidate = relative.to_string_lossy().into_owned();
        if candidate.is_empty() {
            return None;
        }
        if cfg!(windows) {
            candidate = candidate.replace('\\', "/");
        }

        for pattern in self.patterns.iter().rev() {
            if pattern.matches(&candidate, is_dir) {
                return Some(!pattern.negated);
            }
        }
        None
    }

    fn add_pattern(&mut self, line: &str) {
        if line.trim_matches(' ').is_empty() || line.starts_with('#') {
            return;
        }

        let mut pattern = line;
        let mut negated = false;
        if let Some(rest) = pattern.strip_prefix('!') {
            negated = true;
            pattern = rest;
        } else if let Some(rest) = pattern.strip_prefix("\\!") {
            pattern = rest;
        }
        let anchored = pattern.starts_with('/');
        if anchored {
            pattern = &pattern[1..];
        }
        let dir_only = pattern.ends_with('/');
        if dir_only {
            pattern = &pattern[..pattern.len() - 1];
        }

        let kind = if pattern.contains("**") {
            PatternKind::double_star(pattern)
        } else if pattern.contains('/') || anchored {
            PatternKind::Path {
                matcher: compile_glob(pattern),
                depth: if anchored {
                    0
                } else {
                    pattern.matches('/').count()
                },
                anchored,
            }
        } else if pattern.contains(['*', '?', '[']) {
            PatternKind::BasenameGlob(compile_glob(pattern))
        } else {
            PatternKind::Basename(pattern.to_string())
        };

        self.patterns.push(Pattern {
            negated,
            dir_only,
            kind,
        });
    }
}

struct Pattern {
    negated: bool,
    dir_only: bool,
    kind: PatternKind,
}

enum PatternKind {
    /// Plain filename, no special characters.
    Basename(String),
    /// Filename glob matched against the candidate's basename.
    BasenameGlob(Option<GlobMatcher>),
    /// Path glob. Unanchored patterns are matched against the trailing
    /// `depth + 1` components of the candidate.
    Path {
        matcher: Option<GlobMatcher>,
        depth: usize,
        anchored: bool,
    },
    /// A `**` pattern compiled to a regex.
    DoubleStar(Option<regex::Regex>),
}

impl PatternKind {
    fn double_star(pattern: &str) -> Self {
        let mut content = pattern;
        let anchor_start = if let Some(rest) = content.strip_prefix("**/") {
            content = rest;
            false
        } else {
            true
        };
        let anchor_end = if let Some(rest) = content.strip_suffix("/**") {
            content = rest;
            false
        } else {
            true
        };

        let mut source = content
            .split("**")
            .map(regex::escape)
            .collect::<Vec<_>>()
            .join(".*?");
        if anchor_start {
            source = format!("^{}", source);
        }
        if anchor_end {
            source = format!("{}$", source);
        }
        PatternKind::DoubleStar(regex::Regex::new(&source).ok())
    }
}

impl Pattern {
    fn matches(&self, path: &str, is_dir: bool) -> bool {
        if self.dir_only && !is_dir {
            return false;
        }
        match &self.kind {
            PatternKind::Basename(name) => basename(path) == name,
            PatternKind::BasenameGlob(matcher) => matcher
                .as_ref()
                .is_some_and(|m| m.is_match(Path::new(basename(path)))),
            PatternKind::Path {
                matcher,
                depth,
                anchored,
            } => {
                let candidate = if *anchored {
                    path
                } else {
                    match trailing_components(path, *depth) {
                        Some(tail) => tail,
                        None => return false,
                    }
                };
                matcher
                    .as_ref()
                    .is_some_and(|m| m.is_match(Path::new(candidate)))
            }
            PatternKind::DoubleStar(regex) => {
                regex.as_ref().is_some_and(|re| re.is_match(path))
            }
        }
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

/// Right-trim `path` to its last `depth + 1` slash-separated components.
/// Returns `None` when the candidate is not deep enough to match.
fn trailing_components(path: &str, depth: usize) -> Option<&str> {
    let bytes = path.as_bytes();
    let mut slashes = 0;
    let mut pos = bytes.len();
    while pos > 0 {
        if bytes[pos - 1] == b'/' {
            slashes += 1;
            if slashes > depth {
                return Some(&path[pos..]);
            }
        }
        pos -= 1;
    }
    if slashes < depth {
        None
    } else {
        Some(path)
    }
}

fn compile_glob(pattern: &str) -> Option<GlobMatcher> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .ok()
        .map(|g| g.compile_matcher())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn checker_for(dir: &TempDir, gitignore: &str) -> Checker {
        fs::write(dir.path().join(GITIGNORE_FILENAME), gitignore).unwrap();
        let mut checker = Checker::new();
        checker.load_base_path(dir.path()).unwrap();
        checker
    }

    #[test]
    fn test_basename_and_glob_patterns() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "exact.txt\n*.log\n");

        assert!(checker.is_ignored(&dir.path().join("exact.txt"), false));
        assert!(checker.is_ignored(&dir.path().join("sub/exact.txt"), false));
        assert!(checker.is_ignored(&dir.path().join("debug.log"), false));
        assert!(!checker.is_ignored(&dir.path().join("exact.txt.bak"), false));
        assert!(!checker.is_ignored(&dir.path().join("notes.md"), false));
    }

    #[test]
    fn test_comments_and_blanks_are_skipped() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "# a comment\n\n   \nreal.txt\n");
        assert!(checker.is_ignored(&dir.path().join("real.txt"), false));
        assert!(!checker.is_ignored(&dir.path().join("# a comment"), false));
    }

    #[test]
    fn test_dir_only_pattern() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "build/\n");
        assert!(checker.is_ignored(&dir.path().join("build"), true));
        assert!(!checker.is_ignored(&dir.path().join("build"), false));
    }

    #[test]
    fn test_anchored_pattern_only_matches_at_root() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "/top.txt\n");
        assert!(checker.is_ignored(&dir.path().join("top.txt"), false));
        assert!(!checker.is_ignored(&dir.path().join("nested/top.txt"), false));
    }

    #[test]
    fn test_path_pattern_matches_trailing_components() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "obj/*.o\n");
        assert!(checker.is_ignored(&dir.path().join("obj/main.o"), false));
        assert!(checker.is_ignored(&dir.path().join("deep/obj/main.o"), false));
        assert!(!checker.is_ignored(&dir.path().join("obj/sub/main.o"), false));
        assert!(!checker.is_ignored(&dir.path().join("main.o"), false));
    }

    #[test]
    fn test_double_star_pattern() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "logs/**/archive\n");
        assert!(checker.is_ignored(&dir.path().join("logs/2024/05/archive"), false));
        assert!(!checker.is_ignored(&dir.path().join("other/2024/archive"), false));
    }

    #[test]
    fn test_escaped_bang_is_literal() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "\\!important\n");
        assert!(checker.is_ignored(&dir.path().join("!important"), false));
    }

    /// When two patterns match, the later one in file order decides.
    #[test]
    fn test_reverse_order_last_pattern_wins() {
        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "*.tmp\n!keep.tmp\n");
        assert!(checker.is_ignored(&dir.path().join("junk.tmp"), false));
        assert!(!checker.is_ignored(&dir.path().join("keep.tmp"), false));

        let dir = TempDir::new().unwrap();
        let checker = checker_for(&dir, "!keep.tmp\n*.tmp\n");
        assert!(checker.is_ignored(&dir.path().join("keep.tmp"), false));
    }

    #[test]
    fn test_nested_gitignore_nearest_file_decides() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(GITIGNORE_FILENAME), "*.gen\n").unwrap();
        let sub = dir.path().join("sub");
        fs::create_dir(&sub).unwrap();
        fs::write(sub.join(GITIGNORE_FILENAME), "!special.gen\n").unwrap();

        let mut checker = Checker::new();
        checker.load_base_path(&sub).unwrap();

        assert!(checker.is_ignored(&sub.join("normal.gen"), false));
        // The nearer .gitignore re-includes this one.
        assert!(!checker.is_ignored(&sub.join("special.gen"), false));
    }

    #[test]
    fn test_candidate_outside_base_is_not_matched() {
        let dir = TempDir::new().unwrap();
        let other = TempDir::new().unwrap();
        let checker = checker_for(&dir, "*.txt\n");
        assert!(!checker.is_ignored(&other.path().join("a.txt"), false));
    }

    #[test]
    fn test_cache_is_shared_between_checkers() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(GITIGNORE_FILENAME), "*.o\n").unwrap();

        let cache = Arc::new(GitignoreCache::new());
        let mut first = Checker::with_cache(Arc::clone(&cache));
        first.load_base_path(dir.path()).unwrap();
        let mut second = Checker::with_cache(Arc::clone(&cache));
        second.load_base_path(dir.path()).unwrap();

        assert!(Arc::ptr_eq(&first.gitignores[0], &second.gitignores[0]));
        assert!(second.is_ignored(&dir.path().join("x.o"), false));
    }

    #[test]
    fn test_trailing_components() {
        assert_eq!(trailing_components("a/b/c", 0), Some("c"));
        assert_eq!(trailing_components("a/b/c", 1), Some("b/c"));
        assert_eq!(trailing_components("a/b/c", 2), Some("a/b/c"));
        assert_eq!(trailing_components("a/b/c", 3), None);
    }
}
