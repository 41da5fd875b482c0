//! Option loading, validation and pattern preparation.
//!
//! Options are assembled in layers: built-in defaults, then the global
//! config file in the home directory, then the nearest `.sgrep.conf`
//! found walking up from the working directory, then the command line.
//! [`Options::apply`] validates the merged record, parses the condition
//! table and compiles all patterns into an immutable [`SearchConfig`]
//! that is shared by reference with every worker.

use anyhow::{anyhow, bail, Context, Result};
use globset::{GlobBuilder, GlobMatcher};
use regex::bytes::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};

use crate::conditions::{Condition, ConditionKind};
use crate::engine::{self, reader};

/// Name of the config file searched in the home directory and upward
/// from the working directory.
pub const CONFIG_FILE: &str = ".sgrep.conf";

/// A three-valued switch resolved during auto detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    #[default]
    Auto,
    On,
    Off,
}

/// The complete option record observed by the core and the renderer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Options {
    pub multiline: bool,
    pub ignore_case: bool,
    pub invert_match: bool,
    pub binary_skip: bool,
    pub binary_as_text: bool,
    /// Context lines in both directions; overrides the directional pair.
    pub context: usize,
    pub context_before: usize,
    pub context_after: usize,
    /// Worker threads; 0 = all logical cores.
    pub cores: usize,
    /// Per-target match cap; 0 = unlimited.
    pub limit: u64,
    pub recursive: bool,
    /// Honor `.gitignore` files during recursion.
    pub git: bool,
    pub show_line_numbers: bool,
    pub show_column_numbers: bool,
    pub show_byte_offset: bool,
    pub group_by_file: bool,
    pub show_filename: TriState,
    pub color: TriState,
    pub count: bool,
    pub files_with_matches: bool,
    pub files_without_match: bool,
    pub stats: bool,
    /// Comma-separated extension lists for the walker.
    pub include_extensions: String,
    pub exclude_extensions: String,
    /// Directory name globs skipped during recursion.
    pub exclude_dirs: Vec<String>,
    /// Size of one input block; minimum 256 KiB.
    pub input_block_size: usize,

    // Condition options; command-line only, not persisted.
    #[serde(skip)]
    pub preceded_by: Vec<String>,
    #[serde(skip)]
    pub followed_by: Vec<String>,
    #[serde(skip)]
    pub surrounded_by: Vec<String>,
    #[serde(skip)]
    pub preceded_within: Vec<String>,
    #[serde(skip)]
    pub followed_within: Vec<String>,
    #[serde(skip)]
    pub surrounded_within: Vec<String>,
    #[serde(skip)]
    pub not_preceded_by: Vec<String>,
    #[serde(skip)]
    pub not_followed_by: Vec<String>,
    #[serde(skip)]
    pub not_surrounded_by: Vec<String>,
    #[serde(skip)]
    pub not_preceded_within: Vec<String>,
    #[serde(skip)]
    pub not_followed_within: Vec<String>,
    #[serde(skip)]
    pub not_surrounded_within: Vec<String>,
    #[serde(skip)]
    pub file_matches: Vec<String>,
    #[serde(skip)]
    pub not_file_matches: Vec<String>,
    #[serde(skip)]
    pub line_matches: Vec<String>,
    #[serde(skip)]
    pub not_line_matches: Vec<String>,
    #[serde(skip)]
    pub range_matches: Vec<String>,
    #[serde(skip)]
    pub not_range_matches: Vec<String>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            multiline: false,
            ignore_case: false,
            invert_match: false,
            binary_skip: false,
            binary_as_text: false,
            context: 0,
            context_before: 0,
            context_after: 0,
            cores: 0,
            limit: 0,
            recursive: true,
            git: false,
            show_line_numbers: false,
            show_column_numbers: false,
            show_byte_offset: false,
            group_by_file: false,
            show_filename: TriState::Auto,
            color: TriState::Auto,
            count: false,
            files_with_matches: false,
            files_without_match: false,
            stats: false,
            include_extensions: String::new(),
            exclude_extensions: String::new(),
            exclude_dirs: Vec::new(),
            input_block_size: engine::INPUT_BLOCK_SIZE,
            preceded_by: Vec::new(),
            followed_by: Vec::new(),
            surrounded_by: Vec::new(),
            preceded_within: Vec::new(),
            followed_within: Vec::new(),
            surrounded_within: Vec::new(),
            not_preceded_by: Vec::new(),
            not_followed_by: Vec::new(),
            not_surrounded_by: Vec::new(),
            not_preceded_within: Vec::new(),
            not_followed_within: Vec::new(),
            not_surrounded_within: Vec::new(),
            file_matches: Vec::new(),
            not_file_matches: Vec::new(),
            line_matches: Vec::new(),
            not_line_matches: Vec::new(),
            range_matches: Vec::new(),
            not_range_matches: Vec::new(),
        }
    }
}

/// Immutable, fully validated configuration threaded into every worker.
#[derive(Debug)]
pub struct SearchConfig {
    pub opts: Options,
    /// Prepared pattern strings (case-folded, mode prefixes applied).
    pub patterns: Vec<String>,
    /// Compiled primary patterns; workers clone their own set.
    pub regexes: Vec<Regex>,
    pub conditions: Vec<Condition>,
    /// Precompiled `--exclude-dirs` globs.
    pub exclude_dir_globs: Vec<GlobMatcher>,
    pub streaming_allowed: bool,
    pub streaming_threshold: usize,
    /// Whether the engine must compute line numbers for this run.
    pub needs_line_numbers: bool,
}

impl Options {
    /// Build the option record from defaults and config files.
    pub fn load(no_conf: bool, conf_override: Option<&Path>) -> Self {
        let mut layers: Vec<PathBuf> = Vec::new();
        if !no_conf {
            if let Some(home) = home_dir() {
                layers.push(home.join(CONFIG_FILE));
            }
            if let Some(local) = find_local_config() {
                // The home config may double as the local one.
                if layers.first().map(|p| p.as_path()) != Some(local.as_path()) {
                    layers.push(local);
                }
            }
        }
        if let Some(path) = conf_override {
            layers.push(path.to_path_buf());
        }

        let mut merged = match serde_json::to_value(Options::default()) {
            Ok(v) => v,
            Err(_) => return Options::default(),
        };
        for path in layers {
            let raw = match fs::read_to_string(&path) {
                Ok(raw) if !raw.trim().is_empty() => raw,
                _ => continue,
            };
            match serde_json::from_str::<serde_json::Value>(&raw) {
                Ok(overlay) => merge_values(&mut merged, overlay),
                Err(err) => {
                    log::error!("cannot parse config '{}': {}", path.display(), err);
                }
            }
        }
        match serde_json::from_value(merged) {
            Ok(opts) => opts,
            Err(err) => {
                log::error!("invalid config contents: {}", err);
                Options::default()
            }
        }
    }

    /// Validate the record against the given patterns and targets and
    /// compile everything into a [`SearchConfig`].
    pub fn apply(mut self, patterns: Vec<String>, targets: &[String]) -> Result<SearchConfig> {
        if patterns.is_empty() {
            bail!("no pattern given");
        }
        if self.context > 0 {
            self.context_before = self.context;
            self.context_after = self.context;
        }
        if self.cores == 0 {
            self.cores = std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1);
        }

        let conditions = self.process_conditions()?;
        self.check_compatibility(targets)?;

        let exclude_dir_globs = self
            .exclude_dirs
            .iter()
            .map(|pattern| {
                GlobBuilder::new(pattern)
                    .literal_separator(true)
                    .build()
                    .map(|g| g.compile_matcher())
                    .with_context(|| format!("cannot parse directory pattern '{}'", pattern))
            })
            .collect::<Result<Vec<_>>>()?;

        let (streaming_allowed, streaming_threshold) = self.streaming_gate(targets, &conditions);
        self.perform_auto_detections(targets);

        let patterns: Vec<String> = patterns
            .into_iter()
            .map(|p| self.prepare_pattern(&p))
            .collect();
        let regexes = patterns
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("cannot parse pattern: {}", p)))
            .collect::<Result<Vec<_>>>()?;

        let needs_line_numbers = self.show_line_numbers
            || self.show_column_numbers
            || self.show_byte_offset
            || self.context_before > 0
            || self.context_after > 0
            || !conditions.is_empty();

        Ok(SearchConfig {
            opts: self,
            patterns,
            regexes,
            conditions,
            exclude_dir_globs,
            streaming_allowed,
            streaming_threshold,
            needs_line_numbers,
        })
    }

    /// Adjust a pattern to respect the ignore-case and multiline options.
    pub fn prepare_pattern(&self, pattern: &str) -> String {
        let mut pattern = if self.ignore_case {
            pattern.to_lowercase()
        } else {
            pattern.to_string()
        };
        pattern = format!("(?m){}", pattern);
        if self.multiline {
            pattern = format!("(?s){}", pattern);
        }
        pattern
    }

    /// Parse the condition option groups into the condition table.
    fn process_conditions(&self) -> Result<Vec<Condition>> {
        let mut conditions = Vec::new();
        let directions = [
            ConditionKind::Preceded,
            ConditionKind::Followed,
            ConditionKind::Surrounded,
        ];

        // Directional conditions without a distance limit.
        let groups = [
            &self.preceded_by,
            &self.followed_by,
            &self.surrounded_by,
            &self.not_preceded_by,
            &self.not_followed_by,
            &self.not_surrounded_by,
        ];
        for (i, group) in groups.iter().enumerate() {
            for pattern in group.iter() {
                conditions.push(Condition {
                    regex: self.compile_condition(pattern)?,
                    kind: directions[i % 3],
                    within: -1,
                    line_range_start: 0,
                    line_range_end: 0,
                    negated: i >= 3,
                });
            }
        }

        // Directional conditions with a NUM:PATTERN distance limit.
        let groups = [
            &self.preceded_within,
            &self.followed_within,
            &self.surrounded_within,
            &self.not_preceded_within,
            &self.not_followed_within,
            &self.not_surrounded_within,
        ];
        for (i, group) in groups.iter().enumerate() {
            for arg in group.iter() {
                let (num, pattern) = split_arg2(arg)?;
                let within: i64 = num
                    .parse()
                    .map_err(|_| anyhow!("cannot parse condition option '{}': '{}' is not a number", arg, num))?;
                if within < 0 {
                    bail!("distance value must be >= 0");
                }
                conditions.push(Condition {
                    regex: self.compile_condition(pattern)?,
                    kind: directions[i % 3],
                    within,
                    line_range_start: 0,
                    line_range_end: 0,
                    negated: i >= 3,
                });
            }
        }

        // Whole-file conditions.
        for (i, group) in [&self.file_matches, &self.not_file_matches].iter().enumerate() {
            for pattern in group.iter() {
                conditions.push(Condition {
                    regex: self.compile_condition(pattern)?,
                    kind: ConditionKind::FileMatches,
                    within: -1,
                    line_range_start: 0,
                    line_range_end: 0,
                    negated: i == 1,
                });
            }
        }

        // Line conditions, NUM:PATTERN.
        for (i, group) in [&self.line_matches, &self.not_line_matches].iter().enumerate() {
            for arg in group.iter() {
                let (num, pattern) = split_arg2(arg)?;
                let line_no: u64 = num
                    .parse()
                    .map_err(|_| anyhow!("cannot parse condition option '{}': '{}' is not a number", arg, num))?;
                if line_no < 1 {
                    bail!("line number value must be > 0");
                }
                conditions.push(Condition {
                    regex: self.compile_condition(pattern)?,
                    kind: ConditionKind::LineMatches,
                    within: -1,
                    line_range_start: line_no,
                    line_range_end: 0,
                    negated: i == 1,
                });
            }
        }

        // Range conditions, X:Y:PATTERN.
        for (i, group) in [&self.range_matches, &self.not_range_matches].iter().enumerate() {
            for arg in group.iter() {
                let mut parts = arg.splitn(3, ':');
                let (start, end, pattern) = match (parts.next(), parts.next(), parts.next()) {
                    (Some(a), Some(b), Some(p)) => (a, b, p),
                    _ => bail!("wrong format for condition option '{}'", arg),
                };
                let line_start: u64 = start
                    .parse()
                    .map_err(|_| anyhow!("cannot parse condition option '{}': '{}' is not a number", arg, start))?;
                let line_end: u64 = end
                    .parse()
                    .map_err(|_| anyhow!("cannot parse condition option '{}': '{}' is not a number", arg, end))?;
                if line_start < 1 || line_end < 1 {
                    bail!("line number value must be > 0");
                }
                conditions.push(Condition {
                    regex: self.compile_condition(pattern)?,
                    kind: ConditionKind::RangeMatches,
                    within: -1,
                    line_range_start: line_start,
                    line_range_end: line_end,
                    negated: i == 1,
                });
            }
        }

        Ok(conditions)
    }

    fn compile_condition(&self, pattern: &str) -> Result<Regex> {
        Regex::new(&self.prepare_pattern(pattern))
            .with_context(|| format!("cannot parse condition pattern '{}'", pattern))
    }

    /// Reject incompatible option combinations.
    fn check_compatibility(&self, targets: &[String]) -> Result<()> {
        let stdin_target = targets.iter().any(|t| t == "-");
        let net_target = targets.iter().any(|t| reader::net_target(t).is_some());
        let context = self.context_before > 0 || self.context_after > 0;

        if self.invert_match && self.multiline {
            bail!("options 'multiline' and 'invert' cannot be used together");
        }
        if self.invert_match && net_target {
            bail!("option 'invert' is not supported for network targets");
        }
        if self.invert_match && context {
            bail!("context options cannot be used with 'invert'");
        }
        if context && (stdin_target || net_target) {
            bail!("context options are not supported when reading from STDIN or network");
        }
        if context && (self.count || self.files_with_matches || self.files_without_match) {
            bail!("context options cannot be combined with count or list option");
        }
        if self.files_with_matches && self.files_without_match {
            bail!("illegal combination of list options");
        }
        if self.binary_skip && self.binary_as_text {
            bail!("options 'binary-skip' and 'binary-text' cannot be used together");
        }
        if self.input_block_size < engine::INPUT_BLOCK_SIZE {
            bail!(
                "block size must be at least {} bytes",
                engine::INPUT_BLOCK_SIZE
            );
        }
        Ok(())
    }

    /// Decide whether results may stream and from which match count.
    ///
    /// Streaming is off whenever conditions are defined (the evaluator
    /// needs the complete result). A single stdin/network target or a
    /// single regular file streams from the first match.
    fn streaming_gate(&mut self, targets: &[String], conditions: &[Condition]) -> (bool, usize) {
        if !conditions.is_empty() {
            return (false, engine::STREAMING_THRESHOLD);
        }
        let mut threshold = engine::STREAMING_THRESHOLD;
        if targets.len() == 1 {
            let target = &targets[0];
            if target == "-" || reader::net_target(target).is_some() {
                threshold = 0;
                self.group_by_file = false;
            } else if fs::metadata(target).map(|m| m.is_file()).unwrap_or(false) {
                threshold = 0;
            }
        }
        (true, threshold)
    }

    /// Resolve the `auto` settings.
    fn perform_auto_detections(&mut self, targets: &[String]) {
        if self.show_filename == TriState::Auto {
            self.show_filename = if targets.len() == 1 {
                match fs::metadata(&targets[0]) {
                    Ok(meta) if meta.is_dir() => TriState::On,
                    _ => TriState::Off,
                }
            } else {
                TriState::On
            };
        }

        if self.color == TriState::Auto {
            self.color = if std::io::stdout().is_terminal() {
                TriState::On
            } else {
                TriState::Off
            };
        }

        if self.group_by_file && !std::io::stdout().is_terminal() {
            self.group_by_file = false;
        }
    }
}

fn split_arg2(arg: &str) -> Result<(&str, &str)> {
    let mut parts = arg.splitn(2, ':');
    match (parts.next(), parts.next()) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => bail!("wrong format for condition option '{}'", arg),
    }
}

fn home_dir() -> Option<PathBuf> {
    let var = if cfg!(windows) { "USERPROFILE" } else { "HOME" };
    std::env::var_os(var).map(PathBuf::from).filter(|p| !p.as_os_str().is_empty())
}

/// Search the working directory and all parents for a config file.
fn find_local_config() -> Option<PathBuf> {
    let mut dir = std::env::current_dir().ok()?;
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Some(candidate);
        }
        if !dir.pop() {
            return None;
        }
    }
}

/// Recursively overlay `overlay` onto `base`; objects merge per key,
/// everything else is replaced.
fn merge_values(base: &mut serde_json::Value, overlay: serde_json::Value) {
    match (base, overlay) {
        (serde_json::Value::Object(base_map), serde_json::Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(slot) => merge_values(slot, value),
                    None => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prepare_pattern_modes() {
        let mut opts = Options::default();
        assert_eq!(opts.prepare_pattern("Foo"), "(?m)Foo");

        opts.ignore_case = true;
        assert_eq!(opts.prepare_pattern("Foo"), "(?m)foo");

        opts.multiline = true;
        assert_eq!(opts.prepare_pattern("Foo"), "(?s)(?m)foo");
    }

    #[test]
    fn test_conflicting_options_rejected() {
        let targets = vec![".".to_string()];

        let mut opts = Options::default();
        opts.multiline = true;
        opts.invert_match = true;
        assert!(opts.apply(vec!["x".into()], &targets).is_err());

        let mut opts = Options::default();
        opts.binary_skip = true;
        opts.binary_as_text = true;
        assert!(opts.apply(vec!["x".into()], &targets).is_err());

        let mut opts = Options::default();
        opts.files_with_matches = true;
        opts.files_without_match = true;
        assert!(opts.apply(vec!["x".into()], &targets).is_err());

        let mut opts = Options::default();
        opts.context_before = 2;
        assert!(opts
            .apply(vec!["x".into()], &["-".to_string()])
            .is_err());

        let mut opts = Options::default();
        opts.input_block_size = 4096;
        assert!(opts.apply(vec!["x".into()], &targets).is_err());
    }

    #[test]
    fn test_no_pattern_is_an_error() {
        let opts = Options::default();
        assert!(opts.apply(vec![], &[".".to_string()]).is_err());
    }

    #[test]
    fn test_context_shorthand_expands() {
        let mut opts = Options::default();
        opts.context = 3;
        let config = opts.apply(vec!["x".into()], &[".".to_string()]).unwrap();
        assert_eq!(config.opts.context_before, 3);
        assert_eq!(config.opts.context_after, 3);
        assert!(config.needs_line_numbers);
    }

    #[test]
    fn test_condition_parsing() {
        let mut opts = Options::default();
        opts.preceded_by = vec!["open".to_string()];
        opts.not_followed_within = vec!["4:close".to_string()];
        opts.line_matches = vec!["10:header".to_string()];
        opts.range_matches = vec!["5:20:body".to_string()];
        let config = opts.apply(vec!["x".into()], &[".".to_string()]).unwrap();

        assert_eq!(config.conditions.len(), 4);
        assert_eq!(config.conditions[0].kind, ConditionKind::Preceded);
        assert_eq!(config.conditions[0].within, -1);
        assert!(!config.conditions[0].negated);

        assert_eq!(config.conditions[1].kind, ConditionKind::Followed);
        assert_eq!(config.conditions[1].within, 4);
        assert!(config.conditions[1].negated);

        assert_eq!(config.conditions[2].kind, ConditionKind::LineMatches);
        assert_eq!(config.conditions[2].line_range_start, 10);

        assert_eq!(config.conditions[3].kind, ConditionKind::RangeMatches);
        assert_eq!(config.conditions[3].line_range_end, 20);

        // Conditions disable streaming.
        assert!(!config.streaming_allowed);
    }

    #[test]
    fn test_condition_format_errors() {
        let mut opts = Options::default();
        opts.preceded_within = vec!["nope".to_string()];
        assert!(opts.apply(vec!["x".into()], &[".".to_string()]).is_err());

        let mut opts = Options::default();
        opts.line_matches = vec!["0:header".to_string()];
        assert!(opts.apply(vec!["x".into()], &[".".to_string()]).is_err());

        let mut opts = Options::default();
        opts.range_matches = vec!["5:pattern".to_string()];
        assert!(opts.apply(vec!["x".into()], &[".".to_string()]).is_err());
    }

    #[test]
    fn test_streaming_gate_single_stdin_target() {
        let opts = Options::default();
        let config = opts.apply(vec!["x".into()], &["-".to_string()]).unwrap();
        assert!(config.streaming_allowed);
        assert_eq!(config.streaming_threshold, 0);
    }

    #[test]
    fn test_bad_pattern_is_fatal() {
        let opts = Options::default();
        assert!(opts.apply(vec!["[unclosed".into()], &[".".to_string()]).is_err());
    }

    #[test]
    fn test_merge_values_overlays_objects() {
        let mut base = serde_json::json!({"a": 1, "nested": {"x": 1, "y": 2}});
        merge_values(
            &mut base,
            serde_json::json!({"nested": {"y": 3}, "b": true}),
        );
        assert_eq!(base["a"], 1);
        assert_eq!(base["nested"]["x"], 1);
        assert_eq!(base["nested"]["y"], 3);
        assert_eq!(base["b"], true);
    }
}
