use anyhow::{bail, Context, Result};
use clap::Parser;
use log::error;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use sgrep::options::{Options, TriState};
use sgrep::pipeline;

#[derive(Parser)]
#[command(name = "sgrep")]
#[command(version, about = "Streaming regex search with match conditions")]
#[command(
    override_usage = "sgrep [OPTIONS] PATTERN [FILE|PATH|tcp://HOST:PORT]...\n       sgrep [OPTIONS] [-e PATTERN | -f FILE] [FILE|PATH|tcp://HOST:PORT]..."
)]
struct Cli {
    /// Pattern followed by targets (unless -e/-f provides the patterns)
    args: Vec<String>,

    /// Add PATTERN to the search
    #[arg(short = 'e', long = "regexp", value_name = "PATTERN")]
    patterns: Vec<String>,

    /// Search for patterns contained in FILE (one per line)
    #[arg(short = 'f', long = "regexp-file", value_name = "FILE")]
    pattern_file: Option<PathBuf>,

    /// Case insensitive matching
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Disable case insensitive matching
    #[arg(short = 'I', long)]
    no_ignore_case: bool,

    /// Multiline matching
    #[arg(short = 'm', long)]
    multiline: bool,

    /// Disable multiline matching
    #[arg(short = 'M', long)]
    no_multiline: bool,

    /// Select non-matching lines
    #[arg(short = 'v', long)]
    invert_match: bool,

    /// Skip files that seem to be binary
    #[arg(long)]
    binary_skip: bool,

    /// Process files that seem to be binary as text
    #[arg(short = 'a', long = "binary-text")]
    binary_as_text: bool,

    /// Show NUM context lines
    #[arg(short = 'C', long, value_name = "NUM")]
    context: Option<usize>,

    /// Show NUM context lines after the match
    #[arg(short = 'A', long = "context-after", value_name = "NUM")]
    context_after: Option<usize>,

    /// Show NUM context lines before the match
    #[arg(short = 'B', long = "context-before", value_name = "NUM")]
    context_before: Option<usize>,

    /// Limit used CPU cores (default: 0 = all)
    #[arg(short = 'j', long, value_name = "NUM")]
    cores: Option<usize>,

    /// Only show the first NUM matches per file
    #[arg(long, value_name = "NUM")]
    limit: Option<u64>,

    /// Show line numbers
    #[arg(short = 'n', long = "line-number")]
    line_numbers: bool,

    /// Do not show line numbers
    #[arg(short = 'N', long = "no-line-number")]
    no_line_numbers: bool,

    /// Show column numbers
    #[arg(long = "column")]
    column_numbers: bool,

    /// Show the byte offset of each match
    #[arg(long = "byte-offset")]
    byte_offset: bool,

    /// Print the match count per file
    #[arg(short = 'c', long)]
    count: bool,

    /// List files containing matches
    #[arg(short = 'l', long = "files-with-matches")]
    files_with_matches: bool,

    /// List files containing no match
    #[arg(short = 'L', long = "files-without-match")]
    files_without_match: bool,

    /// Group output by file
    #[arg(long)]
    group: bool,

    /// Do not group output by file
    #[arg(long)]
    no_group: bool,

    /// Enforce printing the filename before results
    #[arg(long = "filename")]
    show_filename: bool,

    /// Disable printing the filename before results
    #[arg(long = "no-filename")]
    no_show_filename: bool,

    /// Colored output: auto, always or never
    #[arg(long, value_name = "WHEN")]
    color: Option<String>,

    /// Recurse into directories (default: on)
    #[arg(short = 'r', long)]
    recursive: bool,

    /// Do not recurse into directories
    #[arg(short = 'R', long)]
    no_recursive: bool,

    /// Honor .gitignore files while recursing
    #[arg(long)]
    git: bool,

    /// Limit the search to specific file extensions (comma-separated)
    #[arg(short = 'x', long = "ext", value_name = "EXTS")]
    include_extensions: Option<String>,

    /// Exclude specific file extensions (comma-separated)
    #[arg(short = 'X', long = "exclude-ext", value_name = "EXTS")]
    exclude_extensions: Option<String>,

    /// Do not recurse into directories whose name matches GLOB
    #[arg(long = "exclude-dirs", value_name = "GLOB")]
    exclude_dirs: Vec<String>,

    /// Input block size in bytes (minimum 262144)
    #[arg(long = "blocksize", value_name = "BYTES")]
    block_size: Option<usize>,

    /// Show statistics after the search
    #[arg(long)]
    stats: bool,

    /// Do not load config files
    #[arg(long = "no-conf")]
    no_conf: bool,

    /// Load an additional config file
    #[arg(long = "conf", value_name = "FILE")]
    config_file: Option<PathBuf>,

    /// Print the merged configuration and exit
    #[arg(long = "print-config")]
    print_config: bool,

    // Match condition options.
    /// Only show matches preceded by PATTERN
    #[arg(long = "preceded-by", value_name = "PATTERN")]
    preceded_by: Vec<String>,

    /// Only show matches followed by PATTERN
    #[arg(long = "followed-by", value_name = "PATTERN")]
    followed_by: Vec<String>,

    /// Only show matches surrounded by PATTERN
    #[arg(long = "surrounded-by", value_name = "PATTERN")]
    surrounded_by: Vec<String>,

    /// Only show matches preceded by PATTERN within NUM lines
    #[arg(long = "preceded-within", value_name = "NUM:PATTERN")]
    preceded_within: Vec<String>,

    /// Only show matches followed by PATTERN within NUM lines
    #[arg(long = "followed-within", value_name = "NUM:PATTERN")]
    followed_within: Vec<String>,

    /// Only show matches surrounded by PATTERN within NUM lines
    #[arg(long = "surrounded-within", value_name = "NUM:PATTERN")]
    surrounded_within: Vec<String>,

    /// Only show matches not preceded by PATTERN
    #[arg(long = "not-preceded-by", value_name = "PATTERN")]
    not_preceded_by: Vec<String>,

    /// Only show matches not followed by PATTERN
    #[arg(long = "not-followed-by", value_name = "PATTERN")]
    not_followed_by: Vec<String>,

    /// Only show matches not surrounded by PATTERN
    #[arg(long = "not-surrounded-by", value_name = "PATTERN")]
    not_surrounded_by: Vec<String>,

    /// Only show matches not preceded by PATTERN within NUM lines
    #[arg(long = "not-preceded-within", value_name = "NUM:PATTERN")]
    not_preceded_within: Vec<String>,

    /// Only show matches not followed by PATTERN within NUM lines
    #[arg(long = "not-followed-within", value_name = "NUM:PATTERN")]
    not_followed_within: Vec<String>,

    /// Only show matches not surrounded by PATTERN within NUM lines
    #[arg(long = "not-surrounded-within", value_name = "NUM:PATTERN")]
    not_surrounded_within: Vec<String>,

    // File condition options.
    /// Only show matches if the file also matches PATTERN
    #[arg(long = "file-matches", value_name = "PATTERN")]
    file_matches: Vec<String>,

    /// Only show matches if the file does not match PATTERN
    #[arg(long = "not-file-matches", value_name = "PATTERN")]
    not_file_matches: Vec<String>,

    /// Only show matches if line NUM matches PATTERN
    #[arg(long = "line-matches", value_name = "NUM:PATTERN")]
    line_matches: Vec<String>,

    /// Only show matches if line NUM does not match PATTERN
    #[arg(long = "not-line-matches", value_name = "NUM:PATTERN")]
    not_line_matches: Vec<String>,

    /// Only show matches if lines X-Y match PATTERN
    #[arg(long = "range-matches", value_name = "X:Y:PATTERN")]
    range_matches: Vec<String>,

    /// Only show matches if lines X-Y do not match PATTERN
    #[arg(long = "not-range-matches", value_name = "X:Y:PATTERN")]
    not_range_matches: Vec<String>,
}

impl Cli {
    /// Layer the command line over the config-file options.
    fn apply_to(&self, o: &mut Options) {
        if self.ignore_case {
            o.ignore_case = true;
        }
        if self.no_ignore_case {
            o.ignore_case = false;
        }
        if self.multiline {
            o.multiline = true;
        }
        if self.no_multiline {
            o.multiline = false;
        }
        if self.invert_match {
            o.invert_match = true;
        }
        if self.binary_skip {
            o.binary_skip = true;
        }
        if self.binary_as_text {
            o.binary_as_text = true;
        }
        if let Some(context) = self.context {
            o.context = context;
        }
        if let Some(after) = self.context_after {
            o.context_after = after;
        }
        if let Some(before) = self.context_before {
            o.context_before = before;
        }
        if let Some(cores) = self.cores {
            o.cores = cores;
        }
        if let Some(limit) = self.limit {
            o.limit = limit;
        }
        if self.line_numbers {
            o.show_line_numbers = true;
        }
        if self.no_line_numbers {
            o.show_line_numbers = false;
        }
        if self.column_numbers {
            o.show_column_numbers = true;
        }
        if self.byte_offset {
            o.show_byte_offset = true;
        }
        if self.count {
            o.count = true;
        }
        if self.files_with_matches {
            o.files_with_matches = true;
        }
        if self.files_without_match {
            o.files_without_match = true;
        }
        if self.group {
            o.group_by_file = true;
        }
        if self.no_group {
            o.group_by_file = false;
        }
        if self.show_filename {
            o.show_filename = TriState::On;
        }
        if self.no_show_filename {
            o.show_filename = TriState::Off;
        }
        match self.color.as_deref() {
            Some("always") | Some("on") => o.color = TriState::On,
            Some("never") | Some("off") => o.color = TriState::Off,
            Some(_) => o.color = TriState::Auto,
            None => {}
        }
        if self.recursive {
            o.recursive = true;
        }
        if self.no_recursive {
            o.recursive = false;
        }
        if self.git {
            o.git = true;
        }
        if let Some(exts) = &self.include_extensions {
            o.include_extensions = exts.clone();
        }
        if let Some(exts) = &self.exclude_extensions {
            o.exclude_extensions = exts.clone();
        }
        if !self.exclude_dirs.is_empty() {
            o.exclude_dirs = self.exclude_dirs.clone();
        }
        if let Some(block_size) = self.block_size {
            o.input_block_size = block_size;
        }
        if self.stats {
            o.stats = true;
        }

        o.preceded_by = self.preceded_by.clone();
        o.followed_by = self.followed_by.clone();
        o.surrounded_by = self.surrounded_by.clone();
        o.preceded_within = self.preceded_within.clone();
        o.followed_within = self.followed_within.clone();
        o.surrounded_within = self.surrounded_within.clone();
        o.not_preceded_by = self.not_preceded_by.clone();
        o.not_followed_by = self.not_followed_by.clone();
        o.not_surrounded_by = self.not_surrounded_by.clone();
        o.not_preceded_within = self.not_preceded_within.clone();
        o.not_followed_within = self.not_followed_within.clone();
        o.not_surrounded_within = self.not_surrounded_within.clone();
        o.file_matches = self.file_matches.clone();
        o.not_file_matches = self.not_file_matches.clone();
        o.line_matches = self.line_matches.clone();
        o.not_line_matches = self.not_line_matches.clone();
        o.range_matches = self.range_matches.clone();
        o.not_range_matches = self.not_range_matches.clone();
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn"))
        .format_timestamp(None)
        .init();

    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            error!("{:#}", err);
            std::process::exit(2);
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    let mut options = Options::load(cli.no_conf, cli.config_file.as_deref());
    cli.apply_to(&mut options);

    let mut patterns = cli.patterns.clone();
    if let Some(path) = &cli.pattern_file {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("cannot open pattern file '{}'", path.display()))?;
        patterns.extend(raw.lines().map(|line| line.to_string()));
    }

    let mut args = cli.args.clone();
    if patterns.is_empty() {
        if args.is_empty() {
            bail!("no pattern given; try 'sgrep --help' for more information");
        }
        patterns.push(args.remove(0));
    }

    let targets: Vec<String> = if args.is_empty() {
        if std::io::stdin().is_terminal() {
            vec![".".to_string()]
        } else {
            vec!["-".to_string()]
        }
    } else {
        args
    };

    if cli.print_config {
        println!("{}", serde_json::to_string_pretty(&options)?);
        return Ok(0);
    }

    let started = Instant::now();
    let config = Arc::new(options.apply(patterns, &targets)?);
    let stats = config.opts.stats;
    let block_size = config.opts.input_block_size;

    let totals = pipeline::execute_search(config, &targets)?;

    if totals.line_length_errors > 0 {
        error!(
            "{} files skipped due to very long lines (>= {} bytes); see the --blocksize option",
            totals.line_length_errors, block_size
        );
    }
    if stats {
        eprintln!("{} files processed", totals.targets);
        eprintln!("{} files match", totals.results);
        eprintln!("{} matches found", totals.matches);
        eprintln!("in {:?}", started.elapsed());
    }

    Ok(if totals.results > 0 { 0 } else { 1 })
}
