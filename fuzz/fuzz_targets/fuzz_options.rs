#![no_main]

use libfuzzer_sys::fuzz_target;

use sgrep::options::Options;

fuzz_target!(|data: &str| {
    // Condition option arguments come straight from the command line;
    // parsing arbitrary strings must error out, never panic.
    let mut opts = Options::default();
    opts.preceded_within = vec![data.to_string()];
    opts.line_matches = vec![data.to_string()];
    opts.range_matches = vec![data.to_string()];
    let _ = opts.apply(vec!["x".to_string()], &[".".to_string()]);

    let mut opts = Options::default();
    opts.file_matches = vec![data.to_string()];
    opts.exclude_dirs = vec![data.to_string()];
    let _ = opts.apply(vec![data.to_string()], &[".".to_string()]);
});
