#![no_main]

use crossbeam_channel::bounded;
use libfuzzer_sys::fuzz_target;
use std::io::Cursor;
use std::sync::OnceLock;

use sgrep::options::{Options, SearchConfig};

fn configs() -> &'static [SearchConfig] {
    static CONFIGS: OnceLock<Vec<SearchConfig>> = OnceLock::new();
    CONFIGS.get_or_init(|| {
        let single = Options::default()
            .apply(vec![r"\w+\s\d".to_string()], &[".".to_string()])
            .unwrap();
        let mut opts = Options::default();
        opts.multiline = true;
        let multi = opts
            .apply(vec![r"a.*z".to_string()], &[".".to_string()])
            .unwrap();
        vec![single, multi]
    })
}

fuzz_target!(|data: &[u8]| {
    // Arbitrary input bytes must never panic the engine, and every
    // emitted match must stay within its line bounds.
    for config in configs() {
        let (tx, rx) = bounded(1 << 20);
        let mut scanner = sgrep::engine::Scanner::new(sgrep::engine::INPUT_BLOCK_SIZE);
        let mut reader = Cursor::new(data);
        let _ = scanner.scan(&mut reader, &config.regexes, "fuzz", config, &tx);
        drop(tx);
        for result in rx.iter() {
            for m in &result.matches {
                assert!(m.start <= m.end);
                assert!(m.line_start <= m.start);
                assert!(m.end <= m.line_end);
            }
        }
    }
});
