//! Result rendering.
//!
//! Formats [`SearchResult`]s in the familiar grep style: optional
//! filename and line-number prefixes, context blocks with `--` gap
//! separators, match highlighting, plus the count and list modes. The
//! engine never changes behavior for these modes; everything here is
//! computed from delivered results.

use std::io::{self, Write};
use std::sync::Arc;
use termcolor::{Color, ColorChoice, ColorSpec, NoColor, StandardStream, WriteColor};

use crate::engine::{Match, SearchResult};
use crate::options::{SearchConfig, TriState};
use crate::pipeline::SearchTotals;

pub struct Printer {
    out: Box<dyn WriteColor + Send>,
    config: Arc<SearchConfig>,
}

impl Printer {
    pub fn new(config: Arc<SearchConfig>) -> Self {
        let choice = match config.opts.color {
            TriState::On => ColorChoice::Always,
            _ => ColorChoice::Never,
        };
        Self {
            out: Box::new(StandardStream::stdout(choice)),
            config,
        }
    }

    /// A printer capturing plain output into a buffer, for tests.
    pub fn with_buffer(config: Arc<SearchConfig>) -> (Self, Arc<std::sync::Mutex<Vec<u8>>>) {
        let buffer = Arc::new(std::sync::Mutex::new(Vec::new()));
        let printer = Self {
            out: Box::new(NoColor::new(SharedBuffer(Arc::clone(&buffer)))),
            config,
        };
        (printer, buffer)
    }

    /// Render one result and update the run totals.
    pub fn print_result(
        &mut self,
        result: &mut SearchResult,
        totals: &mut SearchTotals,
    ) -> io::Result<()> {
        let config = Arc::clone(&self.config);
        let opts = &config.opts;
        let target = result.target.clone();

        if opts.files_without_match {
            if result.matches.is_empty() {
                writeln!(self.out, "{}", target)?;
                totals.results += 1;
            }
            return Ok(());
        }
        if opts.files_with_matches && !opts.count {
            if !result.matches.is_empty() {
                writeln!(self.out, "{}", target)?;
                totals.matches += 1;
                totals.results += 1;
            }
            return Ok(());
        }
        if opts.count {
            let mut match_count = result.matches.len() as u64;
            if opts.limit != 0 && match_count > opts.limit {
                match_count = opts.limit;
            }
            if let Some(match_rx) = result.match_rx.take() {
                for batch in match_rx.iter() {
                    match_count += batch.len() as u64;
                    if opts.limit != 0 && match_count >= opts.limit {
                        match_count = opts.limit;
                        break;
                    }
                }
            }
            if opts.files_with_matches {
                if match_count > 0 {
                    writeln!(self.out, "{}:{}", target, match_count)?;
                }
            } else {
                if opts.show_filename == TriState::On {
                    write!(self.out, "{}:", target)?;
                }
                writeln!(self.out, "{}", match_count)?;
            }
            totals.matches += match_count;
            if match_count > 0 {
                totals.results += 1;
            }
            return Ok(());
        }

        if result.matches.is_empty() {
            return Ok(());
        }

        // Separator between file results.
        if totals.matches > 0 {
            if opts.group_by_file {
                writeln!(self.out)?;
            } else if opts.context_before > 0 || opts.context_after > 0 {
                writeln!(self.out, "--")?;
            }
        }

        if result.is_binary && !opts.binary_as_text {
            writeln!(self.out, "Binary file matches: {}", target)?;
            totals.matches += 1;
            totals.results += 1;
            return Ok(());
        }

        if opts.group_by_file {
            self.set_color(Color::Magenta, true)?;
            writeln!(self.out, "{}", target)?;
            self.out.reset()?;
        }

        let mut match_count: u64 = 0;
        let mut last_printed_line: i64 = -1;

        // Context before the first match of the target.
        if let Some(context) = result.matches[0].context_before.clone() {
            let first_line_no = result.matches[0].line_no as i64;
            let lines: Vec<&str> = context.split('\n').collect();
            for (index, line) in lines.iter().enumerate() {
                let line_no = first_line_no - lines.len() as i64 + index as i64;
                self.print_filename(&target, "-")?;
                self.print_lineno(line_no, "-")?;
                writeln!(self.out, "{}", line)?;
                last_printed_line = line_no;
            }
        }

        let mut last_match: Option<Match> = None;
        let mut done = false;
        for m in &result.matches {
            self.print_match(m, last_match.as_ref(), &target, &mut last_printed_line)?;
            last_match = Some(m.clone());
            match_count += 1;
            if opts.limit != 0 && match_count >= opts.limit {
                done = true;
                break;
            }
        }
        if !done {
            if let Some(match_rx) = result.match_rx.take() {
                'stream: for batch in match_rx.iter() {
                    for m in batch {
                        self.print_match(&m, last_match.as_ref(), &target, &mut last_printed_line)?;
                        last_match = Some(m);
                        match_count += 1;
                        if opts.limit != 0 && match_count >= opts.limit {
                            break 'stream;
                        }
                    }
                }
            }
        }

        // Context after the final match of the target.
        if let Some(last) = &last_match {
            if let Some(context) = &last.context_after {
                for (index, line) in context.split('\n').enumerate() {
                    let line_no = self.context_after_lineno(last, index);
                    self.print_filename(&target, "-")?;
                    self.print_lineno(line_no, "-")?;
                    writeln!(self.out, "{}", line)?;
                }
            }
        }

        self.out.flush()?;
        totals.matches += match_count;
        totals.results += 1;
        Ok(())
    }

    /// Print one match: the trailing context of the previous match, a gap
    /// separator if needed, the leading context, then the match itself.
    fn print_match(
        &mut self,
        m: &Match,
        last_match: Option<&Match>,
        target: &str,
        last_printed_line: &mut i64,
    ) -> io::Result<()> {
        let config = Arc::clone(&self.config);
        let opts = &config.opts;

        // Context after the previous match, up to the current one.
        let mut context_block_incomplete = false;
        if let Some(last) = last_match {
            if let Some(context) = &last.context_after {
                for (index, line) in context.split('\n').enumerate() {
                    let line_no = self.context_after_lineno(last, index);
                    if line_no < m.line_no as i64 {
                        self.print_filename(target, "-")?;
                        self.print_lineno(line_no, "-")?;
                        writeln!(self.out, "{}", line)?;
                        *last_printed_line = line_no;
                    } else {
                        context_block_incomplete = true;
                    }
                }
            }
            if (last.context_after.is_some() || m.context_before.is_some())
                && !context_block_incomplete
                && m.line_no as i64 - opts.context_before as i64 > *last_printed_line + 1
            {
                writeln!(self.out, "--")?;
            }

            if let Some(context) = &m.context_before {
                let lines: Vec<&str> = context.split('\n').collect();
                for (index, line) in lines.iter().enumerate() {
                    let line_no = m.line_no as i64 - lines.len() as i64 + index as i64;
                    if line_no > *last_printed_line {
                        self.print_filename(target, "-")?;
                        self.print_lineno(line_no, "-")?;
                        writeln!(self.out, "{}", line)?;
                        *last_printed_line = line_no;
                    }
                }
            }
        }

        if opts.multiline {
            let lines: Vec<&str> = m.line_text.split('\n').collect();
            if lines.len() > 1 {
                let first_line = lines[0];
                let last_line = lines[lines.len() - 1];
                let first_offset = ((m.start - m.line_start) as usize).min(first_line.len());
                let last_offset = (last_line.len())
                    .saturating_sub((m.line_end - m.end) as usize);

                // First line, highlighted from the match start.
                self.print_match_prefix(m, target, m.line_no as i64)?;
                write!(self.out, "{}", &first_line[..first_offset])?;
                self.set_color(Color::Red, true)?;
                writeln!(self.out, "{}", &first_line[first_offset..])?;
                self.out.reset()?;

                // Middle lines, fully highlighted.
                for (i, line) in lines.iter().enumerate().take(lines.len() - 1).skip(1) {
                    self.print_filename(target, ":")?;
                    self.print_lineno(m.line_no as i64 + i as i64, ":")?;
                    self.set_color(Color::Red, true)?;
                    writeln!(self.out, "{}", line)?;
                    self.out.reset()?;
                }

                // Last line, highlighted up to the match end.
                self.print_filename(target, ":")?;
                self.print_lineno(m.line_no as i64 + lines.len() as i64 - 1, ":")?;
                self.set_color(Color::Red, true)?;
                write!(self.out, "{}", &last_line[..last_offset])?;
                self.out.reset()?;
                writeln!(self.out, "{}", &last_line[last_offset..])?;
                *last_printed_line = m.line_no as i64 + lines.len() as i64 - 1;
                return Ok(());
            }
        }

        self.print_match_prefix(m, target, m.line_no as i64)?;
        let line = m.line_text.as_str();
        let hl_start = ((m.start - m.line_start) as usize).min(line.len());
        let hl_end = ((m.end - m.line_start) as usize).min(line.len());
        write!(self.out, "{}", &line[..hl_start])?;
        if hl_end > hl_start {
            self.set_color(Color::Red, true)?;
            write!(self.out, "{}", &line[hl_start..hl_end])?;
            self.out.reset()?;
        }
        writeln!(self.out, "{}", &line[hl_end..])?;
        *last_printed_line = m.line_no as i64;
        Ok(())
    }

    /// Line number of the `index`-th context-after line; a multiline
    /// match shifts the context past its additional lines.
    fn context_after_lineno(&self, m: &Match, index: usize) -> i64 {
        let extra = if self.config.opts.multiline {
            m.line_text.matches('\n').count() as i64
        } else {
            0
        };
        m.line_no as i64 + index as i64 + 1 + extra
    }

    fn print_match_prefix(&mut self, m: &Match, target: &str, line_no: i64) -> io::Result<()> {
        let config = Arc::clone(&self.config);
        let opts = &config.opts;
        self.print_filename(target, ":")?;
        self.print_lineno(line_no, ":")?;
        if opts.show_column_numbers {
            write!(self.out, "{}:", m.start - m.line_start + 1)?;
        }
        if opts.show_byte_offset {
            write!(self.out, "{}:", m.line_start)?;
        }
        Ok(())
    }

    fn print_filename(&mut self, target: &str, delim: &str) -> io::Result<()> {
        let show = self.config.opts.show_filename == TriState::On && !self.config.opts.group_by_file;
        if show {
            self.set_color(Color::Magenta, true)?;
            write!(self.out, "{}", target)?;
            self.out.reset()?;
            write!(self.out, "{}", delim)?;
        }
        Ok(())
    }

    fn print_lineno(&mut self, line_no: i64, delim: &str) -> io::Result<()> {
        if self.config.opts.show_line_numbers {
            self.set_color(Color::Green, true)?;
            write!(self.out, "{}", line_no)?;
            self.out.reset()?;
            write!(self.out, "{}", delim)?;
        }
        Ok(())
    }

    fn set_color(&mut self, color: Color, bold: bool) -> io::Result<()> {
        self.out
            .set_color(ColorSpec::new().set_fg(Some(color)).set_bold(bold))
    }
}

/// A `Write` handle into a shared byte buffer.
struct SharedBuffer(Arc<std::sync::Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }
    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;

    fn make_config(f: impl FnOnce(&mut Options)) -> Arc<SearchConfig> {
        let mut opts = Options::default();
        opts.color = TriState::Off;
        opts.show_filename = TriState::Off;
        f(&mut opts);
        Arc::new(
            opts.apply(vec!["needle".to_string()], &["x".to_string()])
                .unwrap(),
        )
    }

    fn single_match_result() -> SearchResult {
        let mut result = SearchResult::new("file.txt");
        result.matches.push(Match {
            start: 10,
            end: 16,
            line_start: 5,
            line_end: 21,
            match_text: "needle".to_string(),
            line_text: "some needle here".to_string(),
            line_no: 2,
            ..Match::default()
        });
        result
    }

    fn render(config: Arc<SearchConfig>, result: &mut SearchResult) -> (String, SearchTotals) {
        let (mut printer, buffer) = Printer::with_buffer(config);
        let mut totals = SearchTotals::default();
        printer.print_result(result, &mut totals).unwrap();
        let out = String::from_utf8(buffer.lock().unwrap().clone()).unwrap();
        (out, totals)
    }

    #[test]
    fn test_plain_match_line() {
        let config = make_config(|_| {});
        let (out, totals) = render(config, &mut single_match_result());
        assert_eq!(out, "some needle here\n");
        assert_eq!(totals.matches, 1);
        assert_eq!(totals.results, 1);
    }

    #[test]
    fn test_filename_and_line_number_prefixes() {
        let config = make_config(|o| {
            o.show_filename = TriState::On;
            o.show_line_numbers = true;
        });
        let (out, _) = render(config, &mut single_match_result());
        assert_eq!(out, "file.txt:2:some needle here\n");
    }

    #[test]
    fn test_column_and_byte_offset() {
        let config = make_config(|o| {
            o.show_column_numbers = true;
            o.show_byte_offset = true;
        });
        let (out, _) = render(config, &mut single_match_result());
        // Column is 1-based within the line; the offset is the line start.
        assert_eq!(out, "6:5:some needle here\n");
    }

    #[test]
    fn test_count_mode() {
        let config = make_config(|o| {
            o.count = true;
            o.show_filename = TriState::On;
        });
        let (out, totals) = render(config, &mut single_match_result());
        assert_eq!(out, "file.txt:1\n");
        assert_eq!(totals.matches, 1);

        let config = make_config(|o| o.count = true);
        let mut empty = SearchResult::new("file.txt");
        let (out, totals) = render(config, &mut empty);
        assert_eq!(out, "0\n");
        assert_eq!(totals.results, 0);
    }

    #[test]
    fn test_list_modes() {
        let config = make_config(|o| o.files_with_matches = true);
        let (out, _) = render(config, &mut single_match_result());
        assert_eq!(out, "file.txt\n");

        let config = make_config(|o| o.files_with_matches = true);
        let mut empty = SearchResult::new("file.txt");
        let (out, _) = render(config, &mut empty);
        assert_eq!(out, "");

        let config = make_config(|o| o.files_without_match = true);
        let mut empty = SearchResult::new("file.txt");
        let (out, totals) = render(config, &mut empty);
        assert_eq!(out, "file.txt\n");
        assert_eq!(totals.results, 1);
    }

    #[test]
    fn test_binary_notice() {
        let config = make_config(|_| {});
        let mut result = single_match_result();
        result.is_binary = true;
        let (out, _) = render(config, &mut result);
        assert_eq!(out, "Binary file matches: file.txt\n");

        let config = make_config(|o| o.binary_as_text = true);
        let mut result = single_match_result();
        result.is_binary = true;
        let (out, _) = render(config, &mut result);
        assert_eq!(out, "some needle here\n");
    }

    #[test]
    fn test_context_rendering_with_gap_separator() {
        let config = make_config(|o| {
            o.context_before = 1;
            o.context_after = 1;
            o.show_line_numbers = true;
        });
        let mut result = SearchResult::new("file.txt");
        result.matches.push(Match {
            start: 0,
            end: 6,
            line_start: 0,
            line_end: 6,
            line_text: "needle".to_string(),
            match_text: "needle".to_string(),
            line_no: 2,
            context_before: Some("before one".to_string()),
            context_after: Some("after one".to_string()),
            ..Match::default()
        });
        result.matches.push(Match {
            start: 100,
            end: 106,
            line_start: 100,
            line_end: 106,
            line_text: "needle".to_string(),
            match_text: "needle".to_string(),
            line_no: 20,
            context_before: Some("before two".to_string()),
            context_after: Some("after two".to_string()),
            ..Match::default()
        });

        let (out, _) = render(config, &mut result);
        let expected = "\
1-before one
2:needle
3-after one
--
19-before two
20:needle
21-after two
";
        assert_eq!(out, expected);
    }

    #[test]
    fn test_multiline_match_rendering() {
        let config = make_config(|o| {
            o.multiline = true;
            o.show_line_numbers = true;
        });
        let mut result = SearchResult::new("file.txt");
        result.matches.push(Match {
            start: 4,
            end: 14,
            line_start: 0,
            line_end: 15,
            match_text: "one\ntwo\nth".to_string(),
            line_text: "pre one\ntwo\nthree".to_string(),
            line_no: 1,
            ..Match::default()
        });
        let (out, _) = render(config, &mut result);
        assert_eq!(out, "1:pre one\n2:two\n3:three\n");
    }

    #[test]
    fn test_limit_truncates_rendering() {
        let config = make_config(|o| o.limit = 1);
        let mut result = single_match_result();
        let extra = result.matches[0].clone();
        result.matches.push(extra);
        let (out, totals) = render(config, &mut result);
        assert_eq!(out.lines().count(), 1);
        assert_eq!(totals.matches, 1);
    }
}
