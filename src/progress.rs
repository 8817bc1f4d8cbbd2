//! Shared progress and logging helpers to keep progress bars pinned.
//!
//! Log lines are routed through the same `MultiProgress` as the bars, so a
//! long ingest or embed run never tears its progress display.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn add_progress_bar(len: u64) -> ProgressBar {
    multi_progress().add(ProgressBar::new(len))
}

/// A styled bar; `len` may be 0 and set later
pub fn start_progress_bar(len: u64, message: &str) -> ProgressBar {
    let pb = add_progress_bar(len);
    if let Ok(style) = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}",
    ) {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

pub fn finish_progress(pb: &ProgressBar, message: &str) {
    pb.finish_with_message(message.to_string());
}

/// `MakeWriter` for tracing-subscriber that prints above the progress bars
#[derive(Default, Clone)]
pub struct LogWriterFactory;

/// Buffers bytes until a full line is available
pub struct LogWriter {
    pending: Vec<u8>,
}

/// Drain every complete line from `pending`, leaving a partial tail
fn take_lines(pending: &mut Vec<u8>) -> Vec<String> {
    let mut lines = Vec::new();
    while let Some(end) = pending.iter().position(|&b| b == b'\n') {
        let raw: Vec<u8> = pending.drain(..=end).collect();
        let line = String::from_utf8_lossy(&raw[..end]);
        lines.push(line.trim_end_matches('\r').to_string());
    }
    lines
}

fn emit(line: String) {
    // Printing only fails when the terminal is gone
    let _ = multi_progress().println(line);
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);
        take_lines(&mut self.pending).into_iter().for_each(emit);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let rest = String::from_utf8_lossy(&self.pending).trim_end_matches('\r').to_string();
            self.pending.clear();
            emit(rest);
        }
        Ok(())
    }
}

impl Drop for LogWriter {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl<'a> MakeWriter<'a> for LogWriterFactory {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter {
            pending: Vec::with_capacity(256),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_lines_keeps_partial_tail() {
        let mut pending = b"first\r\nsecond\n\nthi".to_vec();
        let lines = take_lines(&mut pending);
        assert_eq!(lines, vec!["first", "second", ""]);
        assert_eq!(pending, b"thi");

        pending.extend_from_slice(b"rd\n");
        assert_eq!(take_lines(&mut pending), vec!["third"]);
        assert!(pending.is_empty());
    }

    #[test]
    fn test_take_lines_survives_split_utf8() {
        let word = "grâce\n".as_bytes();
        let (head, tail) = word.split_at(3);
        let mut pending = head.to_vec();
        assert!(take_lines(&mut pending).is_empty());
        pending.extend_from_slice(tail);
        assert_eq!(take_lines(&mut pending), vec!["grâce"]);
    }
}
