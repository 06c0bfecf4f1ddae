//! Progress bars for document ingestion, and a log writer that prints above
//! them so log lines never tear a bar.

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::io::{self, Write};
use std::sync::OnceLock;
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

const BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}";

static MULTI_PROGRESS: OnceLock<MultiProgress> = OnceLock::new();

fn multi_progress() -> &'static MultiProgress {
    MULTI_PROGRESS.get_or_init(|| {
        let mp = MultiProgress::new();
        mp.set_draw_target(ProgressDrawTarget::stderr_with_hz(10));
        mp
    })
}

fn print_line(line: &str) {
    let _ = multi_progress().println(line.trim_end_matches('\r').to_string());
}

/// A bar over `len` documents, or `None` when there is nothing to track or
/// output is machine-readable
pub fn document_progress(len: usize, message: &str, quiet: bool) -> Option<ProgressBar> {
    if len == 0 || quiet {
        return None;
    }

    let pb = multi_progress().add(ProgressBar::new(len as u64));
    if let Ok(style) = ProgressStyle::with_template(BAR_TEMPLATE) {
        pb.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
    }
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    Some(pb)
}

pub fn advance_progress(pb: &Option<ProgressBar>) {
    if let Some(pb) = pb {
        pb.inc(1);
    }
}

pub fn finish_progress(pb: Option<ProgressBar>, message: &str) {
    if let Some(pb) = pb {
        pb.finish_with_message(message.to_string());
    }
}

/// `MakeWriter` for the fmt layer
#[derive(Default, Clone)]
pub struct LogWriterFactory;

/// Buffers partial writes and emits whole lines
pub struct LogWriter {
    buffer: String,
}

impl Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buffer.push_str(&String::from_utf8_lossy(buf));
        while let Some(idx) = self.buffer.find('\n') {
            print_line(&self.buffer[..idx]);
            self.buffer.drain(..idx + 1);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        if !self.buffer.is_empty() {
            print_line(self.buffer.trim_end_matches('\n'));
            self.buffer.clear();
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
            buffer: String::new(),
        }
    }
}
