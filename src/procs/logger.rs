// Copyright 2019-2020 Benjamin Fry <benjaminfry@me.com>
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use std::io::{self, Write};
use std::sync::OnceLock;

use colored::{Color, Colorize};
use regex::Regex;

/// Colors handed out to presenters, red and yellow are reserved for log levels
const PALETTE: &[Color] = &[
    Color::Cyan,
    Color::Green,
    Color::Magenta,
    Color::Blue,
    Color::BrightCyan,
    Color::BrightGreen,
    Color::BrightMagenta,
    Color::BrightBlue,
];

/// Hands out prefix colors round-robin, owned by whoever creates the presenters
#[derive(Debug, Default)]
pub struct Palette {
    next: usize,
}

impl Palette {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_color(&mut self) -> Color {
        let color = PALETTE[self.next % PALETTE.len()];
        self.next += 1;
        color
    }
}

/// Log level marker, e.g. `E>` in `2020-01-01 12:00:00.000 [1234] main/101/init I> ...`
fn level_regex() -> &'static Regex {
    static LEVEL: OnceLock<Regex> = OnceLock::new();
    LEVEL.get_or_init(|| {
        Regex::new(r"^(?:\S+ \S+ \[\d+\] \S+ )?([F!ECWIVD])> ").expect("level regex is valid")
    })
}

fn level_color(line: &str) -> Option<Color> {
    let level = level_regex().captures(line)?.get(1)?.as_str();
    match level {
        "F" | "!" | "E" | "C" => Some(Color::Red),
        "W" => Some(Color::Yellow),
        _ => None,
    }
}

/// Line buffered writer, prefixing every complete line with `<id> | `
///
/// Each line is handed to the inner writer with a single `write_all`, so presenters sharing stdout
///  interleave whole lines only. An unterminated tail is kept until a later write completes it, or
///  until `finish` marks the end of the stream.
#[derive(Debug)]
pub struct LogPresenter<W: Write> {
    prefix: String,
    inner: W,
    pending: Vec<u8>,
}

impl<W: Write> LogPresenter<W> {
    pub fn new(id: &str, color: Color, inner: W) -> Self {
        Self {
            prefix: format!("{} | ", id).color(color).to_string(),
            inner,
            pending: Vec::new(),
        }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Presents the unterminated tail, if any, as a line of its own and flushes
    pub fn finish(&mut self) -> io::Result<()> {
        if !self.pending.is_empty() {
            let line = std::mem::take(&mut self.pending);
            self.present(&line)?;
        }

        self.inner.flush()
    }

    fn present(&mut self, line: &[u8]) -> io::Result<()> {
        let line = String::from_utf8_lossy(line);
        let line = line.trim_end_matches('\r');

        let out = match level_color(line) {
            Some(color) => format!("{}{}\n", self.prefix, line.color(color)),
            None => format!("{}{}\n", self.prefix, line),
        };

        self.inner.write_all(out.as_bytes())
    }
}

impl<W: Write> Write for LogPresenter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.pending.extend_from_slice(buf);

        while let Some(end) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            self.present(&line[..end])?;
        }

        Ok(buf.len())
    }

    /// Flushes the inner writer, a pending partial line stays buffered
    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
