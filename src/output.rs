//! Line-buffered, labeled task output.
//!
//! A `Colorizer` sits between one stream of a child process and a shared sink.
//! Child output arrives in arbitrary chunks; the colorizer keeps the unterminated
//! tail (the carry) across writes and only ever hands complete labeled lines to
//! the sink.

use std::io::{self, Write};

use crate::palette::Color;
use crate::sink::Sink;

/// Indicates the source stream of task output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    /// Standard Output.
    Stdout,
    /// Standard Error.
    Stderr,
}

impl StreamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            StreamKind::Stdout => "stdout",
            StreamKind::Stderr => "stderr",
        }
    }
}

/// Turns a raw byte stream into `{color}{index}> line{reset}` records.
///
/// One colorizer belongs to exactly one producer; it is never written to
/// concurrently.
#[derive(Debug)]
pub struct Colorizer<W> {
    index: usize,
    color: Color,
    carry: Vec<u8>,
    sink: W,
    closed: bool,
}

impl<W: Write> Colorizer<W> {
    pub fn new(index: usize, color: Color, sink: W) -> Self {
        Self {
            index,
            color,
            carry: Vec::new(),
            sink,
            closed: false,
        }
    }

    /// Writes an already complete line, bypassing the carry.
    ///
    /// Used for announcements and diagnostics.
    pub fn write_line(&mut self, text: &str) -> io::Result<()> {
        self.sink.write_all(&self.color.paint(self.index, text.as_bytes()))
    }

    /// Bytes currently held back waiting for a terminator.
    #[cfg(test)]
    pub fn pending(&self) -> &[u8] {
        &self.carry
    }
}

impl<W: Write> Write for Colorizer<W> {
    fn write(&mut self, chunk: &[u8]) -> io::Result<usize> {
        if chunk.is_empty() {
            return Ok(0);
        }
        self.carry.extend_from_slice(chunk);

        let mut start = 0;
        while let Some(pos) = self.carry[start..].iter().position(|&b| b == b'\n') {
            let end = start + pos;
            let line = self.color.paint(self.index, trim_cr(&self.carry[start..end]));
            if let Err(err) = self.sink.write_all(&line) {
                // keep the line that failed and everything after it
                self.carry.drain(..start);
                return Err(not_interrupted(err));
            }
            start = end + 1;
        }
        self.carry.drain(..start);
        Ok(chunk.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.sink.flush()
    }
}

impl<W: Write> Sink for Colorizer<W> {
    fn close(&mut self) -> io::Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        if !self.carry.is_empty() {
            let line = self.color.paint(self.index, trim_cr(&self.carry));
            self.carry.clear();
            self.sink.write_all(&line)?;
        }
        self.sink.flush()
    }
}

// The failed chunk is already in the carry; `write_all` retries `Interrupted`
// and would append it a second time.
fn not_interrupted(err: io::Error) -> io::Error {
    if err.kind() == io::ErrorKind::Interrupted {
        io::Error::new(io::ErrorKind::Other, err)
    } else {
        err
    }
}

fn trim_cr(line: &[u8]) -> &[u8] {
    line.strip_suffix(b"\r").unwrap_or(line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SharedSink;

    fn colorizer(index: usize) -> (Colorizer<SharedSink<Vec<u8>>>, SharedSink<Vec<u8>>) {
        let sink = SharedSink::new(Vec::new());
        (Colorizer::new(index, Color::Cyan, sink.clone()), sink)
    }

    fn plain_lines(raw: &[u8]) -> Vec<String> {
        let stripped = strip_ansi_escapes::strip(raw);
        String::from_utf8_lossy(&stripped)
            .lines()
            .map(str::to_string)
            .collect()
    }

    struct FailAfter {
        remaining: usize,
        written: Vec<u8>,
    }

    impl Write for FailAfter {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.remaining == 0 {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink gone"));
            }
            self.remaining -= 1;
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn emits_one_line_per_newline() {
        let (mut out, sink) = colorizer(2);
        out.write_all(b"alpha\nbeta\n").unwrap();
        assert_eq!(
            sink.contents(),
            b"\x1b[36m2> alpha\x1b[0m\n\x1b[36m2> beta\x1b[0m\n".to_vec()
        );
        assert!(out.pending().is_empty());
    }

    #[test]
    fn holds_partial_line_until_terminated() {
        let (mut out, sink) = colorizer(0);
        out.write_all(b"hel").unwrap();
        assert!(sink.contents().is_empty());
        assert_eq!(out.pending(), b"hel");
        out.write_all(b"lo\nwor").unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["0> hello"]);
        assert_eq!(out.pending(), b"wor");
    }

    #[test]
    fn strips_carriage_return_before_newline() {
        let (mut out, sink) = colorizer(1);
        out.write_all(b"dos\r\nline\r").unwrap();
        out.write_all(b"\n").unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["1> dos", "1> line"]);
    }

    #[test]
    fn empty_chunk_is_noop() {
        let (mut out, sink) = colorizer(0);
        out.write_all(b"abc").unwrap();
        assert_eq!(out.write(b"").unwrap(), 0);
        assert!(sink.contents().is_empty());
        assert_eq!(out.pending(), b"abc");
    }

    #[test]
    fn lone_newline_flushes_carry() {
        let (mut out, sink) = colorizer(0);
        out.write_all(b"\n").unwrap();
        out.write_all(b"tail").unwrap();
        out.write_all(b"\n").unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["0> ", "0> tail"]);
    }

    #[test]
    fn consecutive_newlines_produce_blank_lines() {
        let (mut out, sink) = colorizer(4);
        out.write_all(b"a\n\n\nb\n").unwrap();
        assert_eq!(
            plain_lines(&sink.contents()),
            vec!["4> a", "4> ", "4> ", "4> b"]
        );
    }

    #[test]
    fn close_flushes_unterminated_line_once() {
        let (mut out, sink) = colorizer(0);
        out.write_all(b"a\nb").unwrap();
        out.close().unwrap();
        out.close().unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["0> a", "0> b"]);
    }

    #[test]
    fn close_without_carry_emits_nothing() {
        let (mut out, sink) = colorizer(0);
        out.write_all(b"done\n").unwrap();
        out.close().unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["0> done"]);
    }

    #[test]
    fn chunking_is_transparent() {
        let input: &[u8] = b"first line\nsecond\r\n\nthird has no end";
        let (mut whole, whole_sink) = colorizer(3);
        whole.write_all(input).unwrap();
        whole.close().unwrap();
        let expected = whole_sink.contents();

        for size in 1..=input.len() {
            let (mut chunked, chunked_sink) = colorizer(3);
            for chunk in input.chunks(size) {
                chunked.write_all(chunk).unwrap();
            }
            chunked.close().unwrap();
            assert_eq!(chunked_sink.contents(), expected, "chunk size {}", size);
        }

        // uneven splits, including ones landing between \r and \n
        for split in 0..=input.len() {
            let (head, tail) = input.split_at(split);
            let (mut split_out, split_sink) = colorizer(3);
            split_out.write_all(head).unwrap();
            split_out.write_all(tail).unwrap();
            split_out.close().unwrap();
            assert_eq!(split_sink.contents(), expected, "split at {}", split);
        }
    }

    #[test]
    fn k_lines_yield_k_labeled_lines() {
        let (mut out, sink) = colorizer(5);
        let body = (0..25).map(|n| format!("line {}\n", n)).collect::<String>();
        out.write_all(body.as_bytes()).unwrap();
        out.close().unwrap();
        let lines = plain_lines(&sink.contents());
        assert_eq!(lines.len(), 25);
        assert!(lines.iter().all(|line| line.starts_with("5> line ")));
    }

    #[test]
    fn write_line_bypasses_carry() {
        let (mut out, sink) = colorizer(1);
        out.write_all(b"partial").unwrap();
        out.write_line("Running: make").unwrap();
        assert_eq!(plain_lines(&sink.contents()), vec!["1> Running: make"]);
        assert_eq!(out.pending(), b"partial");
    }

    #[test]
    fn sink_failure_keeps_unemitted_data() {
        let sink = FailAfter {
            remaining: 1,
            written: Vec::new(),
        };
        let mut out = Colorizer::new(0, Color::Red, sink);
        let err = out.write(b"one\ntwo\nthr").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(plain_lines(&out.sink.written), vec!["0> one"]);
        assert_eq!(out.pending(), b"two\nthr");
    }

    #[test]
    fn interrupted_sink_does_not_duplicate_carry() {
        struct Interrupting;
        impl Write for Interrupting {
            fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
                Err(io::Error::from(io::ErrorKind::Interrupted))
            }
            fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
                Err(io::Error::from(io::ErrorKind::Interrupted))
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let mut out = Colorizer::new(0, Color::Cyan, Interrupting);
        let err = out.write_all(b"one\ntwo").unwrap_err();
        assert_ne!(err.kind(), io::ErrorKind::Interrupted);
        assert_eq!(out.pending(), b"one\ntwo");
    }
}
