use std::io::{self, prelude::*};

/// A line-oriented wrapper over a byte stream used by the textual codecs:
/// counts lines for diagnostics, strips line endings, and supports one
/// line of pushback for grammars where the header section ends only when
/// the first data line is seen.
pub(crate) struct LineSource<R: io::Read> {
    handle: io::BufReader<R>,
    line_no: u64,
    pushback: Option<String>,
}

const BUFFER_SIZE: usize = 8192;

impl<R: io::Read> LineSource<R> {
    pub fn new(handle: R) -> LineSource<R> {
        LineSource {
            handle: io::BufReader::with_capacity(BUFFER_SIZE, handle),
            line_no: 0,
            pushback: None,
        }
    }

    /// The 1-based number of the line most recently returned.
    pub fn line_no(&self) -> u64 {
        self.line_no
    }

    /// The next line with its `\n` / `\r\n` ending removed, or `None` at
    /// end of input.
    pub fn next_line(&mut self) -> io::Result<Option<String>> {
        if let Some(line) = self.pushback.take() {
            return Ok(Some(line));
        }
        let mut buffer = String::new();
        let n = self.handle.read_line(&mut buffer)?;
        if n == 0 {
            return Ok(None);
        }
        self.line_no += 1;
        if buffer.ends_with('\n') {
            buffer.pop();
            if buffer.ends_with('\r') {
                buffer.pop();
            }
        }
        Ok(Some(buffer))
    }

    /// Return a line so the next call to
    /// [`next_line`](LineSource::next_line) yields it again.
    pub fn push_back(&mut self, line: String) {
        debug_assert!(self.pushback.is_none());
        self.pushback = Some(line);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_line_endings_and_pushback() {
        let data = "first\r\nsecond\nthird";
        let mut lines = LineSource::new(data.as_bytes());
        assert_eq!(lines.next_line().unwrap().as_deref(), Some("first"));
        let second = lines.next_line().unwrap().unwrap();
        assert_eq!(second, "second");
        assert_eq!(lines.line_no(), 2);
        lines.push_back(second);
        assert_eq!(lines.next_line().unwrap().as_deref(), Some("second"));
        assert_eq!(lines.next_line().unwrap().as_deref(), Some("third"));
        assert_eq!(lines.next_line().unwrap(), None);
    }
}
