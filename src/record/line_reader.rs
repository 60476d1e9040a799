use super::Encoding;
use anyhow::Context;
use memchr::memchr2;
use std::io::Read;

/// Default read chunk size (64 KB).
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

/// Chunked reader yielding logical lines delimited by `\n`, `\r\n` or `\r`.
///
/// Terminators are never part of the returned line. A lone `\r` at the end of
/// the buffered data is held back until the next chunk shows whether a `\n`
/// follows, so a `\r\n` split across chunks still counts as one terminator.
/// A final unterminated remainder is returned as the last line.
pub struct LineReader<R: Read> {
    inner: R,
    buf: Vec<u8>,
    pos: usize,
    chunk_size: usize,
    eof: bool,
    encoding: Encoding,
    first_line: bool,
    bom_stripped: bool,
    line_no: u64,
}

impl<R: Read> LineReader<R> {
    pub fn new(inner: R, chunk_size: usize, encoding: Encoding) -> Self {
        Self {
            inner,
            buf: Vec::with_capacity(chunk_size.max(1)),
            pos: 0,
            chunk_size: chunk_size.max(1),
            eof: false,
            encoding,
            first_line: true,
            bom_stripped: false,
            line_no: 0,
        }
    }

    /// True once a UTF-8 BOM has been stripped from the first line.
    pub fn bom_stripped(&self) -> bool {
        self.bom_stripped
    }

    /// Next line without its terminator, or `None` at end of stream.
    pub fn read_line(&mut self) -> anyhow::Result<Option<String>> {
        loop {
            let pending = &self.buf[self.pos..];
            if let Some(off) = memchr2(b'\n', b'\r', pending) {
                let idx = self.pos + off;
                if self.buf[idx] == b'\n' {
                    return self.take_line(self.pos, idx, idx + 1).map(Some);
                }
                // \r: peek one byte further to collapse \r\n
                if idx + 1 < self.buf.len() {
                    let skip = if self.buf[idx + 1] == b'\n' { 2 } else { 1 };
                    return self.take_line(self.pos, idx, idx + skip).map(Some);
                }
                if self.eof {
                    return self.take_line(self.pos, idx, idx + 1).map(Some);
                }
                // \r at the end of the buffer, more data may follow
            } else if self.eof {
                if self.pos >= self.buf.len() {
                    return Ok(None);
                }
                let end = self.buf.len();
                return self.take_line(self.pos, end, end).map(Some);
            }
            self.fill()?;
        }
    }

    fn take_line(&mut self, start: usize, end: usize, consume_to: usize) -> anyhow::Result<String> {
        let mut bytes = &self.buf[start..end];
        if self.first_line {
            self.first_line = false;
            if bytes.starts_with(UTF8_BOM) {
                bytes = &bytes[UTF8_BOM.len()..];
                self.bom_stripped = true;
            }
        }
        self.line_no += 1;
        let line = match self.encoding {
            Encoding::Utf8 => std::str::from_utf8(bytes)
                .with_context(|| format!("line {} is not valid UTF-8", self.line_no))?
                .to_string(),
            Encoding::Latin1 => bytes.iter().map(|&b| b as char).collect(),
        };
        self.pos = consume_to;
        Ok(line)
    }

    fn fill(&mut self) -> anyhow::Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        let start = self.buf.len();
        self.buf.resize(start + self.chunk_size, 0);
        let n = self.inner.read(&mut self.buf[start..])?;
        self.buf.truncate(start + n);
        if n == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn collect_lines(src: &str, chunk_size: usize) -> Vec<String> {
        let mut reader = LineReader::new(Cursor::new(src.as_bytes()), chunk_size, Encoding::Utf8);
        let mut result = Vec::new();
        while let Some(line) = reader.read_line().unwrap() {
            result.push(line);
        }
        result
    }

    #[test]
    fn test_empty_input() {
        assert!(collect_lines("", 6).is_empty());
    }

    #[test]
    fn test_unterminated_final_line() {
        assert_eq!(collect_lines("hello", 6), vec!["hello"]);
    }

    #[test]
    fn test_mixed_terminators() {
        assert_eq!(collect_lines("hello\nworld", 6), vec!["hello", "world"]);
        assert_eq!(collect_lines("hello\rworld\n", 6), vec!["hello", "world"]);
        assert_eq!(collect_lines("hello\r\nworld\r", 6), vec!["hello", "world"]);
    }

    #[test]
    fn test_crlf_split_across_chunks() {
        // chunk size 6 puts the \r at the end of the first chunk
        assert_eq!(collect_lines("hello\r\nworld", 6), vec!["hello", "world"]);
    }

    #[test]
    fn test_bom_stripped_on_first_line() {
        let src = b"\xEF\xBB\xBFabc\ndef\n";
        let mut reader = LineReader::new(Cursor::new(&src[..]), 1024, Encoding::Utf8);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("abc"));
        assert!(reader.bom_stripped());
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("def"));
    }

    #[test]
    fn test_latin1_decoding() {
        let src = [b'n', 0xE9, b'\n'];
        let mut reader = LineReader::new(Cursor::new(&src[..]), 1024, Encoding::Latin1);
        assert_eq!(reader.read_line().unwrap().as_deref(), Some("né"));
    }

    /// Naive reference: split on `\n`, `\r\n`, `\r`; no trailing empty line.
    fn reference_split(src: &str) -> Vec<String> {
        let mut out = Vec::new();
        let mut cur = String::new();
        let mut chars = src.chars().peekable();
        while let Some(c) = chars.next() {
            match c {
                '\n' => out.push(std::mem::take(&mut cur)),
                '\r' => {
                    if chars.peek() == Some(&'\n') {
                        chars.next();
                    }
                    out.push(std::mem::take(&mut cur));
                }
                _ => cur.push(c),
            }
        }
        if !cur.is_empty() {
            out.push(cur);
        }
        out
    }

    #[test]
    fn test_matches_reference_for_many_shapes() {
        let tokens = ["", "defghIJKLMN", "a", "bc", "\n", "\r\n", "\r"];
        // deterministic walk over token combinations and chunk sizes
        for i in 0..tokens.len() {
            for j in 0..tokens.len() {
                for k in 0..tokens.len() {
                    for chunk_size in [1, 2, 3, 5, 64] {
                        let src = format!("{}{}{}", tokens[i], tokens[j], tokens[k]);
                        assert_eq!(
                            collect_lines(&src, chunk_size),
                            reference_split(&src),
                            "src: {:?} chunk: {}",
                            src,
                            chunk_size
                        );
                    }
                }
            }
        }
    }
}
