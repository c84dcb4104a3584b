/// Reassembles newline-delimited text from arbitrarily split notification chunks.
///
/// Bytes are buffered raw, so a UTF-8 sequence split across two chunks is
/// decoded only once the full line has arrived.
#[derive(Debug, Default, Clone)]
pub struct LineFramer {
    buffer: Vec<u8>,
}

impl LineFramer {
    /// Creates an empty framer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one chunk and returns every line it completed, in order.
    ///
    /// Lines are trimmed of surrounding whitespace, which also strips the
    /// `\r` the firmware sends after each `\n`. Blank lines are dropped.
    ///
    /// ```
    /// use pepperoni::LineFramer;
    ///
    /// let mut framer = LineFramer::new();
    /// assert!(framer.push(b"id:1 t:1000 p:60 10,11,").is_empty());
    /// assert_eq!(vec!["id:1 t:1000 p:60 10,11,12"], framer.push(b"12\n"));
    /// ```
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);

        let mut lines = Vec::new();
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=position).collect();
            let line = String::from_utf8_lossy(&raw);
            let line = line.trim();
            if !line.is_empty() {
                lines.push(line.to_string());
            }
        }
        lines
    }

    /// Bytes received after the last newline.
    #[must_use]
    pub fn pending(&self) -> &[u8] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    use super::*;

    const STREAM: &[u8] = b"Data readings\n\rid:1 t:1000 p:60 10 11 12\n\rTotal readings:1\n\r";

    #[rstest]
    #[case(1)]
    #[case(2)]
    #[case(7)]
    #[case(20)]
    #[case(STREAM.len())]
    fn framing_is_independent_of_chunk_size(#[case] chunk_size: usize) {
        let mut framer = LineFramer::new();
        let lines: Vec<String> = STREAM
            .chunks(chunk_size)
            .flat_map(|chunk| framer.push(chunk))
            .collect();

        assert_eq!(
            vec![
                "Data readings".to_string(),
                "id:1 t:1000 p:60 10 11 12".to_string(),
                "Total readings:1".to_string(),
            ],
            lines
        );
        assert_eq!(b"\r", framer.pending());
    }

    #[test]
    fn multibyte_characters_survive_split_chunks() {
        let text = "température\n".as_bytes();
        let split = text
            .iter()
            .position(|byte| !byte.is_ascii())
            .map_or(1, |index| index + 1);
        let mut framer = LineFramer::new();

        assert!(framer.push(&text[..split]).is_empty());
        assert_eq!(vec!["température".to_string()], framer.push(&text[split..]));
    }

    #[test]
    fn one_chunk_may_complete_several_lines() {
        let mut framer = LineFramer::new();
        assert_eq!(
            vec!["a".to_string(), "b".to_string()],
            framer.push(b"a\n\nb\nc")
        );
        assert_eq!(b"c", framer.pending());
    }
}
