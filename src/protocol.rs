//! Line-oriented control protocol spoken by the pilot script on its
//! output stream. A line is a control directive iff it starts with the
//! sentinel; everything else is operator-facing log text.

/// Sentinel prefix, including its trailing space.
pub const CONTROL_PREFIX: &str = "=-.-= ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PilotLine {
    Directive { attribute: String, value: String },
    Text(String),
}

/// Streaming decoder over an append-only byte buffer. Restartable across
/// arbitrarily small reads: a line split across two pushes is only
/// surfaced once both halves have arrived.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `bytes` and returns every line completed by them, splitting
    /// on the last newline and keeping the unterminated tail buffered.
    pub fn push(&mut self, bytes: &[u8]) -> Vec<PilotLine> {
        self.buffer.extend_from_slice(bytes);
        let Some(last_newline) = self.buffer.iter().rposition(|&b| b == b'\n') else {
            return Vec::new();
        };
        let complete: Vec<u8> = self.buffer.drain(..=last_newline).collect();
        complete[..complete.len() - 1]
            .split(|&b| b == b'\n')
            .map(|raw| classify(&String::from_utf8_lossy(raw)))
            .collect()
    }

    /// Flushes whatever is left after the last newline as a final,
    /// unterminated text line.
    pub fn finish(&mut self) -> Option<PilotLine> {
        if self.buffer.is_empty() {
            return None;
        }
        let tail = std::mem::take(&mut self.buffer);
        Some(PilotLine::Text(
            String::from_utf8_lossy(&tail).into_owned(),
        ))
    }
}

/// A sentinel line missing the attribute/value split is surfaced as text
/// rather than dropped, so a malformed pilot still shows the operator
/// what it said.
fn classify(line: &str) -> PilotLine {
    if let Some(rest) = line.strip_prefix(CONTROL_PREFIX) {
        if let Some((attribute, value)) = rest.split_once(' ') {
            return PilotLine::Directive {
                attribute: attribute.to_string(),
                value: value.to_string(),
            };
        }
    }
    PilotLine::Text(line.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn directive(attribute: &str, value: &str) -> PilotLine {
        PilotLine::Directive {
            attribute: attribute.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn control_line_decodes_to_directive() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"=-.-= lifetime 3600\n");
        assert_eq!(lines, vec![directive("lifetime", "3600")]);
        assert_eq!(decoder.finish(), None);
    }

    #[test]
    fn plain_line_decodes_to_text() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"hello world\n");
        assert_eq!(lines, vec![PilotLine::Text("hello world".to_string())]);
    }

    #[test]
    fn value_keeps_everything_after_the_first_space() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"=-.-= JOB_ID 12345 pending\n");
        assert_eq!(lines, vec![directive("JOB_ID", "12345 pending")]);
    }

    #[test]
    fn sentinel_without_value_is_text() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"=-.-= orphan\n");
        assert_eq!(lines, vec![PilotLine::Text("=-.-= orphan".to_string())]);
    }

    #[test]
    fn split_line_surfaces_only_once_complete() {
        let mut decoder = LineDecoder::new();
        assert!(decoder.push(b"=-.-= PID ").is_empty());
        let lines = decoder.push(b"4711\nleft");
        assert_eq!(lines, vec![directive("PID", "4711")]);
        assert_eq!(decoder.finish(), Some(PilotLine::Text("left".to_string())));
    }

    #[test]
    fn chunk_boundaries_do_not_change_decoding() {
        let input = b"=-.-= START 99\nprogress line\n=-.-= JOB_ID 55\ntail";

        let mut whole = LineDecoder::new();
        let mut expected = whole.push(input);
        expected.extend(whole.finish());

        let mut byte_at_a_time = LineDecoder::new();
        let mut got = Vec::new();
        for byte in input {
            got.extend(byte_at_a_time.push(&[*byte]));
        }
        got.extend(byte_at_a_time.finish());

        assert_eq!(got, expected);
    }

    #[test]
    fn invalid_utf8_is_replaced_not_fatal() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"bad \xff byte\n");
        let PilotLine::Text(text) = &lines[0] else {
            panic!("expected text line");
        };
        assert!(text.contains('\u{fffd}'));
    }

    #[test]
    fn empty_line_is_preserved() {
        let mut decoder = LineDecoder::new();
        let lines = decoder.push(b"\n");
        assert_eq!(lines, vec![PilotLine::Text(String::new())]);
    }
}
