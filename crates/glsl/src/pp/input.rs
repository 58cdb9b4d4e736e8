//! Source concatenation and line-continuation splicing.
//!
//! The shader source arrives as a list of strings that are treated as one
//! stream. Backslash-newline pairs vanish here while the logical line number
//! keeps counting, so the tokenizer never sees them; every remaining line
//! ending is normalized to `\n`.

pub struct SplicedSource {
    pub text: String,
    /// `(byte offset, logical line starting at that offset)`, ascending.
    events: Vec<(usize, u32)>,
    /// Line counter overflowed; the stream was cut short and is reported as
    /// end-of-input.
    pub truncated: bool,
}

impl SplicedSource {
    pub fn line_at(&self, offset: usize) -> u32 {
        match self.events.binary_search_by(|&(o, _)| o.cmp(&offset)) {
            Ok(i) => self.events[i].1,
            Err(0) => 1,
            Err(i) => self.events[i - 1].1,
        }
    }
}

pub fn splice(sources: &[&str]) -> SplicedSource {
    let mut text = String::new();
    let mut events = vec![(0usize, 1u32)];
    let mut line: u32 = 1;
    let mut truncated = false;

    let joined: String = sources.concat();
    let bytes = joined.as_bytes();
    let mut i = 0;

    let mut bump_line = |line: &mut u32, events: &mut Vec<(usize, u32)>, at: usize| -> bool {
        match line.checked_add(1) {
            Some(next) => {
                *line = next;
                events.push((at, next));
                true
            }
            None => false,
        }
    };

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b'\\' if matches!(bytes.get(i + 1), Some(b'\n') | Some(b'\r')) => {
                // Continuation: consume the backslash and one line ending.
                i += 2;
                if bytes.get(i - 1) == Some(&b'\r') && bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
                if !bump_line(&mut line, &mut events, text.len()) {
                    truncated = true;
                    break;
                }
            }
            b'\r' => {
                i += 1;
                if bytes.get(i) == Some(&b'\n') {
                    i += 1;
                }
                text.push('\n');
                if !bump_line(&mut line, &mut events, text.len()) {
                    truncated = true;
                    break;
                }
            }
            b'\n' => {
                i += 1;
                text.push('\n');
                if !bump_line(&mut line, &mut events, text.len()) {
                    truncated = true;
                    break;
                }
            }
            _ => {
                // Copy one UTF-8 scalar as-is.
                let ch = joined[i..].chars().next().unwrap();
                text.push(ch);
                i += ch.len_utf8();
            }
        }
    }

    SplicedSource {
        text,
        events,
        truncated,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn continuations_vanish_and_count() {
        let s = splice(&["a\\\nb\nc"]);
        assert_eq!(s.text, "ab\nc");
        // "ab" sits on line 1, but "b" itself came from line 2's source; the
        // token at offset 1 reports the spliced line.
        assert_eq!(s.line_at(0), 1);
        assert_eq!(s.line_at(1), 2);
        assert_eq!(s.line_at(3), 3);
    }

    #[test]
    fn crlf_normalizes() {
        let s = splice(&["x\r\ny\rz"]);
        assert_eq!(s.text, "x\ny\nz");
        assert_eq!(s.line_at(2), 2);
        assert_eq!(s.line_at(4), 3);
    }

    #[test]
    fn sources_concatenate() {
        let s = splice(&["#define A ", "1\nA"]);
        assert_eq!(s.text, "#define A 1\nA");
    }

    #[test]
    fn backslash_crlf_continuation() {
        let s = splice(&["a\\\r\nb"]);
        assert_eq!(s.text, "ab");
        assert_eq!(s.line_at(1), 2);
    }
}
