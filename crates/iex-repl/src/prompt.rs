//! Prompt detection and output framing.
//!
//! The interpreter has no structured protocol: a reply is complete exactly
//! when the interpreter re-prints its prompt. Two prompt forms exist: the
//! final prompt (`iex(3)> `, ready for new top-level input) and the
//! continuation prompt (`...(3)> `, mid-construct, expecting another line).
//!
//! Framing is best-effort. Matching only at the end of the accumulated
//! buffer means a prompt split across two reads simply waits for the next
//! chunk, but program output that itself ends in a prompt-like string will
//! be mistaken for a reply boundary. That is a documented limitation of
//! driving a text console, not something this module tries to fix.

use std::sync::OnceLock;

use regex::Regex;

/// Which prompt form terminated a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptKind {
    /// The interpreter is ready for new top-level input.
    Final,
    /// The interpreter is inside an open construct and wants the next line.
    Continuation,
}

/// One framed reply: everything the interpreter printed since the previous
/// prompt, including the prompt that closed it.
#[derive(Debug, Clone)]
pub struct Reply {
    pub text: String,
    pub kind: PromptKind,
}

/// Accumulates raw output chunks and emits a [`Reply`] whenever the buffer
/// ends in a prompt.
pub struct OutputFramer {
    buffer: String,
    final_prompt: Regex,
    continuation_prompt: Regex,
}

impl OutputFramer {
    pub fn new() -> Self {
        Self {
            buffer: String::new(),
            // Numeric counter followed by ">" at end of output.
            final_prompt: Regex::new(r"\(\d+\)>\s*$").expect("final prompt pattern is valid"),
            // Leading ellipsis, then the same counter-and-">" form.
            continuation_prompt: Regex::new(r"\.\.\.\(\d+\)>\s*$")
                .expect("continuation prompt pattern is valid"),
        }
    }

    /// Appends one chunk. Returns the completed reply if the buffer now ends
    /// in a prompt, draining the accumulator; otherwise buffers and returns
    /// `None` until more output arrives.
    pub fn feed(&mut self, chunk: &str) -> Option<Reply> {
        self.buffer.push_str(chunk);

        // The continuation form also matches the final pattern, so it is
        // checked first.
        let kind = if self.continuation_prompt.is_match(&self.buffer) {
            PromptKind::Continuation
        } else if self.final_prompt.is_match(&self.buffer) {
            PromptKind::Final
        } else {
            return None;
        };

        let text = std::mem::take(&mut self.buffer);
        Some(Reply { text, kind })
    }

    /// Text buffered since the last framed reply. Between replies this holds
    /// only partial, unterminated output.
    pub fn pending(&self) -> &str {
        &self.buffer
    }

    /// Removes the trailing prompt marker from a framed reply, yielding the
    /// text a caller of `evaluate` actually wants.
    pub fn strip_prompt(text: &str) -> String {
        static STRIPPER: OnceLock<Regex> = OnceLock::new();
        let stripper = STRIPPER.get_or_init(|| {
            Regex::new(r"(\.\.\.)?(iex)?\(\d+\)>\s*$").expect("prompt strip pattern is valid")
        });
        stripper.replace(text, "").into_owned()
    }
}

impl Default for OutputFramer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffers_until_a_prompt_arrives() {
        let mut framer = OutputFramer::new();
        assert!(framer.feed("Erlang/OTP 26\n").is_none());
        assert!(framer.feed("Interactive Elixir").is_none());
        assert_eq!(framer.pending(), "Erlang/OTP 26\nInteractive Elixir");

        let reply = framer.feed("\niex(1)> ").expect("prompt completes the reply");
        assert_eq!(reply.kind, PromptKind::Final);
        assert_eq!(reply.text, "Erlang/OTP 26\nInteractive Elixir\niex(1)> ");
        assert_eq!(framer.pending(), "");
    }

    #[test]
    fn distinguishes_continuation_from_final_prompt() {
        let mut framer = OutputFramer::new();
        let reply = framer.feed("...(1)> ").expect("continuation frames a reply");
        assert_eq!(reply.kind, PromptKind::Continuation);

        let reply = framer.feed("(1)> ").expect("bare counter prompt is final");
        assert_eq!(reply.kind, PromptKind::Final);
    }

    #[test]
    fn prompt_split_across_chunks_waits_for_the_tail() {
        let mut framer = OutputFramer::new();
        assert!(framer.feed("2\niex(1").is_none());
        let reply = framer.feed(")> ").expect("second chunk completes the prompt");
        assert_eq!(reply.kind, PromptKind::Final);
        assert_eq!(reply.text, "2\niex(1)> ");
    }

    #[test]
    fn prompt_in_the_middle_of_the_buffer_is_not_a_boundary() {
        let mut framer = OutputFramer::new();
        assert!(framer.feed("iex(1)> trailing output\n").is_none());
    }

    #[test]
    fn strip_prompt_removes_the_trailing_marker_only() {
        assert_eq!(OutputFramer::strip_prompt("2\niex(3)> "), "2\n");
        assert_eq!(OutputFramer::strip_prompt("...(2)> "), "");
        assert_eq!(OutputFramer::strip_prompt("no prompt here"), "no prompt here");
        // Only the trailing marker goes; earlier prompt-like text stays.
        assert_eq!(
            OutputFramer::strip_prompt("iex(1)> echoed\n:ok\niex(2)> "),
            "iex(1)> echoed\n:ok\n"
        );
    }
}
