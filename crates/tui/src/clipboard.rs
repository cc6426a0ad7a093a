use std::io::Write;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use docdeck_core::mutation::{Clipboard, MutationError};

/// Clipboard that asks the terminal to set the selection through the
/// OSC 52 escape sequence, so copying works over SSH as well.
#[derive(Debug)]
pub struct Osc52Clipboard<W: Write> {
    out: W,
}

impl<W: Write> Osc52Clipboard<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl Osc52Clipboard<std::io::Stdout> {
    #[must_use]
    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl<W: Write> Clipboard for Osc52Clipboard<W> {
    fn set_text(&mut self, text: &str) -> Result<(), MutationError> {
        let payload = STANDARD.encode(text);
        write!(self.out, "\x1b]52;c;{payload}\x07")
            .and_then(|()| self.out.flush())
            .map_err(|error| MutationError::Clipboard(error.to_string()))
    }
}
