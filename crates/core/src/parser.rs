//! Extraction of tool invocations from model output.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::markup::Markup;
use crate::tool::Arguments;

static EXTRA_BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\n[ \t]*\n(?:[ \t]*\n)+").expect("valid regex")
});

/// A tool invocation decoded from model output.
///
/// The name is not checked against any registry and the arguments are
/// not checked against any schema.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionCall {
    /// Name of the tool to call.
    pub name: String,
    /// Decoded arguments.
    pub arguments: Arguments,
}

/// The result of parsing one block of model output.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ParsedOutput {
    /// Calls in the order they appear.
    pub calls: Vec<FunctionCall>,
    /// The text with every invocation block removed.
    pub clean_text: String,
}

/// Finds invocation blocks of one [`Markup`] in text.
#[derive(Clone, Debug)]
pub struct Parser {
    markup: Markup,
    block: Regex,
}

impl Parser {
    /// Creates a parser for `markup`.
    pub fn new(markup: Markup) -> Self {
        let pattern = format!(
            "(?s){}(.*?){}",
            regex::escape(markup.open),
            regex::escape(markup.close)
        );
        let block = Regex::new(&pattern).expect("escaped delimiters form a valid regex");
        Self { markup, block }
    }

    /// Returns the grammar this parser reads.
    #[inline]
    pub fn markup(&self) -> &Markup {
        &self.markup
    }

    /// Splits `text` into calls and clean text.
    ///
    /// A block only counts once its closing token is seen. A trailing
    /// block that is still open, as in a partially streamed reply, yields
    /// no call, but it is cut from the clean text all the same. An opening
    /// token followed by prose rather than a body is removed and the prose
    /// kept. Blocks whose body cannot be decoded are dropped silently.
    pub fn parse(&self, text: &str) -> ParsedOutput {
        let open = self.markup.open;
        let mut calls = vec![];
        let mut pieces: Vec<&str> = vec![];
        let mut last_end = 0;

        for captures in self.block.captures_iter(text) {
            let (Some(whole), Some(body)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            pieces.push(&text[last_end..whole.start()]);
            last_end = whole.end();

            // With stray opening tokens inside, the block starts at the
            // innermost one.
            let body = body.as_str();
            let body = match body.rfind(open) {
                Some(idx) => &body[idx + open.len()..],
                None => body,
            };
            match self.markup.decode(body) {
                Some(call) => calls.push(call),
                None => debug!("dropping undecodable call block: {body:?}"),
            }
        }

        let mut tail = &text[last_end..];
        let mut found_markup = last_end > 0;
        while let Some(idx) = tail.find(open) {
            found_markup = true;
            pieces.push(&tail[..idx]);
            let rest = &tail[idx + open.len()..];
            if self.markup.may_start_body(rest) {
                trace!("ignoring unterminated call block");
                tail = "";
                break;
            }
            // A stray opening token in prose is a seam.
            tail = rest;
        }
        if !found_markup && !tail.contains(self.markup.close) {
            return ParsedOutput {
                calls,
                clean_text: text.trim().to_owned(),
            };
        }
        pieces.push(tail);

        ParsedOutput {
            calls,
            clean_text: self.join_pieces(&pieces),
        }
    }

    fn join_pieces(&self, pieces: &[&str]) -> String {
        let mut joined = String::new();
        // Stray closing tokens are seams as well.
        for piece in pieces.iter().flat_map(|p| p.split(self.markup.close)) {
            let piece = piece.trim_start_matches([' ', '\t']);
            let kept = joined.trim_end_matches([' ', '\t']).len();
            joined.truncate(kept);
            if !joined.is_empty()
                && !joined.ends_with('\n')
                && !piece.is_empty()
                && !piece.starts_with('\n')
            {
                joined.push(' ');
            }
            joined.push_str(piece);
        }
        EXTRA_BLANK_LINES
            .replace_all(&joined, "\n\n")
            .trim()
            .to_owned()
    }
}

impl Default for Parser {
    #[inline]
    fn default() -> Self {
        Parser::new(Markup::default())
    }
}
