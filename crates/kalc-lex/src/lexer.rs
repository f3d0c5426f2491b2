//! Byte-stream lexer with a swappable source (a file, or standard input).
//!
//! The lexer holds exactly one lookahead character between calls (`last`,
//! seeded to a space so the first call skips straight into real input), the
//! same "held character" model as the classic Kaleidoscope `gettok`.

use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

use crate::token::Token;

/// Where the lexer is currently reading bytes from.
enum Source {
    Stdin,
    File(BufReader<File>),
    /// An in-memory byte string. Used to preload the embedded runtime
    /// prelude (see `kalc-runtime`) ahead of the user's own input, and by
    /// tests that want to drive the lexer/parser without touching the
    /// filesystem.
    Memory(io::Cursor<Vec<u8>>),
}

impl Read for Source {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Source::Stdin => io::stdin().read(buf),
            Source::File(r) => r.read(buf),
            Source::Memory(r) => r.read(buf),
        }
    }
}

pub struct Lexer {
    source: Source,
    /// The one held lookahead character; `None` once end-of-input is seen.
    last: Option<char>,
}

impl Lexer {
    /// A lexer reading from standard input, as at REPL start.
    pub fn new() -> Self {
        Lexer {
            source: Source::Stdin,
            last: Some(' '),
        }
    }

    /// Point the lexer at a file. Resets the held character to a whitespace
    /// sentinel so the next call re-primes the lookahead.
    pub fn set_file<P: AsRef<Path>>(&mut self, path: P) -> io::Result<()> {
        let file = File::open(path)?;
        self.source = Source::File(BufReader::new(file));
        self.last = Some(' ');
        Ok(())
    }

    /// Switch back to standard input. Must be called before the file stream
    /// backing a prior `set_file` goes out of scope, or the held lookahead
    /// would reference a closed stream.
    pub fn reset_to_stdin(&mut self) {
        self.source = Source::Stdin;
        self.last = Some(' ');
    }

    /// Point the lexer at an in-memory source string, as the driver does to
    /// feed the embedded runtime prelude before switching to stdin or a
    /// user file.
    pub fn set_str(&mut self, src: &str) {
        self.source = Source::Memory(io::Cursor::new(src.as_bytes().to_vec()));
        self.last = Some(' ');
    }

    fn next_raw_char(&mut self) -> Option<char> {
        let mut buf = [0u8; 1];
        match self.source.read(&mut buf) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(buf[0] as char),
        }
    }

    /// Produce the next token. Total: an unparseable or truncated stream
    /// simply yields `Token::Eof`, never an error.
    pub fn next_token(&mut self) -> Token {
        while let Some(c) = self.last {
            if c.is_whitespace() {
                self.last = self.next_raw_char();
            } else {
                break;
            }
        }

        let Some(c) = self.last else {
            return Token::Eof;
        };

        if c.is_ascii_alphabetic() {
            return self.lex_identifier(c);
        }

        if c.is_ascii_digit() || c == '.' {
            return self.lex_number(c);
        }

        if c == '#' {
            while let Some(ch) = self.last {
                if ch == '\n' || ch == '\r' {
                    break;
                }
                self.last = self.next_raw_char();
            }
            if self.last.is_some() {
                return self.next_token();
            }
            return Token::Eof;
        }

        let this_char = c;
        self.last = self.next_raw_char();
        Token::Char(this_char)
    }

    fn lex_identifier(&mut self, first: char) -> Token {
        let mut name = String::new();
        name.push(first);
        loop {
            self.last = self.next_raw_char();
            match self.last {
                Some(ch) if ch.is_ascii_alphanumeric() => name.push(ch),
                _ => break,
            }
        }

        match name.as_str() {
            "def" => Token::Def,
            "extern" => Token::Extern,
            "if" => Token::If,
            "then" => Token::Then,
            "else" => Token::Else,
            "for" => Token::For,
            "in" => Token::In,
            "binary" => Token::Binary,
            "unary" => Token::Unary,
            "var" => Token::Var,
            _ => Token::Identifier(name),
        }
    }

    /// Accumulate the whole `[0-9.]+` run with no validation of multiple
    /// dots, then parse it like `strtod` with a null endptr: take the value
    /// of the longest prefix that parses as an `f64` and discard everything
    /// after it, rather than re-lexing the remainder as further tokens.
    fn lex_number(&mut self, first: char) -> Token {
        let mut lexeme = String::new();
        lexeme.push(first);
        loop {
            self.last = self.next_raw_char();
            match self.last {
                Some(ch) if ch.is_ascii_digit() || ch == '.' => lexeme.push(ch),
                _ => break,
            }
        }

        Token::Number(longest_f64_prefix(&lexeme))
    }
}

impl Default for Lexer {
    fn default() -> Self {
        Self::new()
    }
}

/// The value of the longest prefix of `s` that parses as an `f64`; anything
/// after that prefix is discarded. `s` is guaranteed to be composed only of
/// ASCII digits and `.`, so a single-digit prefix always parses; this never
/// falls through to `0.0`.
fn longest_f64_prefix(s: &str) -> f64 {
    for end in (1..=s.len()).rev() {
        if let Ok(v) = s[..end].parse::<f64>() {
            return v;
        }
    }
    0.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lexer_for(src: &str) -> Lexer {
        let mut lexer = Lexer::new();
        lexer.set_str(src);
        lexer
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let mut lexer = lexer_for("def foo extern bar");
        assert_eq!(lexer.next_token(), Token::Def);
        assert_eq!(lexer.next_token(), Token::Identifier("foo".into()));
        assert_eq!(lexer.next_token(), Token::Extern);
        assert_eq!(lexer.next_token(), Token::Identifier("bar".into()));
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn lexes_numbers() {
        let mut lexer = lexer_for("42 3.14 .5");
        assert_eq!(lexer.next_token(), Token::Number(42.0));
        assert_eq!(lexer.next_token(), Token::Number(3.14));
        assert_eq!(lexer.next_token(), Token::Number(0.5));
        assert_eq!(lexer.next_token(), Token::Eof);
    }

    #[test]
    fn multi_dot_number_takes_the_longest_valid_prefix_and_drops_the_rest() {
        let mut lexer = lexer_for("1.2.3;");
        assert_eq!(lexer.next_token(), Token::Number(1.2));
        assert_eq!(lexer.next_token(), Token::Char(';'));
    }

    #[test]
    fn skips_comments_to_end_of_line() {
        let mut lexer = lexer_for("1 # a comment\n+ 2");
        assert_eq!(lexer.next_token(), Token::Number(1.0));
        assert_eq!(lexer.next_token(), Token::Char('+'));
        assert_eq!(lexer.next_token(), Token::Number(2.0));
    }

    #[test]
    fn emits_single_char_tokens_for_operators() {
        let mut lexer = lexer_for("+ - * < ( ) , ;");
        for c in ['+', '-', '*', '<', '(', ')', ',', ';'] {
            assert_eq!(lexer.next_token(), Token::Char(c));
        }
    }
}
