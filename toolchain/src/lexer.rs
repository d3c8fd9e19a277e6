// Lexer for generated C sources and headers.
//
// Tokenizes just enough of C for two consumers: the declaration parser
// (function prototypes in headers) and the allocation rewriter (calloc/free
// statements in function bodies). Uses the `logos` crate for DFA-based lexing.
//
// Preconditions: input is valid UTF-8.
// Postconditions: returns all tokens with byte-offset spans into the input,
//                 plus any lex errors.
// Failure modes: unrecognized characters produce `LexError`; lexing continues.
// Side effects: none.

use logos::Logos;
use std::fmt;

/// Byte-offset span in source text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }
}

/// A lexer error with location.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub span: Span,
    pub message: String,
}

/// Result of lexing: tokens plus any errors (non-fatal).
#[derive(Debug)]
pub struct LexResult {
    pub tokens: Vec<(Token, Span)>,
    pub errors: Vec<LexError>,
}

/// C token types.
///
/// Only the type keywords the declaration grammar cares about are keywords;
/// everything else alphanumeric (`calloc`, `free`, `sizeof`, `double`, ...)
/// is an `Ident` whose text is recovered from the span. Whitespace, comments
/// and preprocessor lines never reach the token stream, but spans always
/// index the original text so callers can splice it.
#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
#[logos(skip r"[ \t\r\n\f]+|//[^\n]*|/\*([^*]|\*+[^*/])*\*+/|#[^\n]*|\\\r?\n")]
pub enum Token {
    // ── Keywords ──
    #[token("void")]
    Void,
    #[token("int")]
    Int,
    #[token("float")]
    Float,
    #[token("const")]
    Const,

    // ── Symbols ──
    #[token("*")]
    Star,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token(";")]
    Semi,
    #[token(",")]
    Comma,
    #[token("=")]
    Assign,

    /// Any other single operator character. Multi-character operators
    /// (`+=`, `<=`, `->`, ...) arrive as consecutive `Punct`/`Assign` tokens.
    #[regex(r"[-+/%<>!&|^~?:.]")]
    Punct,

    // ── Literals ──
    #[regex(r"[0-9]+(\.[0-9]*)?([eE][+-]?[0-9]+)?[fFuUlL]*")]
    #[regex(r"0[xX][0-9a-fA-F]+[uUlL]*")]
    Number,

    #[regex(r#""([^"\\\n]|\\.)*""#)]
    StringLit,

    #[regex(r"'([^'\\\n]|\\.)*'")]
    CharLit,

    // ── Identifier ──
    //
    // Keywords win over Ident for the same length, so `int` is Int while
    // `interior` is Ident.
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*")]
    Ident,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Void => write!(f, "void"),
            Token::Int => write!(f, "int"),
            Token::Float => write!(f, "float"),
            Token::Const => write!(f, "const"),
            Token::Star => write!(f, "*"),
            Token::LParen => write!(f, "("),
            Token::RParen => write!(f, ")"),
            Token::LBrace => write!(f, "{{"),
            Token::RBrace => write!(f, "}}"),
            Token::LBracket => write!(f, "["),
            Token::RBracket => write!(f, "]"),
            Token::Semi => write!(f, ";"),
            Token::Comma => write!(f, ","),
            Token::Assign => write!(f, "="),
            Token::Punct => write!(f, "<operator>"),
            Token::Number => write!(f, "<number>"),
            Token::StringLit => write!(f, "<string>"),
            Token::CharLit => write!(f, "<char>"),
            Token::Ident => write!(f, "<ident>"),
        }
    }
}

// ── Public API ──

/// Lex a C source string into tokens.
///
/// Returns all successfully lexed tokens together with any errors for
/// unrecognised characters. Lexing is non-fatal: errors are collected and
/// the lexer continues past bad characters.
pub fn lex(source: &str) -> LexResult {
    let lexer = Token::lexer(source);
    let mut tokens = Vec::new();
    let mut errors = Vec::new();

    for (result, range) in lexer.spanned() {
        let span = Span {
            start: range.start,
            end: range.end,
        };
        match result {
            Ok(token) => tokens.push((token, span)),
            Err(()) => errors.push(LexError {
                span,
                message: format!("unexpected character: {:?}", span.text(source)),
            }),
        }
    }

    LexResult { tokens, errors }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: lex and assert no errors, return token list.
    fn lex_ok(source: &str) -> Vec<Token> {
        let result = lex(source);
        assert!(
            result.errors.is_empty(),
            "unexpected lex errors: {:?}",
            result.errors
        );
        result.tokens.into_iter().map(|(t, _)| t).collect()
    }

    /// Helper: lex and return (tokens, errors).
    fn lex_all(source: &str) -> (Vec<Token>, Vec<LexError>) {
        let result = lex(source);
        let tokens = result.tokens.into_iter().map(|(t, _)| t).collect();
        (tokens, result.errors)
    }

    // ── Keywords ──

    #[test]
    fn keywords() {
        let tokens = lex_ok("void int float const");
        assert_eq!(
            tokens,
            vec![Token::Void, Token::Int, Token::Float, Token::Const]
        );
    }

    #[test]
    fn keyword_vs_ident() {
        // `interior` is an identifier, not keyword `int` + `erior`
        let tokens = lex_ok("int interior floater");
        assert_eq!(tokens, vec![Token::Int, Token::Ident, Token::Ident]);
    }

    // ── Prototype ──

    #[test]
    fn prototype() {
        let tokens = lex_ok("void blurtwo(float* v, int M, float *output);");
        assert_eq!(
            tokens,
            vec![
                Token::Void,
                Token::Ident, // blurtwo
                Token::LParen,
                Token::Float,
                Token::Star,
                Token::Ident, // v
                Token::Comma,
                Token::Int,
                Token::Ident, // M
                Token::Comma,
                Token::Float,
                Token::Star,
                Token::Ident, // output
                Token::RParen,
                Token::Semi,
            ]
        );
    }

    // ── Allocation statement ──

    #[test]
    fn calloc_statement() {
        let src = "float *x = calloc((n - (0)) * 4, sizeof(float));";
        let tokens = lex_ok(src);
        assert_eq!(
            tokens,
            vec![
                Token::Float,
                Token::Star,
                Token::Ident, // x
                Token::Assign,
                Token::Ident, // calloc
                Token::LParen,
                Token::LParen,
                Token::Ident, // n
                Token::Punct,
                Token::LParen,
                Token::Number,
                Token::RParen,
                Token::RParen,
                Token::Star,
                Token::Number,
                Token::Comma,
                Token::Ident, // sizeof
                Token::LParen,
                Token::Float,
                Token::RParen,
                Token::RParen,
                Token::Semi,
            ]
        );
    }

    // ── Literals ──

    #[test]
    fn numbers() {
        let tokens = lex_ok("0 42 3.5f 1e-3 0x1Fu");
        assert_eq!(tokens, vec![Token::Number; 5]);
    }

    #[test]
    fn string_and_char_literals() {
        let tokens = lex_ok(r#"printf("%f \"x\" ", 'a', '\n');"#);
        assert_eq!(
            tokens,
            vec![
                Token::Ident,
                Token::LParen,
                Token::StringLit,
                Token::Comma,
                Token::CharLit,
                Token::Comma,
                Token::CharLit,
                Token::RParen,
                Token::Semi,
            ]
        );
    }

    // ── Trivia ──

    #[test]
    fn comments_and_directives_skipped() {
        let src = "#include <stdlib.h>\n// free(x);\n/* calloc(\n 1) */ int a;";
        let tokens = lex_ok(src);
        assert_eq!(tokens, vec![Token::Int, Token::Ident, Token::Semi]);
    }

    // ── Spans ──

    #[test]
    fn spans_index_original_text() {
        let src = "  free( tmp );";
        let result = lex(src);
        assert!(result.errors.is_empty());
        assert_eq!(result.tokens[0].1, Span { start: 2, end: 6 });
        assert_eq!(result.tokens[2].1.text(src), "tmp");
    }

    // ── Error recovery ──

    #[test]
    fn error_recovery() {
        let (tokens, errors) = lex_all("a @ b");
        assert_eq!(tokens, vec![Token::Ident, Token::Ident]);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].span, Span { start: 2, end: 3 });
    }
}
