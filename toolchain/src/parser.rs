// Parser for routine declarations in generated C headers.
//
// Splits a token stream into top-level statements and parses each one
// against the prototype grammar
//
//   decl   := storage* ret IDENT '(' params ')' ';'
//   ret    := ('void' | 'int' | 'float') '*'*
//   params := 'void' | (param (',' param)*)?
//   param  := 'const'? ('int' | 'float' '*') IDENT
//
// using chumsky combinators. Statements that do not match are skipped, not
// reported as errors: headers routinely carry typedefs, macros and helper
// prototypes we have no use for.
//
// Preconditions: none; any UTF-8 text is accepted.
// Postconditions: every returned declaration came from one `;`-terminated
//                 statement at brace depth 0; output detection is not applied.
// Failure modes: none (non-matching statements land in `skipped`).
// Side effects: none.

use chumsky::input::{Stream, ValueInput};
use chumsky::prelude::*;
use chumsky::span::SimpleSpan;

use crate::decl::{BaseType, Declaration, ParamKind, Parameter, ReturnKind};
use crate::lexer::{Span, Token};

/// A statement that was not a usable declaration.
#[derive(Debug, Clone, PartialEq)]
pub struct Skipped {
    pub span: Span,
    pub reason: String,
}

/// Result of parsing one header: declarations in source order plus the
/// statements that were passed over.
#[derive(Debug, Default)]
pub struct ParseResult {
    pub declarations: Vec<Declaration>,
    pub skipped: Vec<Skipped>,
}

/// Parse every declaration statement in a header source string.
pub fn parse_declarations(source: &str) -> ParseResult {
    let lex_result = crate::lexer::lex(source);
    let mut result = ParseResult::default();

    for stmt in top_level_statements(&lex_result.tokens) {
        let span = Span {
            start: stmt[0].1.start,
            end: stmt[stmt.len() - 1].1.end,
        };

        // A lex error inside the statement means tokens were dropped; the
        // remainder might still parse, but it would not be what was written.
        if let Some(err) = lex_result
            .errors
            .iter()
            .find(|e| e.span.start >= span.start && e.span.end <= span.end)
        {
            result.skipped.push(Skipped {
                span,
                reason: err.message.clone(),
            });
            continue;
        }

        match parse_statement(source, stmt, span) {
            Ok(decl) => result.declarations.push(decl),
            Err(reason) => result.skipped.push(Skipped { span, reason }),
        }
    }

    result
}

/// Parse one `;`-terminated statement.
fn parse_statement(
    source: &str,
    stmt: &[(Token, Span)],
    span: Span,
) -> Result<Declaration, String> {
    let token_iter = stmt.iter().map(|(tok, span)| {
        let cspan: SimpleSpan = (span.start..span.end).into();
        (*tok, cspan)
    });
    let eoi: SimpleSpan = (span.end..span.end).into();
    let stream = Stream::from_iter(token_iter).map(eoi, |(t, s): (_, _)| (t, s));

    declaration_parser(source)
        .parse(stream)
        .into_result()
        .map_err(|errs| {
            errs.iter()
                .map(|e| e.to_string())
                .collect::<Vec<_>>()
                .join("; ")
        })
}

// ── Statement splitting ──
//
// A statement is a run of tokens ending in `;` at brace depth 0. Tokens
// before a `{` at depth 0 belong to a definition (function body, struct,
// initializer) and are dropped together with the braced block. The one
// transparent brace is `extern "C" { ... }`, whose contents are top level.

fn top_level_statements(tokens: &[(Token, Span)]) -> Vec<&[(Token, Span)]> {
    let mut statements = Vec::new();
    // One entry per open brace: true if it opened an `extern "C"` block.
    let mut braces: Vec<bool> = Vec::new();
    let mut start = 0;

    for (i, (tok, _)) in tokens.iter().enumerate() {
        match tok {
            Token::LBrace => {
                let transparent = open_depth(&braces) == 0
                    && i == start + 2
                    && tokens[start].0 == Token::Ident
                    && tokens[start + 1].0 == Token::StringLit;
                braces.push(transparent);
                if transparent {
                    start = i + 1;
                }
            }
            Token::RBrace => {
                braces.pop();
                if open_depth(&braces) == 0 {
                    start = i + 1;
                }
            }
            Token::Semi if open_depth(&braces) == 0 => {
                statements.push(&tokens[start..=i]);
                start = i + 1;
            }
            _ => {}
        }
    }

    statements
}

fn open_depth(braces: &[bool]) -> usize {
    braces.iter().filter(|&&transparent| !transparent).count()
}

// ── Declaration grammar ──

fn declaration_parser<'tokens, 'src: 'tokens, I>(
    source: &'src str,
) -> impl Parser<'tokens, I, Declaration, extra::Err<Rich<'tokens, Token, SimpleSpan>>> + 'src
where
    'tokens: 'src,
    I: ValueInput<'tokens, Token = Token, Span = SimpleSpan>,
{
    let ident = just(Token::Ident).map_with(move |_, e| {
        let span: SimpleSpan = e.span();
        source[span.start()..span.end()].to_string()
    });

    // `extern`, `static`, `inline` are accepted and ignored.
    let storage = ident
        .clone()
        .filter(|word: &String| matches!(word.as_str(), "extern" | "static" | "inline"))
        .repeated();

    let base_type = select! {
        Token::Void => BaseType::Void,
        Token::Int => BaseType::Int,
        Token::Float => BaseType::Float,
    };

    let pointer_depth = just(Token::Star)
        .repeated()
        .collect::<Vec<_>>()
        .map(|stars| stars.len());

    let return_kind = base_type
        .then(pointer_depth.clone())
        .map(|(base, pointer_depth)| ReturnKind {
            base,
            pointer_depth,
        });

    let param = just(Token::Const)
        .or_not()
        .map(|c| c.is_some())
        .then(base_type)
        .then(pointer_depth)
        .then(ident.clone())
        .try_map(|(((is_const, base), depth), name), span| {
            let kind = match (base, depth) {
                (BaseType::Int, 0) => ParamKind::ScalarInt,
                (BaseType::Float, 1) => ParamKind::FloatArray,
                _ => {
                    return Err(Rich::custom(
                        span,
                        format!(
                            "unsupported parameter type '{}{}' for '{}' (expected int or float*)",
                            base,
                            "*".repeat(depth),
                            name
                        ),
                    ))
                }
            };
            Ok(Parameter {
                kind,
                name,
                is_const,
                is_output: false,
            })
        });

    let void_list = just(Token::Void)
        .then(just(Token::RParen))
        .to(Vec::new());

    let param_list = param
        .separated_by(just(Token::Comma))
        .collect::<Vec<_>>()
        .then_ignore(just(Token::RParen));

    let params = just(Token::LParen).ignore_then(void_list.or(param_list));

    storage
        .ignore_then(return_kind)
        .then(ident)
        .then(params)
        .then_ignore(just(Token::Semi))
        .then_ignore(end())
        .map(|((return_kind, name), params)| Declaration::new(name, return_kind, params))
}

// ── Tests ──
