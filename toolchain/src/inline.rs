// inline.rs — Routine bodies for inlined harnesses
//
// Pulls the body of a routine definition out of its C source and
// specializes it for one binding: every scalar parameter is replaced by its
// bound value, constant array sizes and comparison bounds are folded, and
// local arrays whose size folded to a literal are zero-initialized.
//
// Preconditions: the definition source is C text the lexer accepts.
// Postconditions: text outside substituted or folded tokens is kept
//                 verbatim.
// Failure modes: see `InlineError`.
// Side effects: none.

use std::fmt;

use crate::diag::{codes, line_of, DiagCode};
use crate::lexer::{self, Span, Token};

// ── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InlineError {
    Lex { line: usize, message: String },
    NoDefinition { function: String },
    Unbalanced { function: String },
    /// A `return` would leave `main` instead of the routine.
    Returns { function: String, line: usize },
    /// A scalar parameter is written to, so it cannot become a literal.
    ScalarWritten {
        function: String,
        name: String,
        line: usize,
    },
}

impl InlineError {
    pub fn code(&self) -> DiagCode {
        codes::E0501
    }
}

impl fmt::Display for InlineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InlineError::Lex { line, message } => {
                write!(f, "cannot tokenize definition, line {}: {}", line, message)
            }
            InlineError::NoDefinition { function } => {
                write!(f, "no definition of '{}' to inline", function)
            }
            InlineError::Unbalanced { function } => {
                write!(f, "body of '{}' has unbalanced braces", function)
            }
            InlineError::Returns { function, line } => write!(
                f,
                "cannot inline '{}': it returns early (line {})",
                function, line
            ),
            InlineError::ScalarWritten {
                function,
                name,
                line,
            } => write!(
                f,
                "cannot inline '{}': parameter '{}' is assigned (line {})",
                function, name, line
            ),
        }
    }
}

impl std::error::Error for InlineError {}

// ── Body extraction ─────────────────────────────────────────────────────────

/// Text between the braces of the definition of `function` in `source`.
pub fn extract_body<'s>(source: &'s str, function: &str) -> Result<&'s str, InlineError> {
    let lexed = lexer::lex(source);
    if let Some(err) = lexed.errors.first() {
        return Err(InlineError::Lex {
            line: line_of(source, err.span.start),
            message: err.message.clone(),
        });
    }
    let toks = &lexed.tokens;
    let text = |i: usize| toks[i].1.text(source);

    let mut depth = 0usize;
    for i in 0..toks.len() {
        match toks[i].0 {
            Token::LBrace => depth += 1,
            Token::RBrace => depth = depth.saturating_sub(1),
            Token::Ident if depth == 0 && text(i) == function => {
                if toks.get(i + 1).map(|t| t.0) != Some(Token::LParen) {
                    continue;
                }
                let Some(close) = matching(toks, i + 1, Token::LParen, Token::RParen) else {
                    continue;
                };
                // A prototype ends in `;` and is skipped.
                if toks.get(close + 1).map(|t| t.0) != Some(Token::LBrace) {
                    continue;
                }
                let open = close + 1;
                let end = matching(toks, open, Token::LBrace, Token::RBrace).ok_or_else(|| {
                    InlineError::Unbalanced {
                        function: function.to_string(),
                    }
                })?;
                if let Some(ret) = (open..end)
                    .find(|&k| toks[k].0 == Token::Ident && text(k) == "return")
                {
                    return Err(InlineError::Returns {
                        function: function.to_string(),
                        line: line_of(source, toks[ret].1.start),
                    });
                }
                return Ok(&source[toks[open].1.end..toks[end].1.start]);
            }
            _ => {}
        }
    }
    Err(InlineError::NoDefinition {
        function: function.to_string(),
    })
}

/// Index of the token closing the group opened at `open`.
fn matching(toks: &[(Token, Span)], open: usize, left: Token, right: Token) -> Option<usize> {
    let mut depth = 0usize;
    for (k, (tok, _)) in toks.iter().enumerate().skip(open) {
        if *tok == left {
            depth += 1;
        } else if *tok == right {
            depth -= 1;
            if depth == 0 {
                return Some(k);
            }
        }
    }
    None
}

// ── Specialization ──────────────────────────────────────────────────────────

/// Substitute `scalars` into `body`, fold constants and zero-initialize
/// fixed-size local arrays.
pub fn specialize(body: &str, function: &str, scalars: &[(&str, i32)]) -> Result<String, InlineError> {
    let substituted = substitute(body, function, scalars)?;
    let folded = splice(&substituted, fold_edits(&substituted));
    Ok(splice(&folded, zero_init_edits(&folded)))
}

fn splice(source: &str, mut edits: Vec<(Span, String)>) -> String {
    edits.sort_by_key(|(span, _)| span.start);
    let mut out = String::with_capacity(source.len());
    let mut last = 0;
    for (span, replacement) in &edits {
        out.push_str(&source[last..span.start]);
        out.push_str(replacement);
        last = span.end;
    }
    out.push_str(&source[last..]);
    out
}

/// Two tokens written with nothing between them.
fn adjacent(toks: &[(Token, Span)], a: usize, b: usize) -> bool {
    toks[a].1.end == toks[b].1.start
}

fn substitute(body: &str, function: &str, scalars: &[(&str, i32)]) -> Result<String, InlineError> {
    let toks = lexer::lex(body).tokens;
    let text = |i: usize| toks[i].1.text(body);
    let punct = |i: usize, chars: &str| {
        toks.get(i)
            .is_some_and(|(t, s)| *t == Token::Punct && chars.contains(s.text(body)))
    };

    let mut edits = Vec::new();
    for i in 0..toks.len() {
        if toks[i].0 != Token::Ident {
            continue;
        }
        let Some(&(name, value)) = scalars.iter().find(|(n, _)| *n == text(i)) else {
            continue;
        };
        // Member access: `s.n`, `p->n`.
        if i > 0 && punct(i - 1, ".>") {
            continue;
        }

        let next = toks.get(i + 1).map(|t| t.0);
        let plain_assign = next == Some(Token::Assign)
            && !(toks.get(i + 2).map(|t| t.0) == Some(Token::Assign) && adjacent(&toks, i + 1, i + 2));
        let compound = punct(i + 1, "+-*/%&|^")
            && toks.get(i + 2).map(|t| t.0) == Some(Token::Assign)
            && adjacent(&toks, i + 1, i + 2);
        let post_step = punct(i + 1, "+-")
            && punct(i + 2, "+-")
            && text(i + 1) == text(i + 2)
            && adjacent(&toks, i + 1, i + 2);
        let pre_step = i >= 2
            && punct(i - 1, "+-")
            && punct(i - 2, "+-")
            && text(i - 1) == text(i - 2)
            && adjacent(&toks, i - 2, i - 1);
        if plain_assign || compound || post_step || pre_step {
            return Err(InlineError::ScalarWritten {
                function: function.to_string(),
                name: name.to_string(),
                line: line_of(body, toks[i].1.start),
            });
        }

        let literal = if value < 0 {
            format!("({})", value)
        } else {
            value.to_string()
        };
        edits.push((toks[i].1, literal));
    }
    Ok(splice(body, edits))
}

/// Constant array sizes `[4 * 5]` and comparison bounds `i < 4 * 5;`.
fn fold_edits(source: &str) -> Vec<(Span, String)> {
    let toks = lexer::lex(source).tokens;
    let text = |i: usize| toks[i].1.text(source);
    let mut edits = Vec::new();

    for i in 0..toks.len() {
        let start = match toks[i].0 {
            Token::LBracket => i + 1,
            Token::Punct if matches!(text(i), "<" | ">") => {
                // Skip shifts and `->`.
                let joined_before =
                    i > 0 && toks[i - 1].0 == Token::Punct && adjacent(&toks, i - 1, i);
                let joined_after = toks
                    .get(i + 1)
                    .is_some_and(|t| t.0 == Token::Punct && adjacent(&toks, i, i + 1));
                if joined_before || joined_after {
                    continue;
                }
                match toks.get(i + 1) {
                    Some((Token::Assign, _)) if adjacent(&toks, i, i + 1) => i + 2,
                    _ => i + 1,
                }
            }
            _ => continue,
        };

        let Some(end) = constant_run(source, &toks, start) else {
            continue;
        };
        // The run must be a whole operand of the bracket or comparison.
        let closes = match toks.get(end).map(|t| t.0) {
            Some(Token::RBracket) => toks[i].0 == Token::LBracket,
            Some(Token::Semi | Token::RParen | Token::Comma) => toks[i].0 == Token::Punct,
            Some(Token::Punct) => toks[i].0 == Token::Punct && matches!(text(end), "&" | "|" | "?"),
            _ => false,
        };
        if !closes || end - start < 2 {
            continue;
        }
        let run: Vec<(Token, &str)> = (start..end).map(|k| (toks[k].0, text(k))).collect();
        if let Some(value) = ConstEval::new(&run).eval() {
            let span = Span {
                start: toks[start].1.start,
                end: toks[end - 1].1.end,
            };
            edits.push((span, value.to_string()));
        }
    }
    edits
}

/// End of the balanced run of integer-constant tokens starting at `start`.
fn constant_run(source: &str, toks: &[(Token, Span)], start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut k = start;
    while let Some((tok, span)) = toks.get(k) {
        match tok {
            Token::Number if is_int_literal(span.text(source)) => {}
            Token::Star => {}
            Token::Punct if matches!(span.text(source), "+" | "-" | "/" | "%") => {}
            Token::LParen => depth += 1,
            Token::RParen if depth > 0 => depth -= 1,
            _ => break,
        }
        k += 1;
    }
    (depth == 0 && k > start).then_some(k)
}

fn is_int_literal(s: &str) -> bool {
    !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit())
}

/// `float a[20];` → `float a[20] = {0};` for int and float locals.
fn zero_init_edits(source: &str) -> Vec<(Span, String)> {
    let toks = lexer::lex(source).tokens;
    let is = |k: usize, t: Token| toks.get(k).is_some_and(|(x, _)| *x == t);
    let mut edits = Vec::new();

    for i in 0..toks.len() {
        let stmt_start =
            i == 0 || matches!(toks[i - 1].0, Token::Semi | Token::LBrace | Token::RBrace);
        if !stmt_start || !(is(i, Token::Float) || is(i, Token::Int)) {
            continue;
        }
        let sized = is(i + 1, Token::Ident)
            && is(i + 2, Token::LBracket)
            && is(i + 3, Token::Number)
            && is_int_literal(toks[i + 3].1.text(source))
            && is(i + 4, Token::RBracket)
            && is(i + 5, Token::Semi);
        if sized {
            let at = toks[i + 4].1.end;
            edits.push((Span { start: at, end: at }, " = {0}".to_string()));
        }
    }
    edits
}

// ── Constant evaluation ─────────────────────────────────────────────────────

/// Integer arithmetic with C semantics; `None` on overflow, division by
/// zero, or anything that is not a complete expression.
struct ConstEval<'t> {
    toks: &'t [(Token, &'t str)],
    pos: usize,
}

impl<'t> ConstEval<'t> {
    fn new(toks: &'t [(Token, &'t str)]) -> Self {
        ConstEval { toks, pos: 0 }
    }

    fn eval(mut self) -> Option<i64> {
        let v = self.expr()?;
        (self.pos == self.toks.len()).then_some(v)
    }

    fn peek(&self) -> Option<&'t str> {
        self.toks.get(self.pos).map(|(_, s)| *s)
    }

    fn expr(&mut self) -> Option<i64> {
        let mut acc = self.term()?;
        while let Some(op @ ("+" | "-")) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = if op == "+" {
                acc.checked_add(rhs)?
            } else {
                acc.checked_sub(rhs)?
            };
        }
        Some(acc)
    }

    fn term(&mut self) -> Option<i64> {
        let mut acc = self.unary()?;
        while let Some(op @ ("*" | "/" | "%")) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = match op {
                "*" => acc.checked_mul(rhs)?,
                "/" => acc.checked_div(rhs)?,
                _ => acc.checked_rem(rhs)?,
            };
        }
        Some(acc)
    }

    fn unary(&mut self) -> Option<i64> {
        match self.peek()? {
            "-" => {
                self.pos += 1;
                self.unary()?.checked_neg()
            }
            "+" => {
                self.pos += 1;
                self.unary()
            }
            _ => self.primary(),
        }
    }

    fn primary(&mut self) -> Option<i64> {
        let (tok, s) = *self.toks.get(self.pos)?;
        self.pos += 1;
        match tok {
            Token::Number => s.parse().ok(),
            Token::LParen => {
                let v = self.expr()?;
                if self.toks.get(self.pos).map(|t| t.0) != Some(Token::RParen) {
                    return None;
                }
                self.pos += 1;
                Some(v)
            }
            _ => None,
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
