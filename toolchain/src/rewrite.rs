// rewrite.rs — Allocation rewriter
//
// Replaces heap allocations of the shape
//
//     <T> *<name> = calloc(<count>, sizeof(<T>));
//
// that are released by a later `free(<name>);` in the same scope with a
// stack array `<T> <name>[<count>];`, and deletes every release of it.
//
// Preconditions: source is C text that the lexer accepts in full.
// Postconditions: text outside rewritten sites is byte-identical; only
//                 paired sites are rewritten; each pair is rewritten once.
// Failure modes: lexer errors abort the file (`RewriteError`); unpaired
//                allocations, and allocations also released from inside a
//                larger statement, are reported, not rewritten.
// Side effects: none.
//
// No check is made that <count> is invariant over the array's lifetime or
// that <name> is not aliased past its scope.

use std::fmt;
use std::path::Path;

use crate::diag::{codes, line_of, DiagCode, Diagnostic};
use crate::lexer::{self, Span, Token};

// ── Results ─────────────────────────────────────────────────────────────────

/// One rewritten allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocationSite {
    pub name: String,
    pub elem_type: String,
    /// Size expression as emitted (after optional simplification).
    pub count_expr: String,
    /// 1-based line of the allocation.
    pub line: usize,
    pub decl_span: Span,
    /// Every deleted release, in source order.
    pub free_spans: Vec<Span>,
    /// `count_expr` went through `simplify_expr`.
    pub simplified: bool,
}

impl AllocationSite {
    /// A simplified size that still nests more than one parenthesis group
    /// is worth a second look by hand.
    pub fn is_complex_size(&self) -> bool {
        self.simplified && self.count_expr.matches('(').count() > 1
    }

    pub fn complex_size_diagnostic(&self, path: &Path) -> Option<Diagnostic> {
        if !self.is_complex_size() {
            return None;
        }
        Some(
            Diagnostic::warning(
                codes::W0302,
                format!(
                    "size of '{}' is still complex after simplification: {}",
                    self.name, self.count_expr
                ),
            )
            .with_location(path, Some(self.line)),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnpairedReason {
    /// No `free(<name>);` statement in scope.
    NoRelease,
    /// Some release sits inside another statement (`if (c) free(x);`) and
    /// cannot be deleted on its own.
    GuardedRelease,
}

/// An allocation left unchanged because no release pairs with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpairedAllocation {
    pub name: String,
    pub line: usize,
    pub reason: UnpairedReason,
}

impl UnpairedAllocation {
    pub fn to_diagnostic(&self, path: &Path) -> Diagnostic {
        let message = match self.reason {
            UnpairedReason::NoRelease => format!(
                "calloc of '{}' has no matching free in its scope; left unchanged",
                self.name
            ),
            UnpairedReason::GuardedRelease => format!(
                "calloc of '{}' is released inside another statement; left unchanged",
                self.name
            ),
        };
        Diagnostic::warning(codes::W0301, message).with_location(path, Some(self.line))
    }
}

#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub text: String,
    pub rewrite_count: usize,
    pub sites: Vec<AllocationSite>,
    pub unpaired: Vec<UnpairedAllocation>,
}

impl RewriteOutcome {
    pub fn is_unchanged(&self) -> bool {
        self.rewrite_count == 0
    }
}

/// The source could not be tokenized; nothing was rewritten.
#[derive(Debug, Clone, PartialEq)]
pub struct RewriteError {
    pub line: usize,
    pub message: String,
}

impl RewriteError {
    pub fn code(&self) -> DiagCode {
        codes::E0301
    }
}

impl fmt::Display for RewriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cannot tokenize line {}: {}", self.line, self.message)
    }
}

impl std::error::Error for RewriteError {}

// ── Entry points ────────────────────────────────────────────────────────────

/// Rewrite every paired allocation in `source`, keeping size expressions
/// verbatim.
pub fn rewrite(source: &str) -> Result<RewriteOutcome, RewriteError> {
    Rewriter::new().rewrite(source)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Rewriter {
    simplify: bool,
}

impl Rewriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simplify rewritten size expressions (see `simplify_expr`).
    pub fn simplify(mut self, on: bool) -> Self {
        self.simplify = on;
        self
    }

    pub fn rewrite(&self, source: &str) -> Result<RewriteOutcome, RewriteError> {
        let lexed = lexer::lex(source);
        if let Some(err) = lexed.errors.first() {
            return Err(RewriteError {
                line: line_of(source, err.span.start),
                message: err.message.clone(),
            });
        }

        let scanner = Scanner {
            source,
            tokens: &lexed.tokens,
        };
        let candidates = scanner.scan();

        let mut sites = Vec::new();
        let mut unpaired = Vec::new();
        let mut edits: Vec<(Span, String)> = Vec::new();
        for c in candidates {
            let line = line_of(source, c.decl.start);
            let reason = if c.guarded {
                Some(UnpairedReason::GuardedRelease)
            } else if c.frees.is_empty() {
                Some(UnpairedReason::NoRelease)
            } else {
                None
            };
            if let Some(reason) = reason {
                log::debug!("line {}: calloc of '{}' is unpaired ({:?})", line, c.name, reason);
                unpaired.push(UnpairedAllocation {
                    name: c.name,
                    line,
                    reason,
                });
                continue;
            }
            let raw = c.count.text(source);
            let count_expr = if self.simplify {
                simplify_expr(raw)
            } else {
                raw.to_string()
            };
            edits.push((
                c.decl,
                format!("{} {}[{}];", c.elem_type, c.name, count_expr),
            ));
            for free in &c.frees {
                edits.push((release_extent(source, *free), String::new()));
            }
            sites.push(AllocationSite {
                name: c.name,
                elem_type: c.elem_type,
                count_expr,
                line,
                decl_span: c.decl,
                free_spans: c.frees,
                simplified: self.simplify,
            });
        }

        edits.sort_by_key(|(span, _)| span.start);
        let mut text = String::with_capacity(source.len());
        let mut last = 0;
        for (span, replacement) in &edits {
            text.push_str(&source[last..span.start]);
            text.push_str(replacement);
            last = span.end;
        }
        text.push_str(&source[last..]);

        Ok(RewriteOutcome {
            text,
            rewrite_count: sites.len(),
            sites,
            unpaired,
        })
    }
}

/// Bytes to delete for a release statement: its whole line when the
/// statement stands alone on it, otherwise the statement and any blanks
/// after it on the same line.
fn release_extent(source: &str, stmt: Span) -> Span {
    let line_start = source[..stmt.start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = source[stmt.end..]
        .find('\n')
        .map_or(source.len(), |i| stmt.end + i + 1);

    let before = &source[line_start..stmt.start];
    let after = &source[stmt.end..line_end];
    if before.trim().is_empty() && after.trim().is_empty() {
        return Span {
            start: line_start,
            end: line_end,
        };
    }

    let trailing = after.len() - after.trim_start_matches([' ', '\t']).len();
    Span {
        start: stmt.start,
        end: stmt.end + trailing,
    }
}

// ── Scanner ─────────────────────────────────────────────────────────────────

struct Candidate {
    name: String,
    elem_type: String,
    count: Span,
    decl: Span,
    frees: Vec<Span>,
    /// Released somewhere a statement cannot be deleted on its own.
    guarded: bool,
}

#[derive(Default)]
struct Scope {
    /// Candidates opened in this scope, released or not.
    open: Vec<usize>,
    /// Names declared in this scope, allocations included.
    declared: Vec<String>,
}

struct Scanner<'a> {
    source: &'a str,
    tokens: &'a [(Token, Span)],
}

impl<'a> Scanner<'a> {
    fn scan(&self) -> Vec<Candidate> {
        let mut candidates: Vec<Candidate> = Vec::new();
        // Index 0 is file scope and is never popped.
        let mut scopes = vec![Scope::default()];

        let mut i = 0;
        while i < self.tokens.len() {
            match self.tokens[i].0 {
                Token::LBrace => {
                    scopes.push(Scope::default());
                    i += 1;
                    continue;
                }
                Token::RBrace => {
                    // Releases after this point can no longer pair.
                    if scopes.len() > 1 {
                        scopes.pop();
                    }
                    i += 1;
                    continue;
                }
                _ => {}
            }

            if self.at_statement_start(i) {
                if let Some((cand, next)) = self.match_alloc(i) {
                    if let Some(scope) = scopes.last_mut() {
                        scope.open.push(candidates.len());
                        scope.declared.push(cand.name.clone());
                    }
                    candidates.push(cand);
                    i = next;
                    continue;
                }
                if let Some((name, span, next)) = self.match_free(i) {
                    if let Some(c) = resolve(&scopes, &candidates, name) {
                        candidates[c].frees.push(span);
                    }
                    i = next;
                    continue;
                }
            }
            if let Some((name, next)) = self.match_free_call(i) {
                if let Some(c) = resolve(&scopes, &candidates, name) {
                    candidates[c].guarded = true;
                }
                i = next;
                continue;
            }
            if self.at_statement_start(i) || (i > 0 && self.is(i - 1, Token::LParen)) {
                if let Some(name) = self.match_local_decl(i) {
                    if let Some(scope) = scopes.last_mut() {
                        scope.declared.push(name.to_string());
                    }
                }
            }
            i += 1;
        }
        candidates
    }

    fn is(&self, i: usize, tok: Token) -> bool {
        self.tokens.get(i).is_some_and(|(t, _)| *t == tok)
    }

    fn ident(&self, i: usize) -> Option<&'a str> {
        match self.tokens.get(i) {
            Some((Token::Ident, span)) => Some(span.text(self.source)),
            _ => None,
        }
    }

    fn text(&self, i: usize) -> &'a str {
        self.tokens[i].1.text(self.source)
    }

    fn at_statement_start(&self, i: usize) -> bool {
        i == 0
            || matches!(
                self.tokens[i - 1].0,
                Token::Semi | Token::LBrace | Token::RBrace
            )
    }

    /// `<T> * <name> = calloc ( <count> , sizeof ( <T> ) ) ;`
    fn match_alloc(&self, i: usize) -> Option<(Candidate, usize)> {
        let (ty, ty_span) = *self.tokens.get(i)?;
        if !matches!(ty, Token::Int | Token::Float | Token::Ident) {
            return None;
        }
        let elem_type = ty_span.text(self.source);
        if !self.is(i + 1, Token::Star) {
            return None;
        }
        let name = self.ident(i + 2)?;
        if !self.is(i + 3, Token::Assign) || self.ident(i + 4)? != "calloc" {
            return None;
        }
        if !self.is(i + 5, Token::LParen) {
            return None;
        }

        // Count expression: everything up to the first top-level comma.
        let first = i + 6;
        let mut j = first;
        let mut depth = 0usize;
        loop {
            match self.tokens.get(j)?.0 {
                Token::LParen => depth += 1,
                Token::RParen if depth == 0 => return None,
                Token::RParen => depth -= 1,
                Token::Comma if depth == 0 => break,
                Token::Semi | Token::LBrace | Token::RBrace => return None,
                _ => {}
            }
            j += 1;
        }
        if j == first {
            return None;
        }
        let count = Span {
            start: self.tokens[first].1.start,
            end: self.tokens[j - 1].1.end,
        };

        if self.ident(j + 1)? != "sizeof" || !self.is(j + 2, Token::LParen) {
            return None;
        }
        if !self.is(j + 3, ty) || self.text(j + 3) != elem_type {
            return None;
        }
        let closed = self.is(j + 4, Token::RParen)
            && self.is(j + 5, Token::RParen)
            && self.is(j + 6, Token::Semi);
        if !closed {
            return None;
        }

        let decl = Span {
            start: ty_span.start,
            end: self.tokens[j + 6].1.end,
        };
        Some((
            Candidate {
                name: name.to_string(),
                elem_type: elem_type.to_string(),
                count,
                decl,
                frees: Vec::new(),
                guarded: false,
            },
            j + 7,
        ))
    }

    /// `free ( <name> ) ;`
    fn match_free(&self, i: usize) -> Option<(&'a str, Span, usize)> {
        let (name, next) = self.match_free_call(i)?;
        if !self.is(next, Token::Semi) {
            return None;
        }
        let span = Span {
            start: self.tokens[i].1.start,
            end: self.tokens[next].1.end,
        };
        Some((name, span, next + 1))
    }

    /// `free ( <name> )` anywhere; returns the index after `)`.
    fn match_free_call(&self, i: usize) -> Option<(&'a str, usize)> {
        if self.ident(i)? != "free" || !self.is(i + 1, Token::LParen) {
            return None;
        }
        if i > 0 && self.is(i - 1, Token::Punct) && matches!(self.text(i - 1), "." | ">") {
            // `pool.free(x)` / `pool->free(x)` is someone else's function.
            return None;
        }
        let name = self.ident(i + 2)?;
        self.is(i + 3, Token::RParen).then_some((name, i + 4))
    }

    /// Name introduced by a local declaration starting at `i`, if any.
    ///
    /// Recognizes `[const] <type> [const] *... <name>` followed by one of
    /// `= ; [ ,`. A user type name must be followed by `*` or a name, so
    /// assignments such as `x = 1;` do not match.
    fn match_local_decl(&self, mut i: usize) -> Option<&'a str> {
        if self.is(i, Token::Const) {
            i += 1;
        }
        let ty = self.tokens.get(i)?.0;
        match ty {
            Token::Int | Token::Float | Token::Void => {}
            Token::Ident => {
                let next = self.tokens.get(i + 1)?.0;
                if !matches!(next, Token::Star | Token::Ident | Token::Const) {
                    return None;
                }
            }
            _ => return None,
        }
        i += 1;
        while self.is(i, Token::Const) || self.is(i, Token::Star) {
            i += 1;
        }
        let name = self.ident(i)?;
        let follows = self.tokens.get(i + 1)?.0;
        matches!(
            follows,
            Token::Assign | Token::Semi | Token::LBracket | Token::Comma
        )
        .then_some(name)
    }
}

/// The allocation a release of `name` refers to, if any.
///
/// Scopes are searched from the innermost outwards; a scope that declares
/// `name` without an allocation of it hides every outer one.
fn resolve(scopes: &[Scope], candidates: &[Candidate], name: &str) -> Option<usize> {
    for scope in scopes.iter().rev() {
        let open = scope.open.iter().rev().find(|&&c| candidates[c].name == name);
        if let Some(&c) = open {
            return Some(c);
        }
        if scope.declared.iter().any(|d| d == name) {
            return None;
        }
    }
    None
}

// ── Size expression simplification ──────────────────────────────────────────

/// Drop `+ 0`, `- 0`, `+ (0)` and `- (0)` terms and redundant parentheses.
///
/// Text that does not lex is returned unchanged. Between two surviving
/// tokens the first non-empty original gap in that stretch is kept.
pub fn simplify_expr(expr: &str) -> String {
    let lexed = lexer::lex(expr);
    if !lexed.errors.is_empty() {
        return expr.to_string();
    }
    let toks = &lexed.tokens;
    let mut kept: Vec<usize> = (0..toks.len()).collect();

    loop {
        if let Some(range) = zero_term(expr, toks, &kept) {
            kept.drain(range);
            continue;
        }
        if let Some((open, close)) = redundant_parens(toks, &kept) {
            kept.remove(close);
            kept.remove(open);
            continue;
        }
        break;
    }

    let mut out = String::new();
    for (n, &k) in kept.iter().enumerate() {
        if n > 0 {
            let gap = (kept[n - 1]..k)
                .map(|t| &expr[toks[t].1.end..toks[t + 1].1.start])
                .find(|g| !g.is_empty())
                .unwrap_or("");
            out.push_str(gap);
        }
        out.push_str(toks[k].1.text(expr));
    }
    out
}

fn ends_operand(tok: Token) -> bool {
    matches!(
        tok,
        Token::Ident | Token::Number | Token::RParen | Token::RBracket
    )
}

/// Range in `kept` of a binary `+ 0`/`- 0` term (zero optionally in
/// parentheses) that can be dropped without changing precedence.
fn zero_term(
    expr: &str,
    toks: &[(Token, Span)],
    kept: &[usize],
) -> Option<std::ops::Range<usize>> {
    let tok = |w: usize| kept.get(w).map(|&k| toks[k].0);
    let text = |w: usize| kept.get(w).map(|&k| toks[k].1.text(expr));
    let is_additive = |w: usize| tok(w) == Some(Token::Punct) && matches!(text(w), Some("+" | "-"));

    for w in 1..kept.len() {
        if !is_additive(w) || !tok(w - 1).is_some_and(ends_operand) {
            continue;
        }
        let len = if tok(w + 1) == Some(Token::Number) && text(w + 1) == Some("0") {
            2
        } else if tok(w + 1) == Some(Token::LParen)
            && text(w + 2) == Some("0")
            && tok(w + 3) == Some(Token::RParen)
        {
            4
        } else {
            continue;
        };
        let after = w + len;
        let safe = match tok(after) {
            None | Some(Token::RParen) | Some(Token::Comma) => true,
            Some(_) => is_additive(after),
        };
        if safe {
            return Some(w..after);
        }
    }
    None
}

/// Positions in `kept` of a parenthesis pair that can be removed.
fn redundant_parens(toks: &[(Token, Span)], kept: &[usize]) -> Option<(usize, usize)> {
    let tok = |w: usize| kept.get(w).map(|&k| toks[k].0);

    for open in 0..kept.len() {
        if tok(open) != Some(Token::LParen) {
            continue;
        }
        let prev = open.checked_sub(1).and_then(tok);
        // `f(x)` and `sizeof(x)` keep their parentheses.
        if prev.is_some_and(ends_operand) {
            continue;
        }

        let mut depth = 0usize;
        let mut top_level_comma = false;
        let mut close = None;
        for w in open + 1..kept.len() {
            match tok(w) {
                Some(Token::LParen) => depth += 1,
                Some(Token::RParen) if depth == 0 => {
                    close = Some(w);
                    break;
                }
                Some(Token::RParen) => depth -= 1,
                Some(Token::Comma) if depth == 0 => top_level_comma = true,
                _ => {}
            }
        }
        let Some(close) = close else {
            continue;
        };

        // `(size_t)n` is a cast, not a parenthesized operand.
        let starts_operand = matches!(
            tok(close + 1),
            Some(Token::Ident | Token::Number | Token::LParen)
        );
        let lone_operand = close == open + 2
            && matches!(tok(open + 1), Some(Token::Ident | Token::Number))
            && !starts_operand;
        let isolated = matches!(prev, None | Some(Token::LParen) | Some(Token::Comma))
            && matches!(tok(close + 1), None | Some(Token::RParen) | Some(Token::Comma))
            && !top_level_comma
            && close > open + 1;
        if lone_operand || isolated {
            return Some((open, close));
        }
    }
    None
}

// ── Tests ───────────────────────────────────────────────────────────────────
