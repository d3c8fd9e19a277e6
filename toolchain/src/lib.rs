// atlkit — companion toolchain for generated array routines
//
// Library root. `wrap` path: registry → bind → [inline] → harness.
// `vla` path: rewrite. Both share the C lexer.

pub mod bind;
pub mod decl;
pub mod diag;
pub mod files;
pub mod harness;
pub mod inline;
pub mod lexer;
pub mod loader;
pub mod parser;
pub mod pipeline;
pub mod registry;
pub mod rewrite;
