//! Worker agents (C6): Parser, Review, TestGen, CommentFormatter.
//!
//! Each worker is a plain async function over typed input/output, not a
//! long-lived actor — the supervisor instantiates one call per stage per
//! review. Dispatch from stage to worker is the compile-time match in
//! `review-supervisor`, not a shared trait object.

pub mod formatter;
pub mod parser;
pub mod reviewer;
pub mod testgen;

pub use formatter::format_review;
pub use parser::parse_files;
pub use reviewer::review;
pub use testgen::generate_tests;
