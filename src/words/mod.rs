//! Word extraction and counting
//!
//! - `normalize`: turns a raw comment body into lower-case word tokens
//! - `WordCount`: a concurrency-safe word frequency map that branches of a
//!   crawl fill independently and merge afterwards

mod count;
mod normalize;

pub use count::{top_words, WordCount};
pub use normalize::normalize;
