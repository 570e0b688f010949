//! Retrieval-augmented answering pipeline.
//!
//! - `DocumentRetriever`: hybrid vector + lexical retrieval over a `DocumentIndex`
//! - `AnswerComposer`: grounded generation with cleanup and structured fallback
//! - `ResponseParser`: the text-matching rules for cleaning and follow-up extraction
//! - `QueryCache`: bounded per-(user, question) answer memoization

mod cache;
mod composer;
mod parse;
mod retriever;
mod sqlite;
mod store;
mod types;

pub use cache::QueryCache;
pub use composer::AnswerComposer;
pub use parse::ResponseParser;
pub use retriever::DocumentRetriever;
pub use sqlite::SqliteDocumentIndex;
pub use store::{DocumentIndex, IndexMatch, IndexedDocument};
pub use types::{ComposedAnswer, GeneratedVia, RetrievalOrigin, RetrievedDocument};
