//! 商品目录的文本搜索：词频 + 截断 SVD，以及 word2vec 联想

mod catalog;
mod engine;
mod preprocess;
mod vectorizer;
mod word2vec;

pub use self::catalog::{Catalog, CatalogItem};
pub use self::engine::{
    Association, Closest, SVD_COMPONENTS, SVD_ITERATIONS, TextSearchEngine, resolve_text_query,
};
pub use self::preprocess::{STOP_WORDS, preprocess};
pub use self::vectorizer::{CountVectorizer, SparseRow, TruncatedSvd};
pub use self::word2vec::WordVectors;
