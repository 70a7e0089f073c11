pub mod vector_store;
pub mod web_search;

pub use vector_store::HttpRetrieval;
pub use web_search::TavilySearch;
