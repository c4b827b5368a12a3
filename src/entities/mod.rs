// Entity Models - documents and their line items
//
// A Document owns zero or more DocumentItems. Items are matched by their
// natural key (document_id, ordinal) and die with their document (cascade).

pub mod document;
pub mod item;

pub use document::Document;
pub use item::{DocumentItem, ItemKey};
