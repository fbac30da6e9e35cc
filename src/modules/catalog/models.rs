use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

/// A physical book in the catalog.
///
/// `available` is derived state: it must always equal "no borrowing on this
/// book is active". Only the lending ledger's transitions may flip it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: Uuid,
    pub title: String,
    pub author: String,
    pub genre: String,
    /// Unique business key.
    pub isbn: String,
    pub publication_date: Date,
    pub available: bool,
}

/// Request model for adding a book to the catalog.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBookRequest {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub isbn: String,
    pub publication_date: Date,
}

/// Request model for editing a book's descriptive fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateBookRequest {
    pub title: String,
    pub author: String,
    pub genre: String,
    pub isbn: String,
    pub publication_date: Date,
}

/// Filter + pagination parameters for catalog search.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchParams {
    pub title: Option<String>,
    pub author: Option<String>,
    pub isbn: Option<String>,
    pub genre: Option<String>,
    pub page: Option<usize>,
    pub per_page: Option<usize>,
}

/// One page of search results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
}
