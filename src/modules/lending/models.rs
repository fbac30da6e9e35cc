use serde::{Deserialize, Serialize};
use time::Date;
use uuid::Uuid;

/// A loan of one book to one borrower.
///
/// Created only by a successful borrow transition; mutated exactly once, by
/// the matching return transition setting `return_date`. For a given book at
/// most one borrowing is active (`return_date == None`) at any time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrowing {
    pub id: Uuid,
    pub book_id: Uuid,
    pub borrower_id: Uuid,
    pub borrow_date: Date,
    pub due_date: Date,
    pub return_date: Option<Date>,
}

impl Borrowing {
    /// The book is still out on this borrowing.
    pub fn is_active(&self) -> bool {
        self.return_date.is_none()
    }

    /// Active and past due. A borrowing due today is not overdue, and a
    /// returned borrowing is never overdue.
    pub fn is_overdue(&self, today: Date) -> bool {
        self.is_active() && self.due_date < today
    }
}

/// Borrowing enriched with display fields for API responses.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BorrowingView {
    pub id: Uuid,
    pub borrower_name: String,
    pub book_title: String,
    pub borrow_date: Date,
    pub due_date: Date,
    pub return_date: Option<Date>,
}

/// Request body for borrowing a book.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BorrowRequest {
    pub borrower_id: Uuid,
    pub book_id: Uuid,
}

/// Transient availability-change notification pushed to live subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AvailabilityEvent {
    pub book_id: Uuid,
    pub title: String,
    pub available: bool,
}
