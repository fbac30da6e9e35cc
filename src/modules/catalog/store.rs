//! In-process catalog store.
//!
//! Single source of truth for books, borrowers, and borrowings. All state
//! lives behind one `RwLock`; every write method is one critical section, so
//! other threads observe each mutation fully or not at all. The lending
//! transitions (`borrow_transition`, `return_transition`) combine their
//! check and writes inside a single exclusive section, which is what makes
//! concurrent double-checkout impossible.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use thiserror::Error;
use time::Date;
use uuid::Uuid;

use crate::modules::borrowers::Borrower;
use crate::modules::lending::models::Borrowing;
use crate::utils;

use super::models::{Book, CreateBookRequest, Page, UpdateBookRequest};

/// Catalog-management failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("Book not found.")]
    BookNotFound,
    #[error("Book already exists.")]
    IsbnExists,
    #[error("Book has an active borrowing.")]
    BookOnLoan,
}

/// Borrower-management failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BorrowerError {
    #[error("Borrower not found.")]
    BorrowerNotFound,
    #[error("Email already exists.")]
    EmailExists,
}

/// Failures of the two atomic lending transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("Book not found.")]
    BookNotFound,
    #[error("Borrower not found.")]
    BorrowerNotFound,
    #[error("Book is currently unavailable.")]
    BookUnavailable,
    #[error("Borrowing not found.")]
    BorrowingNotFound,
    #[error("Borrowing was already returned.")]
    AlreadyReturned,
}

#[derive(Default)]
struct StoreInner {
    books: BTreeMap<Uuid, Book>,
    borrowers: BTreeMap<Uuid, Borrower>,
    borrowings: BTreeMap<Uuid, Borrowing>,
}

/// Shared catalog state. Cheap to clone behind an `Arc`.
#[derive(Default)]
pub struct CatalogStore {
    inner: RwLock<StoreInner>,
}

impl CatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    // ---- books -----------------------------------------------------------

    /// Add a book. New books start available.
    pub fn insert_book(&self, request: CreateBookRequest) -> Result<Book, CatalogError> {
        let mut inner = self.write();
        if inner.books.values().any(|b| b.isbn == request.isbn) {
            return Err(CatalogError::IsbnExists);
        }

        let book = Book {
            id: utils::new_id(),
            title: request.title,
            author: request.author,
            genre: request.genre,
            isbn: request.isbn,
            publication_date: request.publication_date,
            available: true,
        };
        inner.books.insert(book.id, book.clone());
        Ok(book)
    }

    /// Edit a book's descriptive fields. Availability is untouched.
    pub fn update_book(&self, id: Uuid, request: UpdateBookRequest) -> Result<Book, CatalogError> {
        let mut inner = self.write();
        if inner
            .books
            .values()
            .any(|b| b.isbn == request.isbn && b.id != id)
        {
            return Err(CatalogError::IsbnExists);
        }

        let book = inner
            .books
            .get_mut(&id)
            .ok_or(CatalogError::BookNotFound)?;
        book.title = request.title;
        book.author = request.author;
        book.genre = request.genre;
        book.isbn = request.isbn;
        book.publication_date = request.publication_date;
        Ok(book.clone())
    }

    /// Remove a book. Refused while an active borrowing references it.
    pub fn delete_book(&self, id: Uuid) -> Result<(), CatalogError> {
        let mut inner = self.write();
        if !inner.books.contains_key(&id) {
            return Err(CatalogError::BookNotFound);
        }
        if inner
            .borrowings
            .values()
            .any(|b| b.book_id == id && b.is_active())
        {
            return Err(CatalogError::BookOnLoan);
        }
        inner.books.remove(&id);
        Ok(())
    }

    pub fn get_book(&self, id: Uuid) -> Option<Book> {
        self.read().books.get(&id).cloned()
    }

    pub fn list_books(&self) -> Vec<Book> {
        self.read().books.values().cloned().collect()
    }

    pub fn exists_by_isbn(&self, isbn: &str) -> bool {
        self.read().books.values().any(|b| b.isbn == isbn)
    }

    /// Compare-and-swap on a book's availability flag.
    ///
    /// Returns true only if the book exists and its flag matched `expected`,
    /// in which case it now holds `new`.
    pub fn conditional_set_availability(&self, id: Uuid, expected: bool, new: bool) -> bool {
        let mut inner = self.write();
        match inner.books.get_mut(&id) {
            Some(book) if book.available == expected => {
                book.available = new;
                true
            }
            _ => false,
        }
    }

    /// Filtered, paginated catalog search.
    ///
    /// Filters are already normalized (trimmed, lowercased) by the caller.
    /// Title/author/genre match on substring; ISBN matches exactly.
    pub fn search_books(
        &self,
        title: Option<&str>,
        author: Option<&str>,
        isbn: Option<&str>,
        genre: Option<&str>,
        page: usize,
        per_page: usize,
    ) -> Page<Book> {
        let inner = self.read();
        let matches: Vec<&Book> = inner
            .books
            .values()
            .filter(|b| {
                title.map_or(true, |t| b.title.to_lowercase().contains(t))
                    && author.map_or(true, |a| b.author.to_lowercase().contains(a))
                    && genre.map_or(true, |g| b.genre.to_lowercase().contains(g))
                    && isbn.map_or(true, |i| b.isbn.to_lowercase() == i)
            })
            .collect();

        let total = matches.len();
        let items = matches
            .into_iter()
            .skip(page.saturating_mul(per_page))
            .take(per_page)
            .cloned()
            .collect();

        Page {
            items,
            page,
            per_page,
            total,
        }
    }

    // ---- borrowers -------------------------------------------------------

    pub fn insert_borrower(&self, name: String, email: String) -> Result<Borrower, BorrowerError> {
        let mut inner = self.write();
        if inner.borrowers.values().any(|b| b.email == email) {
            return Err(BorrowerError::EmailExists);
        }

        let borrower = Borrower {
            id: utils::new_id(),
            name,
            email,
        };
        inner.borrowers.insert(borrower.id, borrower.clone());
        Ok(borrower)
    }

    pub fn get_borrower(&self, id: Uuid) -> Option<Borrower> {
        self.read().borrowers.get(&id).cloned()
    }

    pub fn list_borrowers(&self) -> Vec<Borrower> {
        self.read().borrowers.values().cloned().collect()
    }

    // ---- borrowings ------------------------------------------------------

    pub fn get_borrowing(&self, id: Uuid) -> Option<Borrowing> {
        self.read().borrowings.get(&id).cloned()
    }

    pub fn list_borrowings(&self) -> Vec<Borrowing> {
        self.read().borrowings.values().cloned().collect()
    }

    pub fn borrowings_by_borrower(&self, borrower_id: Uuid) -> Vec<Borrowing> {
        self.read()
            .borrowings
            .values()
            .filter(|b| b.borrower_id == borrower_id)
            .cloned()
            .collect()
    }

    pub fn borrowings_by_book(&self, book_id: Uuid) -> Vec<Borrowing> {
        self.read()
            .borrowings
            .values()
            .filter(|b| b.book_id == book_id)
            .cloned()
            .collect()
    }

    /// The single borrowing with `return_date == None` for this book, if any.
    pub fn active_borrowing_for_book(&self, book_id: Uuid) -> Option<Borrowing> {
        self.read()
            .borrowings
            .values()
            .find(|b| b.book_id == book_id && b.is_active())
            .cloned()
    }

    /// Borrowings still out past their due date, as of `today`.
    pub fn overdue_borrowings(&self, today: Date) -> Vec<Borrowing> {
        self.read()
            .borrowings
            .values()
            .filter(|b| b.is_overdue(today))
            .cloned()
            .collect()
    }

    // ---- lending transitions ---------------------------------------------

    /// Atomically check out a book: verify both parties exist, flip the
    /// availability flag from true to false, and insert the new borrowing.
    /// No writes happen on any failure path.
    pub fn borrow_transition(
        &self,
        book_id: Uuid,
        borrower_id: Uuid,
        borrow_date: Date,
        due_date: Date,
    ) -> Result<Borrowing, TransitionError> {
        let mut inner = self.write();

        if !inner.borrowers.contains_key(&borrower_id) {
            return Err(TransitionError::BorrowerNotFound);
        }
        let book = inner
            .books
            .get_mut(&book_id)
            .ok_or(TransitionError::BookNotFound)?;
        if !book.available {
            return Err(TransitionError::BookUnavailable);
        }

        book.available = false;
        let borrowing = Borrowing {
            id: utils::new_id(),
            book_id,
            borrower_id,
            borrow_date,
            due_date,
            return_date: None,
        };
        inner.borrowings.insert(borrowing.id, borrowing.clone());
        Ok(borrowing)
    }

    /// Atomically return a borrowed book: set the borrowing's return date
    /// and flip the book back to available. Returning an already-returned
    /// borrowing is rejected instead of overwriting its return date.
    pub fn return_transition(
        &self,
        borrowing_id: Uuid,
        return_date: Date,
    ) -> Result<Borrowing, TransitionError> {
        let mut inner = self.write();

        let borrowing = inner
            .borrowings
            .get(&borrowing_id)
            .ok_or(TransitionError::BorrowingNotFound)?;
        if !borrowing.is_active() {
            return Err(TransitionError::AlreadyReturned);
        }
        let book_id = borrowing.book_id;

        if let Some(book) = inner.books.get_mut(&book_id) {
            book.available = true;
        }
        let borrowing = inner
            .borrowings
            .get_mut(&borrowing_id)
            .ok_or(TransitionError::BorrowingNotFound)?;
        borrowing.return_date = Some(return_date);
        Ok(borrowing.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn request(isbn: &str) -> CreateBookRequest {
        CreateBookRequest {
            title: "The Trial".to_string(),
            author: "Franz Kafka".to_string(),
            genre: "Fiction".to_string(),
            isbn: isbn.to_string(),
            publication_date: date!(1925 - 04 - 26),
        }
    }

    fn seeded() -> (CatalogStore, Book, Borrower) {
        let store = CatalogStore::new();
        let book = store.insert_book(request("978-0805209990")).unwrap();
        let borrower = store
            .insert_borrower("Josef K".to_string(), "josef@example.com".to_string())
            .unwrap();
        (store, book, borrower)
    }

    #[test]
    fn new_books_start_available() {
        let (store, book, _) = seeded();
        assert!(store.get_book(book.id).unwrap().available);
    }

    #[test]
    fn duplicate_isbn_is_rejected() {
        let (store, _, _) = seeded();
        assert_eq!(
            store.insert_book(request("978-0805209990")),
            Err(CatalogError::IsbnExists)
        );
        assert!(store.exists_by_isbn("978-0805209990"));
    }

    #[test]
    fn update_keeps_isbn_unique_but_allows_own() {
        let (store, book, _) = seeded();
        let other = store.insert_book(request("978-0140449136")).unwrap();

        let update = UpdateBookRequest {
            title: "The Trial".to_string(),
            author: "Franz Kafka".to_string(),
            genre: "Fiction".to_string(),
            isbn: "978-0805209990".to_string(),
            publication_date: date!(1925 - 04 - 26),
        };
        // Same ISBN on the same book is fine.
        assert!(store.update_book(book.id, update.clone()).is_ok());
        // Same ISBN on a different book is a conflict.
        assert_eq!(
            store.update_book(other.id, update),
            Err(CatalogError::IsbnExists)
        );
    }

    #[test]
    fn duplicate_email_is_rejected() {
        let (store, _, _) = seeded();
        assert_eq!(
            store.insert_borrower("Another".to_string(), "josef@example.com".to_string()),
            Err(BorrowerError::EmailExists)
        );
    }

    #[test]
    fn cas_flips_only_on_expected_value() {
        let (store, book, _) = seeded();

        assert!(!store.conditional_set_availability(book.id, false, true));
        assert!(store.conditional_set_availability(book.id, true, false));
        assert!(!store.get_book(book.id).unwrap().available);
        // Second writer loses the race.
        assert!(!store.conditional_set_availability(book.id, true, false));
    }

    #[test]
    fn borrow_transition_flips_and_records() {
        let (store, book, borrower) = seeded();
        let borrowing = store
            .borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 01),
                date!(2026 - 08 - 08),
            )
            .unwrap();

        assert!(!store.get_book(book.id).unwrap().available);
        assert!(borrowing.is_active());
        assert_eq!(
            store.active_borrowing_for_book(book.id).unwrap().id,
            borrowing.id
        );
    }

    #[test]
    fn borrow_transition_rejects_unavailable_book() {
        let (store, book, borrower) = seeded();
        store
            .borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 01),
                date!(2026 - 08 - 08),
            )
            .unwrap();

        assert_eq!(
            store.borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 02),
                date!(2026 - 08 - 09),
            ),
            Err(TransitionError::BookUnavailable)
        );
        // Exactly one borrowing exists.
        assert_eq!(store.borrowings_by_book(book.id).len(), 1);
    }

    #[test]
    fn borrow_transition_requires_both_parties() {
        let (store, book, borrower) = seeded();
        let missing = utils::new_id();

        assert_eq!(
            store.borrow_transition(missing, borrower.id, date!(2026 - 08 - 01), date!(2026 - 08 - 08)),
            Err(TransitionError::BookNotFound)
        );
        assert_eq!(
            store.borrow_transition(book.id, missing, date!(2026 - 08 - 01), date!(2026 - 08 - 08)),
            Err(TransitionError::BorrowerNotFound)
        );
        // Failure paths write nothing.
        assert!(store.get_book(book.id).unwrap().available);
        assert!(store.list_borrowings().is_empty());
    }

    #[test]
    fn return_transition_round_trip() {
        let (store, book, borrower) = seeded();
        let borrowing = store
            .borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 01),
                date!(2026 - 08 - 08),
            )
            .unwrap();

        let returned = store
            .return_transition(borrowing.id, date!(2026 - 08 - 05))
            .unwrap();

        assert!(store.get_book(book.id).unwrap().available);
        assert_eq!(returned.return_date, Some(date!(2026 - 08 - 05)));
        assert!(returned.return_date.unwrap() >= returned.borrow_date);
    }

    #[test]
    fn double_return_is_rejected() {
        let (store, book, borrower) = seeded();
        let borrowing = store
            .borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 01),
                date!(2026 - 08 - 08),
            )
            .unwrap();
        store
            .return_transition(borrowing.id, date!(2026 - 08 - 05))
            .unwrap();

        assert_eq!(
            store.return_transition(borrowing.id, date!(2026 - 08 - 06)),
            Err(TransitionError::AlreadyReturned)
        );
        // First return date survives.
        assert_eq!(
            store.get_borrowing(borrowing.id).unwrap().return_date,
            Some(date!(2026 - 08 - 05))
        );
    }

    #[test]
    fn delete_refused_while_borrowing_is_active() {
        let (store, book, borrower) = seeded();
        let borrowing = store
            .borrow_transition(
                book.id,
                borrower.id,
                date!(2026 - 08 - 01),
                date!(2026 - 08 - 08),
            )
            .unwrap();

        assert_eq!(store.delete_book(book.id), Err(CatalogError::BookOnLoan));

        store
            .return_transition(borrowing.id, date!(2026 - 08 - 05))
            .unwrap();
        assert!(store.delete_book(book.id).is_ok());
    }

    #[test]
    fn overdue_query_honors_boundary_and_returns() {
        let (store, book, borrower) = seeded();
        let other = store.insert_book(request("978-0140449136")).unwrap();
        let third = store.insert_book(request("978-0679722762")).unwrap();
        let today = date!(2026 - 08 - 29);

        // Due yesterday, still out: overdue.
        let late = store
            .borrow_transition(book.id, borrower.id, date!(2026 - 08 - 21), date!(2026 - 08 - 28))
            .unwrap();
        // Due today, still out: not overdue.
        store
            .borrow_transition(other.id, borrower.id, date!(2026 - 08 - 22), today)
            .unwrap();
        // Due yesterday but returned: not overdue.
        let returned = store
            .borrow_transition(third.id, borrower.id, date!(2026 - 08 - 21), date!(2026 - 08 - 28))
            .unwrap();
        store
            .return_transition(returned.id, date!(2026 - 08 - 28))
            .unwrap();

        let overdue = store.overdue_borrowings(today);
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].id, late.id);
    }

    #[test]
    fn search_filters_and_paginates() {
        let store = CatalogStore::new();
        for n in 0..5 {
            let mut req = request(&format!("isbn-{n}"));
            req.title = format!("Rust in Practice vol {n}");
            store.insert_book(req).unwrap();
        }
        let mut other = request("isbn-other");
        other.title = "Gardening".to_string();
        store.insert_book(other).unwrap();

        let page = store.search_books(Some("rust"), None, None, None, 0, 3);
        assert_eq!(page.total, 5);
        assert_eq!(page.items.len(), 3);

        let rest = store.search_books(Some("rust"), None, None, None, 1, 3);
        assert_eq!(rest.items.len(), 2);

        let exact = store.search_books(None, None, Some("isbn-other"), None, 0, 10);
        assert_eq!(exact.total, 1);
        assert_eq!(exact.items[0].title, "Gardening");
    }
}
