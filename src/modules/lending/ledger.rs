//! The lending ledger: owner of the borrow/return state machine.
//!
//! Concurrency design: each book has its own mutex (lazily created in an
//! index map). An operation locks the book, runs the store's atomic
//! transition, then performs the post-commit side effects (cache eviction,
//! availability broadcast, audit record) before releasing the lock. The
//! store transition alone already rules out double-checkout; holding the
//! book lock across the side effects additionally makes event emission
//! order equal commit order per book. Operations on different books do not
//! contend.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use biblio_events::{Multicast, Subscription};
use biblio_http::error::AppError;
use thiserror::Error;
use time::Duration;
use uuid::Uuid;

use crate::modules::catalog::cache::SearchCache;
use crate::modules::catalog::store::{CatalogStore, TransitionError};
use crate::utils;

use super::audit::AuditLog;
use super::models::{AvailabilityEvent, Borrowing, BorrowingView};

/// Caller-actionable lending failures.
#[derive(Debug, Error)]
pub enum LendingError {
    #[error("Book not found.")]
    BookNotFound,
    #[error("Borrower not found.")]
    BorrowerNotFound,
    #[error("Borrowing not found.")]
    BorrowingNotFound,
    #[error("Book is currently unavailable.")]
    BookUnavailable,
    #[error("Borrowing was already returned.")]
    AlreadyReturned,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<TransitionError> for LendingError {
    fn from(err: TransitionError) -> Self {
        match err {
            TransitionError::BookNotFound => Self::BookNotFound,
            TransitionError::BorrowerNotFound => Self::BorrowerNotFound,
            TransitionError::BookUnavailable => Self::BookUnavailable,
            TransitionError::BorrowingNotFound => Self::BorrowingNotFound,
            TransitionError::AlreadyReturned => Self::AlreadyReturned,
        }
    }
}

impl From<LendingError> for AppError {
    fn from(err: LendingError) -> Self {
        match err {
            LendingError::BookNotFound
            | LendingError::BorrowerNotFound
            | LendingError::BorrowingNotFound => AppError::not_found(err.to_string()),
            LendingError::BookUnavailable | LendingError::AlreadyReturned => {
                AppError::conflict(err.to_string())
            }
            LendingError::Internal(e) => AppError::Internal(e),
        }
    }
}

/// Lazily-populated `book id -> mutex` index. Entries are tiny and never
/// reclaimed; the set of books is small relative to the lock table.
#[derive(Default)]
struct BookLocks {
    inner: Mutex<HashMap<Uuid, Arc<Mutex<()>>>>,
}

impl BookLocks {
    fn for_book(&self, book_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(locks.entry(book_id).or_default())
    }
}

/// Owner of the single-active-borrowing invariant.
pub struct LendingLedger {
    store: Arc<CatalogStore>,
    cache: Arc<SearchCache>,
    availability: Arc<Multicast<AvailabilityEvent>>,
    audit: Arc<AuditLog>,
    loan_period_days: u16,
    book_locks: BookLocks,
}

impl LendingLedger {
    pub fn new(
        store: Arc<CatalogStore>,
        cache: Arc<SearchCache>,
        availability: Arc<Multicast<AvailabilityEvent>>,
        audit: Arc<AuditLog>,
        loan_period_days: u16,
    ) -> Self {
        Self {
            store,
            cache,
            availability,
            audit,
            loan_period_days,
            book_locks: BookLocks::default(),
        }
    }

    /// Check a book out to a borrower.
    ///
    /// Under concurrent calls for the same book, exactly one succeeds; the
    /// rest fail with [`LendingError::BookUnavailable`] and write nothing.
    pub fn borrow(
        &self,
        actor: &str,
        borrower_id: Uuid,
        book_id: Uuid,
    ) -> Result<BorrowingView, LendingError> {
        let lock = self.book_locks.for_book(book_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let borrow_date = utils::today();
        let due_date = borrow_date + Duration::days(i64::from(self.loan_period_days));
        let borrowing = self
            .store
            .borrow_transition(book_id, borrower_id, borrow_date, due_date)?;

        tracing::info!(
            book_id = %book_id,
            borrower_id = %borrower_id,
            borrowing_id = %borrowing.id,
            due_date = %due_date,
            "book borrowed"
        );
        self.after_commit(actor, "BORROW_BOOK", &borrowing, false);
        Ok(self.view(&borrowing))
    }

    /// Return a borrowed book.
    ///
    /// Returning an already-returned borrowing is a conflict; the original
    /// return date is never overwritten.
    pub fn return_book(
        &self,
        actor: &str,
        borrowing_id: Uuid,
    ) -> Result<BorrowingView, LendingError> {
        let current = self
            .store
            .get_borrowing(borrowing_id)
            .ok_or(LendingError::BorrowingNotFound)?;

        let lock = self.book_locks.for_book(current.book_id);
        let _guard = lock.lock().unwrap_or_else(PoisonError::into_inner);

        let borrowing = self
            .store
            .return_transition(borrowing_id, utils::today())?;

        tracing::info!(
            book_id = %borrowing.book_id,
            borrowing_id = %borrowing.id,
            "book returned"
        );
        self.after_commit(actor, "RETURN_BOOK", &borrowing, true);
        Ok(self.view(&borrowing))
    }

    /// All borrow records, ever.
    pub fn list_all(&self) -> Vec<BorrowingView> {
        self.store
            .list_borrowings()
            .iter()
            .map(|b| self.view(b))
            .collect()
    }

    /// Borrow records of one borrower.
    pub fn list_by_borrower(&self, borrower_id: Uuid) -> Result<Vec<BorrowingView>, LendingError> {
        if self.store.get_borrower(borrower_id).is_none() {
            return Err(LendingError::BorrowerNotFound);
        }
        Ok(self
            .store
            .borrowings_by_borrower(borrower_id)
            .iter()
            .map(|b| self.view(b))
            .collect())
    }

    /// Borrowings still out past their due date, evaluated against the
    /// wall-clock date at call time.
    pub fn list_overdue(&self) -> Vec<BorrowingView> {
        self.store
            .overdue_borrowings(utils::today())
            .iter()
            .map(|b| self.view(b))
            .collect()
    }

    /// Live availability feed. Subscribers see only events emitted after
    /// they subscribe.
    pub fn subscribe(&self) -> Subscription<AvailabilityEvent> {
        self.availability.subscribe()
    }

    /// Post-commit side effects, in order: evict the search cache, publish
    /// the availability change, record the audit entry. None of these can
    /// fail the committed transition.
    fn after_commit(&self, actor: &str, action: &str, borrowing: &Borrowing, available: bool) {
        self.cache.invalidate_all();

        let title = self
            .store
            .get_book(borrowing.book_id)
            .map(|b| b.title)
            .unwrap_or_else(|| "(removed)".to_string());
        self.availability.publish(AvailabilityEvent {
            book_id: borrowing.book_id,
            title: title.clone(),
            available,
        });

        self.audit.record(
            actor,
            action,
            format!("Book ID: {}, Title: {}", borrowing.book_id, title),
        );
    }

    /// Resolve display fields. Books may be deleted once their borrowings
    /// are returned, so the title falls back rather than failing the query.
    fn view(&self, borrowing: &Borrowing) -> BorrowingView {
        let borrower_name = self
            .store
            .get_borrower(borrowing.borrower_id)
            .map(|b| b.name)
            .unwrap_or_else(|| "(removed)".to_string());
        let book_title = self
            .store
            .get_book(borrowing.book_id)
            .map(|b| b.title)
            .unwrap_or_else(|| "(removed)".to_string());

        BorrowingView {
            id: borrowing.id,
            borrower_name,
            book_title,
            borrow_date: borrowing.borrow_date,
            due_date: borrowing.due_date,
            return_date: borrowing.return_date,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::catalog::models::CreateBookRequest;
    use time::macros::date;

    struct Fixture {
        ledger: LendingLedger,
        store: Arc<CatalogStore>,
        cache: Arc<SearchCache>,
        audit: Arc<AuditLog>,
        book_id: Uuid,
        borrower_id: Uuid,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(CatalogStore::new());
        let cache = Arc::new(SearchCache::new());
        let availability = Arc::new(Multicast::new());
        let audit = Arc::new(AuditLog::new());

        let book = store
            .insert_book(CreateBookRequest {
                title: "Anna Karenina".to_string(),
                author: "Leo Tolstoy".to_string(),
                genre: "Fiction".to_string(),
                isbn: "978-0143035008".to_string(),
                publication_date: date!(1878 - 01 - 01),
            })
            .unwrap();
        let borrower = store
            .insert_borrower("Kitty".to_string(), "kitty@example.com".to_string())
            .unwrap();

        Fixture {
            ledger: LendingLedger::new(
                Arc::clone(&store),
                Arc::clone(&cache),
                availability,
                Arc::clone(&audit),
                7,
            ),
            store,
            cache,
            audit,
            book_id: book.id,
            borrower_id: borrower.id,
        }
    }

    #[test]
    fn borrow_then_return_round_trip() {
        let f = fixture();
        let today = utils::today();

        let view = f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        assert_eq!(view.borrow_date, today);
        assert_eq!(view.due_date, today + Duration::days(7));
        assert_eq!(view.return_date, None);
        assert_eq!(view.borrower_name, "Kitty");
        assert_eq!(view.book_title, "Anna Karenina");
        assert!(!f.store.get_book(f.book_id).unwrap().available);

        let returned = f.ledger.return_book("kitty", view.id).unwrap();
        assert_eq!(returned.return_date, Some(today));
        assert!(returned.return_date.unwrap() >= returned.borrow_date);
        assert!(f.store.get_book(f.book_id).unwrap().available);
    }

    #[test]
    fn second_borrow_conflicts() {
        let f = fixture();
        f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();

        let err = f
            .ledger
            .borrow("levin", f.borrower_id, f.book_id)
            .unwrap_err();
        assert!(matches!(err, LendingError::BookUnavailable));
    }

    #[test]
    fn unknown_ids_are_not_found() {
        let f = fixture();
        let missing = utils::new_id();

        assert!(matches!(
            f.ledger.borrow("a", f.borrower_id, missing),
            Err(LendingError::BookNotFound)
        ));
        assert!(matches!(
            f.ledger.borrow("a", missing, f.book_id),
            Err(LendingError::BorrowerNotFound)
        ));
        assert!(matches!(
            f.ledger.return_book("a", missing),
            Err(LendingError::BorrowingNotFound)
        ));
        assert!(matches!(
            f.ledger.list_by_borrower(missing),
            Err(LendingError::BorrowerNotFound)
        ));
    }

    #[test]
    fn double_return_is_a_conflict() {
        let f = fixture();
        let view = f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        f.ledger.return_book("kitty", view.id).unwrap();

        let err = f.ledger.return_book("kitty", view.id).unwrap_err();
        assert!(matches!(err, LendingError::AlreadyReturned));
    }

    #[test]
    fn concurrent_borrows_yield_exactly_one_success() {
        let f = fixture();
        let successes = std::sync::atomic::AtomicUsize::new(0);
        let conflicts = std::sync::atomic::AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| match f.ledger.borrow("race", f.borrower_id, f.book_id) {
                    Ok(_) => {
                        successes.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    Err(LendingError::BookUnavailable) => {
                        conflicts.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {other}"),
                });
            }
        });

        assert_eq!(successes.load(std::sync::atomic::Ordering::SeqCst), 1);
        assert_eq!(conflicts.load(std::sync::atomic::Ordering::SeqCst), 7);
        // Exactly one active borrowing exists afterward.
        assert_eq!(f.store.borrowings_by_book(f.book_id).len(), 1);
        assert!(f.store.active_borrowing_for_book(f.book_id).is_some());
    }

    #[tokio::test]
    async fn subscribers_see_transitions_in_commit_order() {
        let f = fixture();
        let mut early = f.ledger.subscribe();

        let view = f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        f.ledger.return_book("kitty", view.id).unwrap();
        f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();

        let mut late = f.ledger.subscribe();

        let first = early.recv().await.unwrap();
        assert_eq!(first.book_id, f.book_id);
        assert!(!first.available);
        assert_eq!(first.title, "Anna Karenina");
        assert!(early.recv().await.unwrap().available);
        assert!(!early.recv().await.unwrap().available);
        // Exactly three transitions, exactly three events.
        assert!(early.try_recv().is_none());

        // No replay for late subscribers.
        assert!(late.try_recv().is_none());
    }

    #[test]
    fn overdue_listing_uses_wall_clock() {
        let f = fixture();
        let today = utils::today();

        // Freshly borrowed: due in a week, not overdue.
        f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        assert!(f.ledger.list_overdue().is_empty());

        // A borrowing seeded directly with a past due date is overdue.
        let other = f
            .store
            .insert_book(CreateBookRequest {
                title: "War and Peace".to_string(),
                author: "Leo Tolstoy".to_string(),
                genre: "Fiction".to_string(),
                isbn: "978-1400079988".to_string(),
                publication_date: date!(1869 - 01 - 01),
            })
            .unwrap();
        f.store
            .borrow_transition(
                other.id,
                f.borrower_id,
                today - Duration::days(10),
                today - Duration::days(3),
            )
            .unwrap();

        let overdue = f.ledger.list_overdue();
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].book_title, "War and Peace");
    }

    #[test]
    fn borrow_and_return_evict_the_search_cache() {
        use crate::modules::catalog::cache::SearchKey;
        use crate::modules::catalog::models::{Page, SearchParams};

        let f = fixture();

        // Seed a cached page the way the search path would.
        let key = SearchKey::from_params(&SearchParams {
            title: Some("anna".to_string()),
            ..SearchParams::default()
        });
        let generation = f.cache.generation();
        f.cache.put_at(
            key.clone(),
            Page {
                items: vec![f.store.get_book(f.book_id).unwrap()],
                page: 0,
                per_page: 20,
                total: 1,
            },
            generation,
        );
        assert!(f.cache.get(&key).is_some());

        let view = f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        assert!(f.cache.generation() > generation);
        assert!(f.cache.get(&key).is_none());

        let after_borrow = f.cache.generation();
        f.ledger.return_book("kitty", view.id).unwrap();
        assert!(f.cache.generation() > after_borrow);
    }

    #[test]
    fn every_transition_is_audited() {
        let f = fixture();
        assert!(f.audit.is_empty());

        let view = f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        f.ledger.return_book("stiva", view.id).unwrap();

        let entries = f.audit.recent();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "BORROW_BOOK");
        assert_eq!(entries[0].actor, "kitty");
        assert_eq!(entries[1].action, "RETURN_BOOK");
        assert_eq!(entries[1].actor, "stiva");
    }

    #[test]
    fn failed_borrow_leaves_no_side_effects() {
        let f = fixture();
        f.ledger.borrow("kitty", f.borrower_id, f.book_id).unwrap();
        let audited = f.audit.len();

        let _ = f.ledger.borrow("levin", f.borrower_id, f.book_id);

        assert_eq!(f.audit.len(), audited);
        assert_eq!(f.store.borrowings_by_book(f.book_id).len(), 1);
    }
}
