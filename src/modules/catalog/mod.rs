pub mod cache;
pub mod models;
pub mod store;

use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use biblio_http::error::AppError;
use biblio_kernel::{InitCtx, Module};
use serde_json::json;
use uuid::Uuid;

use cache::{SearchCache, SearchKey};
use models::{Book, CreateBookRequest, Page, SearchParams, UpdateBookRequest};
use store::{CatalogError, CatalogStore};

impl From<CatalogError> for AppError {
    fn from(err: CatalogError) -> Self {
        match err {
            CatalogError::BookNotFound => AppError::not_found(err.to_string()),
            CatalogError::IsbnExists | CatalogError::BookOnLoan => {
                AppError::conflict(err.to_string())
            }
        }
    }
}

/// Shared state handed to the catalog handlers.
#[derive(Clone)]
pub struct CatalogState {
    pub store: Arc<CatalogStore>,
    pub cache: Arc<SearchCache>,
}

/// Catalog management: books and the memoized search over them.
pub struct CatalogModule {
    state: CatalogState,
}

impl CatalogModule {
    pub fn new(store: Arc<CatalogStore>, cache: Arc<SearchCache>) -> Self {
        Self {
            state: CatalogState { store, cache },
        }
    }
}

#[async_trait]
impl Module for CatalogModule {
    fn name(&self) -> &'static str {
        "catalog"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "catalog module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", get(list_books).post(create_book))
            .route("/search", get(search_books))
            .route(
                "/{id}",
                get(get_book).put(update_book).delete(delete_book),
            )
            .with_state(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "List books",
                        "tags": ["Catalog"],
                        "responses": {
                            "200": { "description": "All books in the catalog" }
                        }
                    },
                    "post": {
                        "summary": "Add a book",
                        "tags": ["Catalog"],
                        "responses": {
                            "201": { "description": "Book created" },
                            "409": { "description": "ISBN already exists" },
                            "422": { "description": "Validation error" }
                        }
                    }
                },
                "/search": {
                    "get": {
                        "summary": "Search books with filters and pagination",
                        "tags": ["Catalog"],
                        "responses": {
                            "200": { "description": "One page of matching books" }
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get a book",
                        "tags": ["Catalog"],
                        "responses": {
                            "200": { "description": "The book" },
                            "404": { "description": "Book not found" }
                        }
                    },
                    "put": {
                        "summary": "Update a book",
                        "tags": ["Catalog"],
                        "responses": {
                            "200": { "description": "Updated book" },
                            "404": { "description": "Book not found" },
                            "409": { "description": "ISBN already exists" }
                        }
                    },
                    "delete": {
                        "summary": "Delete a book",
                        "tags": ["Catalog"],
                        "responses": {
                            "204": { "description": "Book deleted" },
                            "404": { "description": "Book not found" },
                            "409": { "description": "Book has an active borrowing" }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Book": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "format": "uuid" },
                            "title": { "type": "string" },
                            "author": { "type": "string" },
                            "genre": { "type": "string" },
                            "isbn": { "type": "string" },
                            "publication_date": { "type": "string", "format": "date" },
                            "available": { "type": "boolean" }
                        },
                        "required": ["id", "title", "author", "genre", "isbn", "publication_date", "available"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "catalog module stopped");
        Ok(())
    }
}

fn validate_book_fields(title: &str, author: &str, isbn: &str) -> Result<(), AppError> {
    let mut details = Vec::new();
    for (field, value) in [("title", title), ("author", author), ("isbn", isbn)] {
        if value.trim().is_empty() {
            details.push(json!({"field": field, "error": "required"}));
        }
    }
    if details.is_empty() {
        Ok(())
    } else {
        Err(AppError::validation(details, "Book fields failed validation"))
    }
}

/// Add a book to the catalog
async fn create_book(
    State(state): State<CatalogState>,
    Json(request): Json<CreateBookRequest>,
) -> Result<(StatusCode, Json<Book>), AppError> {
    validate_book_fields(&request.title, &request.author, &request.isbn)?;

    let book = state.store.insert_book(request)?;
    state.cache.invalidate_all();

    tracing::info!(book_id = %book.id, isbn = %book.isbn, "book added to catalog");
    Ok((StatusCode::CREATED, Json(book)))
}

/// List all books without filters
async fn list_books(State(state): State<CatalogState>) -> Json<Vec<Book>> {
    Json(state.store.list_books())
}

/// Get a single book by id
async fn get_book(
    State(state): State<CatalogState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Book>, AppError> {
    let book = state
        .store
        .get_book(id)
        .ok_or_else(|| AppError::not_found(CatalogError::BookNotFound.to_string()))?;
    Ok(Json(book))
}

/// Update a book's descriptive fields
async fn update_book(
    State(state): State<CatalogState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateBookRequest>,
) -> Result<Json<Book>, AppError> {
    validate_book_fields(&request.title, &request.author, &request.isbn)?;

    let book = state.store.update_book(id, request)?;
    state.cache.invalidate_all();

    Ok(Json(book))
}

/// Delete a book; refused while it is on loan
async fn delete_book(
    State(state): State<CatalogState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.store.delete_book(id)?;
    state.cache.invalidate_all();

    Ok(StatusCode::NO_CONTENT)
}

/// Filtered, paginated search served through the cache
async fn search_books(
    State(state): State<CatalogState>,
    Query(params): Query<SearchParams>,
) -> Json<Page<Book>> {
    Json(search_page(&state.store, &state.cache, &params))
}

/// Cache-through search: hit if a page for this exact normalized key was
/// computed under the current generation, recompute and store otherwise.
pub(crate) fn search_page(
    store: &CatalogStore,
    cache: &SearchCache,
    params: &SearchParams,
) -> Page<Book> {
    let generation = cache.generation();
    let key = SearchKey::from_params(params);

    if let Some(hit) = cache.get(&key) {
        return hit;
    }

    let page = store.search_books(
        key.title.as_deref(),
        key.author.as_deref(),
        key.isbn.as_deref(),
        key.genre.as_deref(),
        key.page,
        key.per_page,
    );
    cache.put_at(key, page.clone(), generation);
    page
}

/// Create a new instance of the catalog module
pub fn create_module(store: Arc<CatalogStore>, cache: Arc<SearchCache>) -> Arc<dyn Module> {
    Arc::new(CatalogModule::new(store, cache))
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    fn request(isbn: &str, title: &str) -> CreateBookRequest {
        CreateBookRequest {
            title: title.to_string(),
            author: "Author".to_string(),
            genre: "Fiction".to_string(),
            isbn: isbn.to_string(),
            publication_date: date!(2001 - 01 - 01),
        }
    }

    #[test]
    fn search_results_are_memoized() {
        let store = CatalogStore::new();
        let cache = SearchCache::new();
        store.insert_book(request("isbn-1", "Dune")).unwrap();

        let params = SearchParams {
            title: Some("dune".to_string()),
            ..SearchParams::default()
        };
        let first = search_page(&store, &cache, &params);
        assert_eq!(first.total, 1);

        // The second read is a cache hit: it does not see a write that
        // bypassed invalidation.
        store.insert_book(request("isbn-2", "Dune Messiah")).unwrap();
        let second = search_page(&store, &cache, &params);
        assert_eq!(second.total, 1);
    }

    #[test]
    fn cached_page_never_survives_a_mutation() {
        let store = CatalogStore::new();
        let cache = SearchCache::new();
        let book = store.insert_book(request("isbn-1", "Dune")).unwrap();

        let params = SearchParams {
            title: Some("dune".to_string()),
            ..SearchParams::default()
        };
        let before = search_page(&store, &cache, &params);
        assert!(before.items[0].available);

        // A lending transition flips availability and evicts the cache.
        assert!(store.conditional_set_availability(book.id, true, false));
        cache.invalidate_all();

        let after = search_page(&store, &cache, &params);
        assert!(!after.items[0].available);
    }

    #[test]
    fn validation_rejects_blank_fields() {
        assert!(validate_book_fields("", "Author", "isbn").is_err());
        assert!(validate_book_fields("Title", " ", "isbn").is_err());
        assert!(validate_book_fields("Title", "Author", "isbn").is_ok());
    }
}
