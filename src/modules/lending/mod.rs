pub mod audit;
pub mod ledger;
pub mod models;

use std::convert::Infallible;
use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use biblio_http::error::AppError;
use biblio_kernel::{InitCtx, Module};
use serde_json::json;
use tokio_stream::{Stream, StreamExt};
use uuid::Uuid;

use ledger::LendingLedger;
use models::{AvailabilityEvent, BorrowRequest, BorrowingView};

/// Header carrying the pre-validated principal used for audit records.
const PRINCIPAL_HEADER: &str = "x-principal";

#[derive(Clone)]
struct LendingState {
    ledger: Arc<LendingLedger>,
}

/// Lending module: borrow/return operations, borrowing queries, and the
/// live availability stream.
pub struct LendingModule {
    state: LendingState,
}

impl LendingModule {
    pub fn new(ledger: Arc<LendingLedger>) -> Self {
        Self {
            state: LendingState { ledger },
        }
    }
}

#[async_trait]
impl Module for LendingModule {
    fn name(&self) -> &'static str {
        "lending"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            loan_period_days = ctx.settings.lending.loan_period_days,
            "lending module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", post(borrow_book))
            .route("/return/{id}", put(return_book))
            .route("/all", get(list_all))
            .route("/borrower/{id}", get(list_by_borrower))
            .route("/overdue", get(list_overdue))
            .route("/stream/availability", get(stream_availability))
            .with_state(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/": {
                    "post": {
                        "summary": "Borrow a book",
                        "tags": ["Lending"],
                        "responses": {
                            "201": { "description": "Borrowing created" },
                            "404": { "description": "Book or borrower not found" },
                            "409": { "description": "Book is currently unavailable" }
                        }
                    }
                },
                "/return/{id}": {
                    "put": {
                        "summary": "Return a borrowed book",
                        "tags": ["Lending"],
                        "responses": {
                            "200": { "description": "Borrowing closed" },
                            "404": { "description": "Borrowing not found" },
                            "409": { "description": "Borrowing was already returned" }
                        }
                    }
                },
                "/all": {
                    "get": {
                        "summary": "List all borrow records",
                        "tags": ["Lending"],
                        "responses": {
                            "200": { "description": "Every borrowing, past and present" }
                        }
                    }
                },
                "/borrower/{id}": {
                    "get": {
                        "summary": "List borrowings of one borrower",
                        "tags": ["Lending"],
                        "responses": {
                            "200": { "description": "The borrower's records" },
                            "404": { "description": "Borrower not found" }
                        }
                    }
                },
                "/overdue": {
                    "get": {
                        "summary": "List overdue borrowings",
                        "tags": ["Lending"],
                        "responses": {
                            "200": { "description": "Active borrowings past their due date" }
                        }
                    }
                },
                "/stream/availability": {
                    "get": {
                        "summary": "Subscribe to availability changes (SSE)",
                        "tags": ["Lending"],
                        "responses": {
                            "200": {
                                "description": "Server-sent event stream of availability changes",
                                "content": { "text/event-stream": {} }
                            }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "BorrowingView": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "format": "uuid" },
                            "borrower_name": { "type": "string" },
                            "book_title": { "type": "string" },
                            "borrow_date": { "type": "string", "format": "date" },
                            "due_date": { "type": "string", "format": "date" },
                            "return_date": { "type": "string", "format": "date", "nullable": true }
                        },
                        "required": ["id", "borrower_name", "book_title", "borrow_date", "due_date"]
                    },
                    "AvailabilityEvent": {
                        "type": "object",
                        "properties": {
                            "book_id": { "type": "string", "format": "uuid" },
                            "title": { "type": "string" },
                            "available": { "type": "boolean" }
                        },
                        "required": ["book_id", "title", "available"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "lending module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "lending module stopped");
        Ok(())
    }
}

/// Audit actor from the pre-validated principal header.
fn actor_from(headers: &HeaderMap) -> String {
    headers
        .get(PRINCIPAL_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Borrow a book for a borrower
async fn borrow_book(
    State(state): State<LendingState>,
    headers: HeaderMap,
    Json(request): Json<BorrowRequest>,
) -> Result<(StatusCode, Json<BorrowingView>), AppError> {
    let actor = actor_from(&headers);
    let view = state
        .ledger
        .borrow(&actor, request.borrower_id, request.book_id)?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// Return a borrowed book
async fn return_book(
    State(state): State<LendingState>,
    headers: HeaderMap,
    Path(id): Path<Uuid>,
) -> Result<Json<BorrowingView>, AppError> {
    let actor = actor_from(&headers);
    let view = state.ledger.return_book(&actor, id)?;
    Ok(Json(view))
}

/// All borrow records
async fn list_all(State(state): State<LendingState>) -> Json<Vec<BorrowingView>> {
    Json(state.ledger.list_all())
}

/// Borrowings of one borrower
async fn list_by_borrower(
    State(state): State<LendingState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<BorrowingView>>, AppError> {
    Ok(Json(state.ledger.list_by_borrower(id)?))
}

/// Active borrowings past their due date
async fn list_overdue(State(state): State<LendingState>) -> Json<Vec<BorrowingView>> {
    Json(state.ledger.list_overdue())
}

/// Live availability feed as server-sent events. The subscription is
/// deregistered when the client disconnects and the stream is dropped.
async fn stream_availability(
    State(state): State<LendingState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = state.ledger.subscribe();
    let stream = subscription.map(|update: AvailabilityEvent| {
        Ok(Event::default()
            .event("availability")
            .json_data(&update)
            .unwrap_or_else(|_| Event::default()))
    });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

/// Create a new instance of the lending module
pub fn create_module(ledger: Arc<LendingLedger>) -> Arc<dyn Module> {
    Arc::new(LendingModule::new(ledger))
}
