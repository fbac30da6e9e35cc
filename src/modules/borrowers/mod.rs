use std::sync::Arc;

use async_trait::async_trait;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use biblio_http::error::AppError;
use biblio_kernel::{InitCtx, Module};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use super::catalog::store::{BorrowerError, CatalogStore};

/// A registered library member. Identity is pre-validated upstream; this
/// module only keeps the directory the lending ledger resolves against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Borrower {
    pub id: Uuid,
    pub name: String,
    pub email: String,
}

/// Request model for registering a borrower.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterBorrowerRequest {
    pub name: String,
    pub email: String,
}

impl From<BorrowerError> for AppError {
    fn from(err: BorrowerError) -> Self {
        match err {
            BorrowerError::BorrowerNotFound => AppError::not_found(err.to_string()),
            BorrowerError::EmailExists => AppError::conflict(err.to_string()),
        }
    }
}

#[derive(Clone)]
struct BorrowersState {
    store: Arc<CatalogStore>,
}

/// Borrower directory module.
pub struct BorrowersModule {
    state: BorrowersState,
}

impl BorrowersModule {
    pub fn new(store: Arc<CatalogStore>) -> Self {
        Self {
            state: BorrowersState { store },
        }
    }
}

#[async_trait]
impl Module for BorrowersModule {
    fn name(&self) -> &'static str {
        "borrowers"
    }

    async fn init(&self, ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(
            module = self.name(),
            environment = ?ctx.settings.environment,
            "borrowers module initialized"
        );
        Ok(())
    }

    fn routes(&self) -> Router {
        Router::new()
            .route("/", get(list_borrowers).post(register_borrower))
            .route("/{id}", get(get_borrower))
            .with_state(self.state.clone())
    }

    fn openapi(&self) -> Option<serde_json::Value> {
        Some(json!({
            "paths": {
                "/": {
                    "get": {
                        "summary": "List borrowers",
                        "tags": ["Borrowers"],
                        "responses": {
                            "200": { "description": "All registered borrowers" }
                        }
                    },
                    "post": {
                        "summary": "Register a borrower",
                        "tags": ["Borrowers"],
                        "responses": {
                            "201": { "description": "Borrower registered" },
                            "409": { "description": "Email already exists" },
                            "422": { "description": "Validation error" }
                        }
                    }
                },
                "/{id}": {
                    "get": {
                        "summary": "Get a borrower",
                        "tags": ["Borrowers"],
                        "responses": {
                            "200": { "description": "The borrower" },
                            "404": { "description": "Borrower not found" }
                        }
                    }
                }
            },
            "components": {
                "schemas": {
                    "Borrower": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string", "format": "uuid" },
                            "name": { "type": "string" },
                            "email": { "type": "string", "format": "email" }
                        },
                        "required": ["id", "name", "email"]
                    }
                }
            }
        }))
    }

    async fn start(&self, _ctx: &InitCtx<'_>) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "borrowers module started");
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        tracing::info!(module = self.name(), "borrowers module stopped");
        Ok(())
    }
}

/// Register a new borrower
async fn register_borrower(
    State(state): State<BorrowersState>,
    Json(request): Json<RegisterBorrowerRequest>,
) -> Result<(StatusCode, Json<Borrower>), AppError> {
    let mut details = Vec::new();
    for (field, value) in [("name", &request.name), ("email", &request.email)] {
        if value.trim().is_empty() {
            details.push(json!({"field": field, "error": "required"}));
        }
    }
    if !details.is_empty() {
        return Err(AppError::validation(
            details,
            "Borrower fields failed validation",
        ));
    }

    let borrower = state.store.insert_borrower(request.name, request.email)?;
    tracing::info!(borrower_id = %borrower.id, "borrower registered");
    Ok((StatusCode::CREATED, Json(borrower)))
}

/// List all borrowers
async fn list_borrowers(State(state): State<BorrowersState>) -> Json<Vec<Borrower>> {
    Json(state.store.list_borrowers())
}

/// Get a borrower by id
async fn get_borrower(
    State(state): State<BorrowersState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Borrower>, AppError> {
    let borrower = state
        .store
        .get_borrower(id)
        .ok_or_else(|| AppError::not_found(BorrowerError::BorrowerNotFound.to_string()))?;
    Ok(Json(borrower))
}

/// Create a new instance of the borrowers module
pub fn create_module(store: Arc<CatalogStore>) -> Arc<dyn Module> {
    Arc::new(BorrowersModule::new(store))
}
