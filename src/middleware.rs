//! Per-request root transaction.
//!
//! [`root_transaction`] installs an empty session slot on each request. The
//! first [`Db`] extractor fills it: it opens a session and its root transaction,
//! which every non-nested scope inside the handler joins. Once the handler has
//! produced a response the layer commits on 2xx/3xx, rolls back otherwise and
//! returns the connection.

use crate::db::{Session, TxHandle};
use crate::error::AppError;
use crate::state::AppState;
use async_trait::async_trait;
use axum::{
    extract::{FromRequestParts, Request},
    http::request::Parts,
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMappedMutexGuard, OwnedMutexGuard};

pub(crate) struct RequestSession {
    session: Session,
    root: TxHandle,
}

#[derive(Clone, Default)]
pub struct RequestSlot(Arc<Mutex<Option<RequestSession>>>);

/// Middleware body for `axum::middleware::from_fn(root_transaction)`.
pub async fn root_transaction(mut req: Request, next: Next) -> Response {
    let slot = RequestSlot::default();
    req.extensions_mut().insert(slot.clone());
    let response = next.run(req).await;

    let Some(RequestSession { mut session, root }) = slot.0.lock().await.take() else {
        return response;
    };
    let status = response.status();
    let failed = !(status.is_success() || status.is_redirection());
    if let Err(e) = session.end(&root, failed).await {
        tracing::error!(error = %e, "failed to end request transaction");
        if let Err(close_err) = session.close().await {
            tracing::error!(error = %close_err, "failed to close request session");
        }
        return e.into_response();
    }
    if let Err(e) = session.close().await {
        tracing::error!(error = %e, "failed to close request session");
    }
    response
}

/// The request's session, inside its root transaction. Derefs to [`Session`].
pub struct Db {
    guard: OwnedMappedMutexGuard<Option<RequestSession>, RequestSession>,
}

impl Db {
    pub fn root(&self) -> &TxHandle {
        &self.guard.root
    }

    /// Commits the root transaction now and opens a fresh one.
    pub async fn force_commit_root(&mut self) -> Result<(), AppError> {
        let RequestSession { session, root } = &mut *self.guard;
        session.force_commit(root).await
    }

    /// Rolls back the root transaction now and opens a fresh one.
    pub async fn force_rollback_root(&mut self) -> Result<(), AppError> {
        let RequestSession { session, root } = &mut *self.guard;
        session.force_rollback(root).await
    }

    /// The root transaction rolls back at the end of the request whatever the status.
    pub fn set_force_rollback_root(&mut self) {
        self.guard.root.set_force_rollback();
    }
}

#[async_trait]
impl FromRequestParts<AppState> for Db {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let slot = parts
            .extensions
            .get::<RequestSlot>()
            .cloned()
            .ok_or_else(|| AppError::Internal("root_transaction layer is not installed".to_string()))?;
        let mut guard: OwnedMutexGuard<Option<RequestSession>> = slot.0.lock_owned().await;
        if guard.is_none() {
            let mut session = state.db.session().await?;
            let root = session.begin(state.settings().allow_nesting_root_transaction).await?;
            *guard = Some(RequestSession { session, root });
        }
        let guard = OwnedMutexGuard::try_map(guard, |s| s.as_mut())
            .map_err(|_| AppError::Internal("request session unavailable".to_string()))?;
        Ok(Db { guard })
    }
}

impl Deref for Db {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.guard.session
    }
}

impl DerefMut for Db {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.guard.session
    }
}
