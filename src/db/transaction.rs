//! Transaction scopes over a session-owned frame stack.
//!
//! The bottom frame is the real `BEGIN`; every frame above it is a savepoint.
//! A scope either opens a frame (`Root`, `Nested`) or joins the frame below it
//! (`Reused`). Scopes are identified by frame id, so a scope whose frame was
//! already closed by someone else can detect it at exit.

use super::Session;
use crate::error::{AppError, ConfigError};
use std::ops::{Deref, DerefMut};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxState {
    /// Opened the outermost transaction.
    Root,
    /// Joined the caller's transaction; a successful exit is a no-op.
    Reused,
    /// Opened a savepoint.
    Nested,
}

#[derive(Debug)]
pub(crate) struct Frame {
    pub id: u64,
    pub savepoint: Option<String>,
}

/// Entry result of one scope.
#[derive(Debug, Clone)]
pub struct TxHandle {
    frame: u64,
    state: TxState,
    nested: bool,
    force_rollback: bool,
}

impl TxHandle {
    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn nested(&self) -> bool {
        self.nested
    }

    /// Make the scope roll back at exit even without an error.
    pub fn set_force_rollback(&mut self) {
        self.force_rollback = true;
    }

    pub fn force_rollback_set(&self) -> bool {
        self.force_rollback
    }
}

impl Session {
    pub fn in_transaction(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Number of open frames: 0 outside a transaction, 1 in the root, +1 per savepoint.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Enters a scope.
    ///
    /// No transaction: `BEGIN` (Root). `nested`: savepoint (Nested). Otherwise the
    /// current transaction is joined (Reused) if it is the root; joining a
    /// savepoint is refused unless `allow_nesting_root_transaction` is set.
    pub async fn begin(&mut self, nested: bool) -> Result<TxHandle, AppError> {
        self.flush_pending().await?;
        let top = self.frames.last().map(|f| (f.id, f.savepoint.is_some()));
        let (frame, state) = match top {
            None => {
                self.raw_execute("BEGIN").await?;
                (self.push_frame(None), TxState::Root)
            }
            Some(_) if nested => {
                let name = format!("solo_sp_{}", self.frames.len());
                self.raw_execute(&format!("SAVEPOINT \"{}\"", name)).await?;
                (self.push_frame(Some(name)), TxState::Nested)
            }
            Some((id, false)) => (id, TxState::Reused),
            Some((id, true)) => {
                if !self.settings().allow_nesting_root_transaction {
                    return Err(ConfigError::NestedTransaction.into());
                }
                (id, TxState::Reused)
            }
        };
        tracing::debug!(state = ?state, depth = self.frames.len(), "transaction scope entered");
        Ok(TxHandle {
            frame,
            state,
            nested,
            force_rollback: false,
        })
    }

    fn push_frame(&mut self, savepoint: Option<String>) -> u64 {
        let id = self.next_frame;
        self.next_frame += 1;
        self.frames.push(Frame { id, savepoint });
        id
    }

    fn frame_index(&self, handle: &TxHandle) -> Option<usize> {
        self.frames.iter().position(|f| f.id == handle.frame)
    }

    /// Leaves a scope: rolls back when `failed` or the force-rollback flag is set,
    /// commits otherwise. Returns whether the scope committed.
    ///
    /// A scope whose frame is already gone logs a warning and does nothing.
    /// A reused scope only acts on failure, rolling back the shared transaction.
    /// Scopes dropped unfinished above it are rolled back first.
    pub async fn end(&mut self, handle: &TxHandle, failed: bool) -> Result<bool, AppError> {
        self.flush_pending().await?;
        self.end_frame(handle, failed).await
    }

    async fn end_frame(&mut self, handle: &TxHandle, failed: bool) -> Result<bool, AppError> {
        let Some(index) = self.frame_index(handle) else {
            tracing::warn!(
                "Transaction closed manually. Use force_commit() or force_rollback() on the scope instead"
            );
            return Ok(false);
        };
        let rollback = failed || handle.force_rollback;
        if handle.state == TxState::Reused && !rollback {
            return Ok(true);
        }
        if rollback {
            tracing::debug!(state = ?handle.state, "rolling back transaction");
            self.rollback_frame(index).await?;
            Ok(false)
        } else {
            tracing::debug!(state = ?handle.state, "committing transaction");
            self.commit_frame(index).await?;
            Ok(true)
        }
    }

    async fn commit_frame(&mut self, index: usize) -> Result<(), AppError> {
        match self.frames[index].savepoint.clone() {
            None => self.raw_execute("COMMIT").await?,
            Some(name) => self.raw_execute(&format!("RELEASE SAVEPOINT \"{}\"", name)).await?,
        }
        self.frames.truncate(index);
        Ok(())
    }

    async fn rollback_frame(&mut self, index: usize) -> Result<(), AppError> {
        match self.frames[index].savepoint.clone() {
            None => self.raw_execute("ROLLBACK").await?,
            Some(name) => {
                self.raw_execute(&format!("ROLLBACK TO SAVEPOINT \"{}\"", name)).await?;
                self.raw_execute(&format!("RELEASE SAVEPOINT \"{}\"", name)).await?;
            }
        }
        self.frames.truncate(index);
        Ok(())
    }

    /// Commits the handle's frame now and re-enters with the same nesting request.
    pub async fn force_commit(&mut self, handle: &mut TxHandle) -> Result<(), AppError> {
        self.flush_pending().await?;
        if let Some(index) = self.frame_index(handle) {
            self.commit_frame(index).await?;
        }
        self.reenter(handle).await
    }

    /// Rolls back the handle's frame now and re-enters with the same nesting request.
    pub async fn force_rollback(&mut self, handle: &mut TxHandle) -> Result<(), AppError> {
        self.flush_pending().await?;
        if let Some(index) = self.frame_index(handle) {
            self.rollback_frame(index).await?;
        }
        self.reenter(handle).await
    }

    async fn reenter(&mut self, handle: &mut TxHandle) -> Result<(), AppError> {
        let fresh = self.begin(handle.nested).await?;
        handle.frame = fresh.frame;
        handle.state = fresh.state;
        Ok(())
    }

    pub(crate) async fn flush_pending(&mut self) -> Result<(), AppError> {
        for handle in std::mem::take(&mut self.pending) {
            // Already unwound together with an enclosing dropped scope.
            if self.frame_index(&handle).is_none() {
                continue;
            }
            tracing::debug!(state = ?handle.state, "rolling back unfinished scope");
            self.end_frame(&handle, true).await?;
        }
        Ok(())
    }

    /// Opens a scope guarded by the returned [`Transaction`].
    pub async fn transaction(&mut self, nested: bool) -> Result<Transaction<'_>, AppError> {
        let handle = self.begin(nested).await?;
        Ok(Transaction {
            session: self,
            handle,
            finished: false,
        })
    }
}

/// A transaction scope. Derefs to the session so statements run inside it.
///
/// End it with [`commit`](Transaction::commit), [`rollback`](Transaction::rollback)
/// or [`finish`](Transaction::finish). Dropping it unfinished counts as a failure:
/// the rollback runs before the session's next statement.
pub struct Transaction<'s> {
    session: &'s mut Session,
    handle: TxHandle,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub fn state(&self) -> TxState {
        self.handle.state
    }

    pub fn set_force_rollback(&mut self) {
        self.handle.set_force_rollback();
    }

    pub async fn force_commit(&mut self) -> Result<(), AppError> {
        self.session.force_commit(&mut self.handle).await
    }

    pub async fn force_rollback(&mut self) -> Result<(), AppError> {
        self.session.force_rollback(&mut self.handle).await
    }

    /// Normal exit. Returns false when the scope rolled back instead (forced, or
    /// its frame was closed elsewhere).
    pub async fn commit(mut self) -> Result<bool, AppError> {
        self.finished = true;
        self.session.end(&self.handle, false).await
    }

    pub async fn rollback(mut self) -> Result<(), AppError> {
        self.finished = true;
        self.session.end(&self.handle, true).await?;
        Ok(())
    }

    /// Commits on `Ok`, rolls back on `Err` and hands the original error back unchanged.
    pub async fn finish<T>(self, result: Result<T, AppError>) -> Result<T, AppError> {
        match result {
            Ok(v) => {
                self.commit().await?;
                Ok(v)
            }
            Err(e) => {
                if let Err(rollback_err) = self.rollback().await {
                    tracing::error!(error = %rollback_err, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

impl Deref for Transaction<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        self.session
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.session.pending.push(self.handle.clone());
        }
    }
}
