//! Execution contexts.
//!
//! A context binds a user root to the graph memory of one base path for the
//! duration of a request or CLI run. Contexts form an explicit per-thread
//! stack with RAII guards; `current()` reads the top of the stack. `reset()`
//! exists for tests.

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use jac_core::error::StorageError;
use uuid::Uuid;

use crate::anchor::Anchor;
use crate::memory::GraphMemory;

const DEFAULT_ROOT_KEY: &str = "default_root_id";

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Arc<ExecutionContext>>> = const { RefCell::new(Vec::new()) };
}

pub struct ExecutionContext {
    pub base_path: PathBuf,
    user_root_id: Uuid,
    memory: Mutex<GraphMemory>,
}

impl ExecutionContext {
    /// Open (or reuse) the memory for `base_path`, resolve the root anchor,
    /// and return the context. When `user_root_id` is absent the store's
    /// default root is used, created on first access.
    pub fn create(
        base_path: &Path,
        user_root_id: Option<Uuid>,
    ) -> Result<Arc<ExecutionContext>, StorageError> {
        let memory = GraphMemory::open(base_path)?;
        let root_id = match user_root_id {
            Some(id) => id,
            None => match memory.meta_get(DEFAULT_ROOT_KEY)? {
                Some(raw) => Uuid::parse_str(&raw)
                    .map_err(|e| StorageError::CorruptAnchor(format!("default root: {e}")))?,
                None => {
                    let id = Uuid::new_v4();
                    memory.meta_set(DEFAULT_ROOT_KEY, &id.to_string())?;
                    id
                }
            },
        };

        if memory.get(root_id)?.is_none() {
            memory.put(&Anchor::new_root(root_id))?;
        }

        Ok(Arc::new(ExecutionContext {
            base_path: base_path.to_path_buf(),
            user_root_id: root_id,
            memory: Mutex::new(memory),
        }))
    }

    /// Create an in-memory context for tests.
    pub fn create_ephemeral() -> Result<Arc<ExecutionContext>, StorageError> {
        let memory = GraphMemory::open_in_memory()?;
        let root_id = Uuid::new_v4();
        memory.put(&Anchor::new_root(root_id))?;
        Ok(Arc::new(ExecutionContext {
            base_path: PathBuf::from(":memory:"),
            user_root_id: root_id,
            memory: Mutex::new(memory),
        }))
    }

    /// The root anchor id this context acts as.
    pub fn root(&self) -> Uuid {
        self.user_root_id
    }

    /// The root anchor itself, created on first access by `create`.
    pub fn root_anchor(&self) -> Result<Anchor, StorageError> {
        self.memory()
            .get(self.user_root_id)?
            .ok_or_else(|| StorageError::CorruptAnchor("root anchor missing".to_string()))
    }

    pub fn memory(&self) -> MutexGuard<'_, GraphMemory> {
        self.memory.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Push this context as current; the guard pops it on drop.
    pub fn enter(self: &Arc<Self>) -> ContextGuard {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().push(self.clone()));
        ContextGuard { _private: () }
    }

    /// The innermost active context on this thread.
    pub fn current() -> Option<Arc<ExecutionContext>> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().cloned())
    }

    /// Commit pending writes.
    pub fn close(&self) -> Result<(), StorageError> {
        self.memory().commit()
    }

    /// Clear this thread's context stack. Test hook.
    pub fn reset() {
        CONTEXT_STACK.with(|stack| stack.borrow_mut().clear());
    }
}

/// Pops the context pushed by [`ExecutionContext::enter`] when dropped.
pub struct ContextGuard {
    _private: (),
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        CONTEXT_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_registers_root_anchor() {
        let tmp = tempfile::tempdir().unwrap();
        let ctx = ExecutionContext::create(tmp.path(), None).unwrap();
        let root = ctx.root_anchor().unwrap();
        assert_eq!(root.id, ctx.root());
        assert_eq!(root.owner_root_id, root.id);
    }

    #[test]
    fn default_root_is_stable_across_contexts() {
        let tmp = tempfile::tempdir().unwrap();
        let first = ExecutionContext::create(tmp.path(), None).unwrap();
        let second = ExecutionContext::create(tmp.path(), None).unwrap();
        assert_eq!(first.root(), second.root());
    }

    #[test]
    fn explicit_root_is_created_on_first_access() {
        let tmp = tempfile::tempdir().unwrap();
        let id = Uuid::new_v4();
        let ctx = ExecutionContext::create(tmp.path(), Some(id)).unwrap();
        assert_eq!(ctx.root(), id);
        assert!(ctx.memory().get(id).unwrap().is_some());
    }

    #[test]
    fn context_stack_nests() {
        ExecutionContext::reset();
        let outer = ExecutionContext::create_ephemeral().unwrap();
        let inner = ExecutionContext::create_ephemeral().unwrap();

        let _outer_guard = outer.enter();
        assert_eq!(ExecutionContext::current().unwrap().root(), outer.root());
        {
            let _inner_guard = inner.enter();
            assert_eq!(ExecutionContext::current().unwrap().root(), inner.root());
        }
        assert_eq!(ExecutionContext::current().unwrap().root(), outer.root());
        drop(_outer_guard);
        assert!(ExecutionContext::current().is_none());
    }

    #[test]
    fn reset_clears_stack() {
        let ctx = ExecutionContext::create_ephemeral().unwrap();
        let guard = ctx.enter();
        ExecutionContext::reset();
        assert!(ExecutionContext::current().is_none());
        drop(guard);
    }
}
