//! Per-thread execution coordinates.
//!
//! Every unit of test work runs with a [`ThreadContext`] describing which
//! suite, execution and test the current thread is busy with. The context is
//! passed explicitly to the test body through the invocation, and is also
//! installed in a thread-local slot for ambient diagnostics. The slot is only
//! ever written through [`ThreadContext::enter`], whose guard clears it on
//! drop, so a pooled thread never carries state from one test into the next.

use std::cell::RefCell;

use serde::{Deserialize, Serialize};

thread_local! {
    static CURRENT: RefCell<Option<ThreadContext>> = const { RefCell::new(None) };
}

/// Execution coordinates of the test currently running on a thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThreadContext {
    /// Suite identifier.
    pub suite_id: Option<String>,
    /// Identifier of this execution instance (one per test run attempt chain).
    pub execution_id: Option<String>,
    /// Class (group) of the running test.
    pub test_class: Option<String>,
    /// Method name of the running test.
    pub test_method: Option<String>,
    /// Identifier of the `TestResult` being produced.
    pub test_id: Option<String>,
    /// Whether the test is running under the parallel execution manager.
    pub parallel: bool,
    /// Diagnostic unit name, `<pool>-<class>.<method>-<threadId>`.
    pub unit_name: Option<String>,
}

impl ThreadContext {
    /// Create an empty context.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_suite_id(mut self, suite_id: impl Into<String>) -> Self {
        self.suite_id = Some(suite_id.into());
        self
    }

    pub fn with_execution_id(mut self, execution_id: impl Into<String>) -> Self {
        self.execution_id = Some(execution_id.into());
        self
    }

    pub fn with_test(mut self, class: impl Into<String>, method: impl Into<String>) -> Self {
        self.test_class = Some(class.into());
        self.test_method = Some(method.into());
        self
    }

    pub fn with_test_id(mut self, test_id: impl Into<String>) -> Self {
        self.test_id = Some(test_id.into());
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_unit_name(mut self, unit_name: impl Into<String>) -> Self {
        self.unit_name = Some(unit_name.into());
        self
    }

    /// `Class.method` of the running test, when both are known.
    pub fn qualified_test_name(&self) -> Option<String> {
        match (&self.test_class, &self.test_method) {
            (Some(class), Some(method)) => Some(format!("{}.{}", class, method)),
            _ => None,
        }
    }

    /// Installs this context as the current thread's context.
    ///
    /// The returned guard restores whatever was installed before (normally
    /// nothing) when dropped, including during unwinding.
    pub fn enter(self) -> ContextGuard {
        let previous = CURRENT.with(|slot| slot.borrow_mut().replace(self));
        ContextGuard {
            previous,
            _not_send: std::marker::PhantomData,
        }
    }

    /// Snapshot of the context installed on the current thread, if any.
    pub fn current() -> Option<ThreadContext> {
        CURRENT.with(|slot| slot.borrow().clone())
    }

    /// Reads a field of the current context without cloning it.
    pub fn with_current<R>(f: impl FnOnce(Option<&ThreadContext>) -> R) -> R {
        CURRENT.with(|slot| f(slot.borrow().as_ref()))
    }

    /// Whether a context is installed on the current thread.
    pub fn is_active() -> bool {
        CURRENT.with(|slot| slot.borrow().is_some())
    }
}

/// Scope guard returned by [`ThreadContext::enter`].
///
/// Not `Send`: it must be dropped on the thread that created it.
#[must_use = "the context is cleared as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ThreadContext>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        CURRENT.with(|slot| *slot.borrow_mut() = previous);
    }
}
