//! Thread-scoped resolution context
//!
//! Container builds must run with the manager's own resolution context in
//! effect, whatever context the delivering thread had. [`ContextGuard`] swaps
//! the context in and puts the previous one back when dropped, which covers
//! early returns, `?` and unwinding alike.

use std::cell::RefCell;
use std::fmt;
use std::sync::Arc;

thread_local! {
    static CURRENT_CONTEXT: RefCell<Option<ResolutionContext>> = const { RefCell::new(None) };
}

/// Named scope that collaborators consult to resolve types and resources.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct ResolutionContext {
    name: Arc<str>,
}

impl ResolutionContext {
    pub fn new(name: impl AsRef<str>) -> Self {
        Self {
            name: Arc::from(name.as_ref()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Same underlying allocation, not merely an equal name.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.name, &other.name)
    }
}

impl fmt::Debug for ResolutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResolutionContext").field(&self.name).finish()
    }
}

/// Context in effect on the current thread, if any.
pub fn current_context() -> Option<ResolutionContext> {
    CURRENT_CONTEXT.with(|current| current.borrow().clone())
}

/// Replace the current thread's context, returning the previous one.
pub fn set_current_context(context: Option<ResolutionContext>) -> Option<ResolutionContext> {
    CURRENT_CONTEXT.with(|current| current.replace(context))
}

/// Restores the previous context on drop.
#[must_use = "the context is restored as soon as the guard is dropped"]
pub struct ContextGuard {
    previous: Option<ResolutionContext>,
}

impl ContextGuard {
    pub fn enter(context: &ResolutionContext) -> Self {
        let previous = set_current_context(Some(context.clone()));
        Self { previous }
    }
}

impl Drop for ContextGuard {
    fn drop(&mut self) {
        set_current_context(self.previous.take());
    }
}

/// Run `f` with `context` in effect.
pub fn with_context<R>(context: &ResolutionContext, f: impl FnOnce() -> R) -> R {
    let _guard = ContextGuard::enter(context);
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_guard_restores_previous() {
        let host = ResolutionContext::new("host");
        let manager = ResolutionContext::new("manager");

        set_current_context(Some(host.clone()));
        {
            let _guard = ContextGuard::enter(&manager);
            assert_eq!(current_context().as_ref(), Some(&manager));
        }
        let restored = current_context().unwrap();
        assert!(restored.ptr_eq(&host));

        set_current_context(None);
    }

    #[test]
    fn test_restores_none() {
        set_current_context(None);
        with_context(&ResolutionContext::new("tmp"), || {
            assert_eq!(current_context().unwrap().name(), "tmp");
        });
        assert!(current_context().is_none());
    }

    #[test]
    fn test_nested_guards() {
        let a = ResolutionContext::new("a");
        let b = ResolutionContext::new("b");
        set_current_context(None);

        with_context(&a, || {
            with_context(&b, || assert_eq!(current_context().unwrap().name(), "b"));
            assert_eq!(current_context().unwrap().name(), "a");
        });
        assert!(current_context().is_none());
    }

    #[test]
    fn test_restored_after_panic() {
        let host = ResolutionContext::new("host");
        set_current_context(Some(host.clone()));

        let result = std::panic::catch_unwind(|| {
            let _guard = ContextGuard::enter(&ResolutionContext::new("doomed"));
            panic!("build exploded");
        });
        assert!(result.is_err());
        assert!(current_context().unwrap().ptr_eq(&host));

        set_current_context(None);
    }
}
