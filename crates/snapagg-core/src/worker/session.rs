//! Exclusive per-invocation session resources.
//!
//! A worker that drives a browser, a remote shell, or a child process holds
//! exactly one such resource for the duration of `run()`. Wrapping it in a
//! [`ScopedSession`] guarantees `release()` runs once on every exit path,
//! including early returns, errors, and panics.

use std::ops::{Deref, DerefMut};

/// A resource that must be released when the worker is done with it.
pub trait Session {
    fn release(&mut self);
}

/// RAII guard around a [`Session`].
pub struct ScopedSession<S: Session> {
    session: S,
    released: bool,
}

impl<S: Session> ScopedSession<S> {
    pub fn new(session: S) -> Self {
        ScopedSession {
            session,
            released: false,
        }
    }

    /// Release now instead of at end of scope.
    pub fn release(mut self) {
        self.release_once();
    }

    fn release_once(&mut self) {
        if !self.released {
            self.released = true;
            self.session.release();
        }
    }
}

impl<S: Session> Deref for ScopedSession<S> {
    type Target = S;

    fn deref(&self) -> &S {
        &self.session
    }
}

impl<S: Session> DerefMut for ScopedSession<S> {
    fn deref_mut(&mut self) -> &mut S {
        &mut self.session
    }
}

impl<S: Session> Drop for ScopedSession<S> {
    fn drop(&mut self) {
        self.release_once();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        releases: Arc<AtomicUsize>,
        pages: usize,
    }

    impl Session for Counting {
        fn release(&mut self) {
            self.releases.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn counting() -> (Counting, Arc<AtomicUsize>) {
        let releases = Arc::new(AtomicUsize::new(0));
        (
            Counting {
                releases: releases.clone(),
                pages: 0,
            },
            releases,
        )
    }

    #[test]
    fn releases_once_on_scope_exit() {
        let (session, releases) = counting();
        {
            let mut scoped = ScopedSession::new(session);
            scoped.pages += 1;
            assert_eq!(scoped.pages, 1);
        }
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_release_does_not_double_release() {
        let (session, releases) = counting();
        ScopedSession::new(session).release();
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn releases_on_error_return() {
        fn failing(session: Counting) -> Result<(), String> {
            let _scoped = ScopedSession::new(session);
            Err("navigation failed".into())
        }
        let (session, releases) = counting();
        assert!(failing(session).is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn releases_on_panic() {
        let (session, releases) = counting();
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let _scoped = ScopedSession::new(session);
            panic!("worker bug");
        }));
        assert!(outcome.is_err());
        assert_eq!(releases.load(Ordering::SeqCst), 1);
    }
}
