use std::future::Future;

/// Before/after pair for a local state change that is confirmed remotely.
///
/// `run` applies `after` immediately, awaits the remote write and re-applies
/// `before` if the write fails. The error is handed back untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition<T> {
    pub before: T,
    pub after: T,
}

impl<T> Transition<T> {
    pub fn new(before: T, after: T) -> Self {
        Self { before, after }
    }

    pub async fn run<R, E, Fut>(self, mut apply: impl FnMut(&T), remote: Fut) -> Result<R, E>
    where
        Fut: Future<Output = Result<R, E>>,
    {
        apply(&self.after);
        match remote.await {
            Ok(r) => Ok(r),
            Err(e) => {
                apply(&self.before);
                Err(e)
            }
        }
    }
}

impl Transition<bool> {
    pub fn toggle(current: bool) -> Self {
        Self::new(current, !current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[tokio::test]
    async fn applies_after_on_success() {
        let state = Cell::new(false);
        let out: Result<u8, ()> = Transition::toggle(state.get()).run(|v| state.set(*v), async { Ok(7) }).await;
        assert_eq!(out, Ok(7));
        assert!(state.get());
    }

    #[tokio::test]
    async fn reverts_on_failure() {
        let state = Cell::new(3);
        let out: Result<(), &str> = Transition::new(3, 4).run(|v| state.set(*v), async { Err("offline") }).await;
        assert_eq!(out, Err("offline"));
        assert_eq!(state.get(), 3);
    }
}
