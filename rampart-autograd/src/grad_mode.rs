//! Gradient recording switch.

use std::cell::Cell;

thread_local! {
    static GRAD_ENABLED: Cell<bool> = const { Cell::new(true) };
}

/// Whether ops executed on this thread record creator nodes.
pub fn is_grad_enabled() -> bool {
    GRAD_ENABLED.with(|enabled| enabled.get())
}

/// Run `f` without recording a computation graph.
///
/// The previous mode is restored on exit, including on unwind, so scopes nest.
pub fn no_grad<R>(f: impl FnOnce() -> R) -> R {
    struct Restore(bool);

    impl Drop for Restore {
        fn drop(&mut self) {
            GRAD_ENABLED.with(|enabled| enabled.set(self.0));
        }
    }

    let _restore = Restore(GRAD_ENABLED.with(|enabled| enabled.replace(false)));
    f()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_grad_nests_and_restores() {
        assert!(is_grad_enabled());
        no_grad(|| {
            assert!(!is_grad_enabled());
            no_grad(|| assert!(!is_grad_enabled()));
            assert!(!is_grad_enabled());
        });
        assert!(is_grad_enabled());
    }

    #[test]
    fn test_no_grad_restores_after_panic() {
        let result = std::panic::catch_unwind(|| no_grad(|| panic!("boom")));
        assert!(result.is_err());
        assert!(is_grad_enabled());
    }
}
