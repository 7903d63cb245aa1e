//! Stack growth for the recursive walks over expression trees.

/// Run `f`, first moving to a fresh stack segment when the current one is
/// close to exhausted.
#[inline]
pub fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    /// Space that must remain on the current stack (100 KiB).
    const RED_ZONE: usize = 100 * 1024;

    /// Size of each newly allocated segment (1 MiB).
    const STACK_PER_RECURSION: usize = 1024 * 1024;

    stacker::maybe_grow(RED_ZONE, STACK_PER_RECURSION, f)
}
