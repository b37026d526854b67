//! Internal consistency checks.
//!
//! `ensure_voxel!` guards the scheduling invariants of the task graph, such as a future being
//! resolved twice or a task running while it still has unresolved dependencies. Debug builds
//! panic on a failed check. Release builds log the failure and let the caller take its
//! recovery path.
//!
//! The macro evaluates to the checked condition so callers can branch on it:
//!
//! ```ignore
//! if !ensure_voxel!(index < len, "index {} out of range", index) {
//!     return;
//! }
//! ```

cfg_if::cfg_if! {
    if #[cfg(debug_assertions)] {
        #[doc(hidden)]
        #[track_caller]
        pub fn ensure_failed(message: &str) {
            panic!("{message}");
        }
    } else {
        #[doc(hidden)]
        pub fn ensure_failed(message: &str) {
            log::error!("{message}");
        }
    }
}

macro_rules! ensure_voxel {
    ($condition:expr, $($arg:tt)+) => {{
        let condition: bool = $condition;
        if !condition {
            $crate::core::check::ensure_failed(&format!($($arg)+));
        }
        condition
    }};
}
