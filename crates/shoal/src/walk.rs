//! Callback return codes shared by the container walk APIs.

/// Verdict returned by hash-table iteration and single-pair callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterAction {
    /// Keep the current pair and move on.
    Continue,
    /// Keep the current pair and end the iteration.
    Stop,
    /// Remove the current pair and move on.
    RemoveContinue,
    /// Remove the current pair and end the iteration.
    RemoveStop,
}

/// Verdict returned by ordered-container walk callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkAction {
    Continue,
    Stop,
    /// Delete the visited entry, then keep walking.
    DeleteContinue,
    /// Delete the visited entry and end the walk.
    DeleteStop,
}
