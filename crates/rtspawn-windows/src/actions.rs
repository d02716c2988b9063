use rtspawn_core::SpawnActions;
use std::os::windows::io::BorrowedHandle;

/// Spawn actions over borrowed Windows handles.
///
/// Redirect handles are duplicated as inheritable for the child, so any
/// handle the caller can read or write works. Handles in the inherit list
/// reach the child under their current value and must already be
/// inheritable.
pub type WindowsSpawnActions<'a> = SpawnActions<'a, BorrowedHandle<'a>>;
