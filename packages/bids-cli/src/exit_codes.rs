pub const SUCCESS: i32 = 0;
/// Unreadable or invalid configuration / metadata
pub const INPUT_ERROR: i32 = 1;
/// The build started and failed
pub const EXECUTION_ERROR: i32 = 2;
