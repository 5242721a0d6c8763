//! Well-known bridge method names.
//!
//! These are integration contracts between the host and the tool server,
//! not part of the envelope: new methods can be added without a protocol
//! change.

/// Create or extend a test plan and stream its content to plan subscribers.
pub const PROPOSE_TEST_PLAN: &str = "proposeTestPlan";

/// Mark a proposed plan as approved.
pub const APPROVE_PLAN: &str = "approvePlan";

/// Store a conversation summary produced during context compaction.
pub const SUMMARIZE_CONTEXT: &str = "summarizeContext";

/// Write a generated test file into the workspace.
pub const WRITE_TEST_FILE: &str = "writeTestFile";

/// Every well-known method, in registration order.
pub const ALL: &[&str] = &[PROPOSE_TEST_PLAN, APPROVE_PLAN, SUMMARIZE_CONTEXT, WRITE_TEST_FILE];
