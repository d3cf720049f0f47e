// ============================================
// Background Jobs Module (後台任務模組)
// ============================================
//
// Contains batch job runners for:
// 1. Offline leave-user-out cost evaluation
//
// These jobs are triggered from the command line binary.

pub mod evaluation_batch;

pub use evaluation_batch::{evaluate, run_evaluation_job, EvaluationJob};
