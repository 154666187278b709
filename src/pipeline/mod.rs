//! Run Pipeline Module
//!
//! One invocation runs one cycle:
//!
//! 1. **Collect**: sample every configured database into a snapshot
//! 2. **Load**: read the previous run's snapshots (absent on the first run)
//! 3. **Diff**: current minus previous, per database
//! 4. **Publish**: push the deltas as metric points
//! 5. **Save**: replace the stored snapshots with this run's

pub mod orchestrator;

pub use orchestrator::{Orchestrator, RunReport};
