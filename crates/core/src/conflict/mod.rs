//! Conflict detection, three-way merging, and resolution validation.
//!
//! The conflict subsystem is responsible for:
//! 1. **Detection** -- classifying every path in the union of the base,
//!    personal, and snapshot indices by three-way hash comparison.
//! 2. **Merging** -- textual three-way merges with the snapshot state as
//!    the common ancestor.
//! 3. **Resolution** -- validating user-supplied resolution plans and
//!    selecting the content each resolution produces.

pub mod detector;
pub mod merger;
pub mod resolver;

pub use detector::{Classification, ClassifiedPath, ConflictDetector, ConflictRecord};
pub use merger::{MergeResult, Merger};
pub use resolver::{MergeProvider, Resolution, ResolutionEngine, ResolutionPlan};
