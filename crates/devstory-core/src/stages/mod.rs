//! The six pipeline stages.
//!
//! Each stage is a function from typed inputs (plus the run context) to one
//! typed artifact. Stages never persist anything and never retry; the
//! orchestrator owns both.

pub mod assigner;
pub mod generation;
pub mod impact;
pub mod reviewer;
pub mod source_reader;
pub mod stories;

pub use assigner::assign_tasks;
pub use generation::generate;
pub use impact::analyze;
pub use reviewer::review;
pub use source_reader::read_sources;
pub use stories::generate_stories;
