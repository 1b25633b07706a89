#[macro_use]
extern crate log;

pub mod analyzer;
mod cli;
mod constants;
pub mod exclusion;
pub mod heapdump;

pub use crate::analyzer::{
    LeakReference, LeakResult, LogListener, NoopListener, PathElement, PathFinder,
    ProgressListener, ReferenceKind, Step,
};
pub use crate::cli::Args;
pub use crate::exclusion::{default_exclusions, Exclusion, ExclusionRule, ExclusionStatus};
pub use crate::heapdump::{
    HeapParser, HeapSnapshot, HeapValue, HydratedInstance, ObjectId, ObjectIdMetadata, Record,
    WeakRefMirror,
};
