use std::collections::HashMap;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Reachability tier of a reference edge. The ordering doubles as the search
/// priority: lower tiers are explored first and win ties.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum ExclusionStatus {
    AlwaysReachable,
    WeaklyReachable,
    NeverReachable,
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Exclusion {
    pub status: ExclusionStatus,
    pub description: String,
}

/// A single entry of the exclusion catalog, demoting one kind of reference
/// edge to a lower reachability tier.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ExclusionRule {
    Thread {
        thread_name: String,
        exclusion: Exclusion,
    },
    StaticField {
        class_name: String,
        field_name: String,
        exclusion: Exclusion,
    },
    InstanceField {
        class_name: String,
        field_name: String,
        exclusion: Exclusion,
    },
}

/// Exact-match lookup tables over the catalog, rebuilt once per search.
#[derive(Default)]
pub(crate) struct ExclusionIndex {
    threads: HashMap<String, Exclusion>,
    static_fields: HashMap<String, HashMap<String, Exclusion>>,
    instance_fields: HashMap<String, HashMap<String, Exclusion>>,
}

impl ExclusionIndex {
    pub fn build(rules: &[ExclusionRule]) -> ExclusionIndex {
        let mut index = ExclusionIndex::default();
        for rule in rules {
            match rule {
                ExclusionRule::Thread {
                    thread_name,
                    exclusion,
                } => {
                    index.threads.insert(thread_name.clone(), exclusion.clone());
                }
                ExclusionRule::StaticField {
                    class_name,
                    field_name,
                    exclusion,
                } => {
                    index
                        .static_fields
                        .entry(class_name.clone())
                        .or_default()
                        .insert(field_name.clone(), exclusion.clone());
                }
                ExclusionRule::InstanceField {
                    class_name,
                    field_name,
                    exclusion,
                } => {
                    index
                        .instance_fields
                        .entry(class_name.clone())
                        .or_default()
                        .insert(field_name.clone(), exclusion.clone());
                }
            }
        }
        index
    }

    pub fn static_field(&self, class_name: &str, field_name: &str) -> Option<&Exclusion> {
        self.static_fields.get(class_name)?.get(field_name)
    }

    pub fn instance_fields_of(&self, class_name: &str) -> Option<&HashMap<String, Exclusion>> {
        self.instance_fields.get(class_name)
    }

    /// Indexed but not yet consulted by the search; root nodes do not carry
    /// their owning thread through to enqueue.
    #[allow(dead_code)]
    pub fn thread(&self, thread_name: &str) -> Option<&Exclusion> {
        self.threads.get(thread_name)
    }
}

static DEFAULT_EXCLUSIONS: Lazy<Vec<ExclusionRule>> = Lazy::new(|| {
    fn weakly(description: &str) -> Exclusion {
        Exclusion {
            status: ExclusionStatus::WeaklyReachable,
            description: description.to_string(),
        }
    }
    vec![
        ExclusionRule::InstanceField {
            class_name: "java.lang.ref.FinalizerReference".to_string(),
            field_name: "referent".to_string(),
            exclusion: weakly("finalizer queue holds the referent until finalization runs"),
        },
        ExclusionRule::InstanceField {
            class_name: "java.lang.ref.FinalizerReference".to_string(),
            field_name: "prev".to_string(),
            exclusion: weakly("finalizer queue bookkeeping"),
        },
        ExclusionRule::InstanceField {
            class_name: "java.lang.ref.FinalizerReference".to_string(),
            field_name: "next".to_string(),
            exclusion: weakly("finalizer queue bookkeeping"),
        },
        ExclusionRule::StaticField {
            class_name: "android.os.Message".to_string(),
            field_name: "sPool".to_string(),
            exclusion: weakly("recycled messages are pooled for reuse, not leaked"),
        },
        ExclusionRule::InstanceField {
            class_name: "java.lang.Thread".to_string(),
            field_name: "blockerLock".to_string(),
            exclusion: weakly("thread park/unpark bookkeeping"),
        },
        ExclusionRule::Thread {
            thread_name: "FinalizerWatchdogDaemon".to_string(),
            exclusion: weakly("watchdog daemon stack frames hold objects briefly"),
        },
    ]
});

/// The built-in catalog of known-benign retention edges. Callers may append
/// their own rules or replace the catalog entirely.
pub fn default_exclusions() -> Vec<ExclusionRule> {
    DEFAULT_EXCLUSIONS.clone()
}
