use anyhow::{anyhow, Result};

use super::{HeapSnapshot, HeapValue, ObjectIdMetadata};
use crate::constants::NULL_OBJECT_ID;
use crate::heapdump::ObjectId;

const NODE_CLASS_ID: ObjectId = 0x100;
const FIRST_NODE_ID: ObjectId = 0x1000;

pub(super) fn from_name(name: &str) -> Result<HeapSnapshot> {
    match name.strip_prefix("leak_chain_") {
        Some(count) => {
            let nodes = count
                .parse::<usize>()
                .map_err(|_| anyhow!("invalid node count in synthetic snapshot name: {}", name))?;
            Ok(leak_chain(nodes))
        }
        None => Err(anyhow!("unknown synthetic snapshot: {}", name)),
    }
}

/// A GC root holding a singly-linked chain of `nodes` instances, with a weak
/// reference watching the tail. Useful for smoke runs and frontier scaling
/// checks without a dump file.
pub fn leak_chain(nodes: usize) -> HeapSnapshot {
    let mut snapshot = HeapSnapshot::new(8);
    snapshot.add_class(NODE_CLASS_ID, "leakpath.synthetic.Node", 24, vec![]);
    for i in 0..nodes {
        let id = FIRST_NODE_ID + i as ObjectId;
        let next = if i + 1 < nodes {
            HeapValue::ObjectRef(id + 1)
        } else {
            HeapValue::ObjectRef(NULL_OBJECT_ID)
        };
        snapshot.add_instance(id, NODE_CLASS_ID, ObjectIdMetadata::Instance, vec![("next", next)]);
    }
    if nodes > 0 {
        snapshot.add_gc_root(FIRST_NODE_ID);
        snapshot.add_weak_ref(
            FIRST_NODE_ID + nodes as ObjectId - 1,
            "tail",
            "leakpath.synthetic.Node",
        );
    }
    snapshot
}
