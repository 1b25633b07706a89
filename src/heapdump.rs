mod synthetic;

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::constants::*;

pub use synthetic::leak_chain;

/// A 64-bit heap object id. Zero denotes null.
pub type ObjectId = u64;

/// Kind tag co-located with the parsed snapshot for every id. The analyzer
/// consumes these but never computes them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum ObjectIdMetadata {
    Class,
    Instance,
    ObjectArray,
    PrimitiveArrayOrWrapperArray,
    PrimitiveWrapper,
    String,
    EmptyInstance,
}

impl ObjectIdMetadata {
    /// Object kinds that never lead to a leaking candidate. They are kept off
    /// the frontier (unless leaking themselves) to bound the search.
    pub fn skipped_during_search(self) -> bool {
        matches!(
            self,
            ObjectIdMetadata::PrimitiveWrapper
                | ObjectIdMetadata::PrimitiveArrayOrWrapperArray
                | ObjectIdMetadata::String
                | ObjectIdMetadata::EmptyInstance
        )
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
pub enum PrimitiveKind {
    Boolean,
    Byte,
    Short,
    Char,
    Int,
    Float,
    Long,
    Double,
}

impl PrimitiveKind {
    pub fn width(self) -> usize {
        match self {
            PrimitiveKind::Boolean => BYTES_IN_BOOLEAN,
            PrimitiveKind::Byte => BYTES_IN_BYTE,
            PrimitiveKind::Short => BYTES_IN_SHORT,
            PrimitiveKind::Char => BYTES_IN_CHAR,
            PrimitiveKind::Int => BYTES_IN_INT,
            PrimitiveKind::Float => BYTES_IN_FLOAT,
            PrimitiveKind::Long => BYTES_IN_LONG,
            PrimitiveKind::Double => BYTES_IN_DOUBLE,
        }
    }
}

/// A field or array slot value as hydrated by the parser.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub enum HeapValue {
    ObjectRef(ObjectId),
    Boolean(bool),
    Byte(i8),
    Short(i16),
    Char(u16),
    Int(i32),
    Float(f32),
    Long(i64),
    Double(f64),
}

impl HeapValue {
    pub fn object_ref(&self) -> Option<ObjectId> {
        match self {
            HeapValue::ObjectRef(id) => Some(*id),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StaticField {
    /// HPROF string id of the field name, resolved via the parser.
    pub name_id: ObjectId,
    pub value: HeapValue,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassRecord {
    pub id: ObjectId,
    /// Shallow size of one instance, cumulative over the class hierarchy.
    pub instance_size: u64,
    pub static_fields: Vec<StaticField>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: ObjectId,
    pub class_id: ObjectId,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ObjectArrayRecord {
    pub id: ObjectId,
    pub class_id: ObjectId,
    pub element_ids: Vec<ObjectId>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrimitiveArrayRecord {
    pub id: ObjectId,
    pub kind: PrimitiveKind,
    pub length: usize,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum Record {
    Class(ClassRecord),
    Instance(InstanceRecord),
    ObjectArray(ObjectArrayRecord),
    PrimitiveArray(PrimitiveArrayRecord),
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClassInfo {
    pub class_name: String,
    pub field_names: Vec<String>,
}

/// Parallel arrays: `field_values[i][j]` is the value of
/// `class_hierarchy[i].field_names[j]`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HydratedInstance {
    pub class_hierarchy: Vec<ClassInfo>,
    pub field_values: Vec<Vec<HeapValue>>,
}

/// Mirror of a tracking weak reference. The search only needs the referent;
/// the rest identifies the leak in reports.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WeakRefMirror {
    pub referent: ObjectId,
    pub key: String,
    pub class_name: String,
}

/// Contract of the external snapshot parser the analyzer runs against.
///
/// Lookups must be idempotent and side-effect-free; the analyzer may request
/// the same id several times (once during the search, again during retained
/// size accounting).
pub trait HeapParser {
    fn retrieve_record_by_id(&self, id: ObjectId) -> Option<Record>;
    fn object_id_metadata(&self, id: ObjectId) -> Option<ObjectIdMetadata>;
    fn class_name(&self, class_id: ObjectId) -> Option<String>;
    fn hprof_string_by_id(&self, string_id: ObjectId) -> Option<String>;
    fn hydrate_instance(&self, record: &InstanceRecord) -> Result<HydratedInstance>;
    /// Reference width of the dump, 4 or 8 bytes.
    fn id_size(&self) -> usize;
}

/// In-memory mirror of a parsed heap snapshot.
///
/// This is the reference implementation of [`HeapParser`]: everything is
/// pre-resolved into maps keyed by object id. Real dumps are converted to this
/// shape by an external parsing pipeline; the JSON form is what the CLI loads.
#[derive(Clone, Default, Debug, Serialize, Deserialize)]
pub struct HeapSnapshot {
    pub id_size: usize,
    pub records: HashMap<ObjectId, Record>,
    pub metadata: HashMap<ObjectId, ObjectIdMetadata>,
    pub class_names: HashMap<ObjectId, String>,
    pub strings: HashMap<ObjectId, String>,
    pub hydrated: HashMap<ObjectId, HydratedInstance>,
    pub gc_roots: Vec<ObjectId>,
    pub weak_refs: Vec<WeakRefMirror>,
}

impl HeapSnapshot {
    pub fn new(id_size: usize) -> HeapSnapshot {
        HeapSnapshot {
            id_size,
            ..Default::default()
        }
    }

    /// Loads a snapshot from a JSON file, or generates one for a
    /// `[synthetic]` pseudo-path such as `[synthetic]leak_chain_4096`.
    pub fn from_path(path: impl AsRef<Path>) -> Result<HeapSnapshot> {
        let path = path.as_ref();
        let name = path.to_str().unwrap_or_default();
        if let Some(name) = name.strip_prefix("[synthetic]") {
            return synthetic::from_name(name);
        }
        let file = File::open(path).with_context(|| format!("opening snapshot {:?}", path))?;
        let snapshot: HeapSnapshot = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("decoding snapshot {:?}", path))?;
        info!(
            "Loaded snapshot with {} records, {} roots, {} weak refs",
            snapshot.records.len(),
            snapshot.gc_roots.len(),
            snapshot.weak_refs.len()
        );
        Ok(snapshot)
    }

    /// Find-or-insert the id of an HPROF string.
    pub fn intern_string(&mut self, s: &str) -> ObjectId {
        if let Some((&id, _)) = self.strings.iter().find(|(_, v)| v.as_str() == s) {
            return id;
        }
        let id = STRING_ID_SEED + self.strings.len() as ObjectId;
        self.strings.insert(id, s.to_string());
        id
    }

    pub fn add_class(
        &mut self,
        id: ObjectId,
        name: &str,
        instance_size: u64,
        static_fields: Vec<(&str, HeapValue)>,
    ) {
        let static_fields = static_fields
            .into_iter()
            .map(|(field_name, value)| StaticField {
                name_id: self.intern_string(field_name),
                value,
            })
            .collect();
        self.records.insert(
            id,
            Record::Class(ClassRecord {
                id,
                instance_size,
                static_fields,
            }),
        );
        self.metadata.insert(id, ObjectIdMetadata::Class);
        self.class_names.insert(id, name.to_string());
    }

    /// Registers an instance with a single-class hierarchy. The class must
    /// have been added first. Deeper hierarchies go through
    /// [`HeapSnapshot::set_hydration`].
    pub fn add_instance(
        &mut self,
        id: ObjectId,
        class_id: ObjectId,
        metadata: ObjectIdMetadata,
        fields: Vec<(&str, HeapValue)>,
    ) {
        let class_name = self
            .class_names
            .get(&class_id)
            .expect("add the class before its instances")
            .clone();
        let (field_names, values): (Vec<String>, Vec<HeapValue>) = fields
            .into_iter()
            .map(|(field_name, value)| (field_name.to_string(), value))
            .unzip();
        self.records
            .insert(id, Record::Instance(InstanceRecord { id, class_id }));
        self.metadata.insert(id, metadata);
        self.hydrated.insert(
            id,
            HydratedInstance {
                class_hierarchy: vec![ClassInfo {
                    class_name,
                    field_names,
                }],
                field_values: vec![values],
            },
        );
    }

    pub fn set_hydration(&mut self, id: ObjectId, hydrated: HydratedInstance) {
        self.hydrated.insert(id, hydrated);
    }

    pub fn add_object_array(&mut self, id: ObjectId, class_id: ObjectId, element_ids: Vec<ObjectId>) {
        self.records.insert(
            id,
            Record::ObjectArray(ObjectArrayRecord {
                id,
                class_id,
                element_ids,
            }),
        );
        self.metadata.insert(id, ObjectIdMetadata::ObjectArray);
    }

    pub fn add_primitive_array(&mut self, id: ObjectId, kind: PrimitiveKind, length: usize) {
        self.records
            .insert(id, Record::PrimitiveArray(PrimitiveArrayRecord { id, kind, length }));
        self.metadata
            .insert(id, ObjectIdMetadata::PrimitiveArrayOrWrapperArray);
    }

    pub fn add_gc_root(&mut self, id: ObjectId) {
        self.gc_roots.push(id);
    }

    pub fn add_weak_ref(&mut self, referent: ObjectId, key: &str, class_name: &str) {
        self.weak_refs.push(WeakRefMirror {
            referent,
            key: key.to_string(),
            class_name: class_name.to_string(),
        });
    }
}

impl HeapParser for HeapSnapshot {
    fn retrieve_record_by_id(&self, id: ObjectId) -> Option<Record> {
        self.records.get(&id).cloned()
    }

    fn object_id_metadata(&self, id: ObjectId) -> Option<ObjectIdMetadata> {
        self.metadata.get(&id).copied()
    }

    fn class_name(&self, class_id: ObjectId) -> Option<String> {
        self.class_names.get(&class_id).cloned()
    }

    fn hprof_string_by_id(&self, string_id: ObjectId) -> Option<String> {
        self.strings.get(&string_id).cloned()
    }

    fn hydrate_instance(&self, record: &InstanceRecord) -> Result<HydratedInstance> {
        self.hydrated
            .get(&record.id)
            .cloned()
            .ok_or_else(|| anyhow!("no hydration data for instance 0x{:x}", record.id))
    }

    fn id_size(&self) -> usize {
        self.id_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_object_snapshot() -> HeapSnapshot {
        let mut snapshot = HeapSnapshot::new(8);
        snapshot.add_class(0x100, "com.example.Holder", 16, vec![]);
        snapshot.add_instance(
            0x10,
            0x100,
            ObjectIdMetadata::Instance,
            vec![("next", HeapValue::ObjectRef(0x11))],
        );
        snapshot.add_instance(
            0x11,
            0x100,
            ObjectIdMetadata::Instance,
            vec![("next", HeapValue::ObjectRef(NULL_OBJECT_ID))],
        );
        snapshot.add_gc_root(0x10);
        snapshot.add_weak_ref(0x11, "watched", "com.example.Holder");
        snapshot
    }

    #[test]
    fn intern_is_stable() {
        let mut snapshot = HeapSnapshot::new(8);
        let a = snapshot.intern_string("next");
        let b = snapshot.intern_string("prev");
        assert_eq!(a, snapshot.intern_string("next"));
        assert_ne!(a, b);
    }

    #[test]
    fn parser_lookups() {
        let snapshot = two_object_snapshot();
        assert_eq!(
            snapshot.object_id_metadata(0x10),
            Some(ObjectIdMetadata::Instance)
        );
        assert_eq!(
            snapshot.class_name(0x100),
            Some("com.example.Holder".to_string())
        );
        let record = snapshot.retrieve_record_by_id(0x10);
        let Some(Record::Instance(instance)) = record else {
            panic!("expected an instance record");
        };
        let hydrated = snapshot.hydrate_instance(&instance).unwrap();
        assert_eq!(hydrated.class_hierarchy[0].field_names, vec!["next"]);
        assert_eq!(
            hydrated.field_values[0][0],
            HeapValue::ObjectRef(0x11)
        );
    }

    #[test]
    fn json_round_trip() {
        let snapshot = two_object_snapshot();
        let encoded = serde_json::to_string(&snapshot).unwrap();
        let decoded: HeapSnapshot = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.gc_roots, snapshot.gc_roots);
        assert_eq!(decoded.records.len(), snapshot.records.len());
        assert_eq!(decoded.weak_refs[0].referent, 0x11);
    }

    #[test]
    fn synthetic_leak_chain() {
        let snapshot = HeapSnapshot::from_path("[synthetic]leak_chain_16").unwrap();
        assert_eq!(snapshot.gc_roots.len(), 1);
        assert_eq!(snapshot.weak_refs.len(), 1);
        assert_eq!(snapshot.records.len(), 16 + 1); // nodes plus the class dump
    }

    #[test]
    fn synthetic_rejects_unknown_names() {
        assert!(HeapSnapshot::from_path("[synthetic]red_black_tree_7").is_err());
        assert!(HeapSnapshot::from_path("[synthetic]leak_chain_x").is_err());
    }
}
