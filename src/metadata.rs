//! Resolution of model mappings into cached column descriptors, and the
//! extraction of ordered bindings from model instances.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, OnceLock, RwLock};

use crate::model::{declared_type_name, Accessor, Generated, Model};
use crate::value::Value;

/// Generated kinds excluded from every insert and update payload.
pub const STORE_GENERATED: &[Generated] = &[Generated::Computed, Generated::Identity];

/// A `(column name, value)` pair bound into a statement.
pub type Binding = (String, Value);

pub struct ColumnDescriptor<T> {
    pub name: &'static str,
    pub property: &'static str,
    pub is_key: bool,
    pub generated: Option<Generated>,
    accessor: Accessor<T>,
}

impl<T> ColumnDescriptor<T> {
    pub fn read(&self, model: &T) -> Value {
        (self.accessor)(model)
    }

    pub fn is_generated(&self) -> bool {
        self.generated.is_some()
    }

    /// Ordinal, case-insensitive match against either the column or the property name.
    pub fn matches_name(&self, name: &str) -> bool {
        names_match(self.name, name) || names_match(self.property, name)
    }
}

impl<T> Clone for ColumnDescriptor<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            property: self.property,
            is_key: self.is_key,
            generated: self.generated,
            accessor: self.accessor,
        }
    }
}

impl<T> fmt::Debug for ColumnDescriptor<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ColumnDescriptor")
            .field("name", &self.name)
            .field("property", &self.property)
            .field("is_key", &self.is_key)
            .field("generated", &self.generated)
            .finish()
    }
}

fn names_match(a: &str, b: &str) -> bool {
    a.chars().map(fold_case).eq(b.chars().map(fold_case))
}

/// Simple one-to-one uppercase fold; characters whose uppercase form
/// expands to several characters are left as they are.
fn fold_case(c: char) -> char {
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(folded), None) => folded,
        _ => c,
    }
}

/// Resolved table shape of a model type.
pub struct EntityMetadata<T> {
    pub table_name: &'static str,
    columns: Vec<ColumnDescriptor<T>>,
}

impl<T: Model> EntityMetadata<T> {
    fn from_mapping() -> Self {
        let mapping = T::mapping();
        let table_name = mapping
            .table
            .unwrap_or_else(|| declared_type_name::<T>());

        let columns = mapping
            .fields
            .into_iter()
            .filter(|field| field.mapped)
            .map(|field| ColumnDescriptor {
                name: field.column.unwrap_or(field.property),
                property: field.property,
                is_key: field.key,
                generated: field.generated,
                accessor: field.accessor,
            })
            .collect();

        Self {
            table_name,
            columns,
        }
    }
}

impl<T> EntityMetadata<T> {
    /// All mapped columns in declaration order.
    pub fn columns(&self) -> &[ColumnDescriptor<T>] {
        &self.columns
    }

    pub fn key_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns.iter().filter(|c| c.is_key).collect()
    }

    pub fn generated_columns(&self, kinds: &[Generated]) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| matches!(c.generated, Some(kind) if kinds.contains(&kind)))
            .collect()
    }

    pub fn insertable_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .filter(|c| !matches!(c.generated, Some(kind) if STORE_GENERATED.contains(&kind)))
            .collect()
    }

    pub fn updatable_columns(&self) -> Vec<&ColumnDescriptor<T>> {
        self.insertable_columns()
            .into_iter()
            .filter(|c| !c.is_key)
            .collect()
    }

    pub fn identity_column(&self) -> Option<&ColumnDescriptor<T>> {
        self.columns
            .iter()
            .find(|c| c.generated == Some(Generated::Identity))
    }
}

impl<T> fmt::Debug for EntityMetadata<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityMetadata")
            .field("table_name", &self.table_name)
            .field("columns", &self.columns)
            .finish()
    }
}

type Cache = RwLock<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>;

fn cache() -> &'static Cache {
    static CACHE: OnceLock<Cache> = OnceLock::new();
    CACHE.get_or_init(Default::default)
}

/// Resolves the metadata of `T`, computing it on first use.
///
/// Concurrent first resolutions may both compute the mapping; the first one
/// stored wins and every caller gets that instance.
pub fn resolve<T: Model>() -> Arc<EntityMetadata<T>> {
    let type_id = TypeId::of::<T>();

    let cached = cache()
        .read()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .get(&type_id)
        .cloned();

    if let Some(entry) = cached.and_then(|entry| entry.downcast::<EntityMetadata<T>>().ok()) {
        return entry;
    }

    let resolved = EntityMetadata::<T>::from_mapping();
    log::debug!(
        "Resolved metadata for {} [table: {}, columns: {}]",
        std::any::type_name::<T>(),
        resolved.table_name,
        resolved.columns.len()
    );

    let stored = cache()
        .write()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
        .entry(type_id)
        .or_insert_with(|| Arc::new(resolved) as Arc<dyn Any + Send + Sync>)
        .clone();

    // Entries are keyed by TypeId, so the downcast cannot fail.
    stored
        .downcast::<EntityMetadata<T>>()
        .unwrap_or_else(|_| Arc::new(EntityMetadata::<T>::from_mapping()))
}

/// Pairs each descriptor's column name with its value on `model`, in descriptor order.
pub fn extract<'a, T: 'a, I>(columns: I, model: &T) -> Vec<Binding>
where
    I: IntoIterator<Item = &'a ColumnDescriptor<T>>,
{
    columns
        .into_iter()
        .map(|column| (column.name.to_string(), column.read(model)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::model::{Field, Mapping};
    use crate::value::{FromRow, Row};

    struct Person {
        id: i64,
        name: String,
        age: i32,
        cache_hint: u8,
    }

    impl FromRow for Person {
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get("Id")?,
                name: row.get("Name")?,
                age: row.get("age_years")?,
                cache_hint: 0,
            })
        }
    }

    impl Model for Person {
        fn mapping() -> Mapping<Self> {
            Mapping::new()
                .field(Field::new("Id", |p: &Person| p.id.into()).key().identity())
                .field(Field::new("Name", |p: &Person| p.name.as_str().into()))
                .field(Field::new("Age", |p: &Person| p.age.into()).column("age_years"))
                .field(Field::new("CacheHint", |p: &Person| p.cache_hint.into()).not_mapped())
        }
    }

    struct AuditEntry {
        id: String,
        checksum: String,
    }

    impl FromRow for AuditEntry {
        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get("EntryId")?,
                checksum: row.get("Checksum")?,
            })
        }
    }

    impl Model for AuditEntry {
        fn mapping() -> Mapping<Self> {
            Mapping::new()
                .table("audit_log")
                .field(Field::new("EntryId", |e: &AuditEntry| e.id.as_str().into()).key())
                .field(Field::new("Checksum", |e: &AuditEntry| e.checksum.as_str().into()).computed())
        }
    }

    struct Unmapped;

    impl FromRow for Unmapped {
        fn from_row(_: &Row) -> Result<Self> {
            Ok(Unmapped)
        }
    }

    impl Model for Unmapped {
        fn mapping() -> Mapping<Self> {
            Mapping::new()
        }
    }

    fn names<T>(columns: &[&ColumnDescriptor<T>]) -> Vec<&'static str> {
        columns.iter().map(|c| c.name).collect()
    }

    #[test]
    fn table_name_defaults_to_type_name() {
        assert_eq!(resolve::<Person>().table_name, "Person");
        assert_eq!(resolve::<AuditEntry>().table_name, "audit_log");
    }

    #[test]
    fn not_mapped_fields_are_excluded() {
        let metadata = resolve::<Person>();
        let all: Vec<_> = metadata.columns().iter().map(|c| c.name).collect();

        assert_eq!(all, vec!["Id", "Name", "age_years"]);
    }

    #[test]
    fn column_sets_follow_markers() {
        let metadata = resolve::<Person>();

        assert_eq!(names(&metadata.key_columns()), vec!["Id"]);
        assert_eq!(names(&metadata.insertable_columns()), vec!["Name", "age_years"]);
        assert_eq!(names(&metadata.updatable_columns()), vec!["Name", "age_years"]);
        assert_eq!(metadata.identity_column().map(|c| c.name), Some("Id"));
        assert_eq!(
            names(&metadata.generated_columns(&[Generated::Identity])),
            vec!["Id"]
        );
        assert!(metadata.generated_columns(&[Generated::Computed]).is_empty());
    }

    #[test]
    fn computed_key_is_neither_insertable_nor_updatable() {
        let metadata = resolve::<AuditEntry>();

        assert_eq!(names(&metadata.insertable_columns()), vec!["EntryId"]);
        assert!(metadata.updatable_columns().is_empty());
        assert!(metadata.identity_column().is_none());
    }

    #[test]
    fn type_without_fields_resolves_empty() {
        let metadata = resolve::<Unmapped>();

        assert!(metadata.columns().is_empty());
        assert!(metadata.key_columns().is_empty());
    }

    #[test]
    fn resolution_is_cached() {
        let first = resolve::<Person>();
        let second = resolve::<Person>();

        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn concurrent_resolution_converges() {
        let handles: Vec<_> = (0..8)
            .map(|_| std::thread::spawn(resolve::<AuditEntry>))
            .collect();

        let resolved: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        for metadata in &resolved {
            assert!(Arc::ptr_eq(metadata, &resolved[0]));
        }
    }

    #[test]
    fn extract_preserves_descriptor_order() {
        let metadata = resolve::<Person>();
        let person = Person {
            id: 5,
            name: "Ann".to_string(),
            age: 31,
            cache_hint: 9,
        };

        let bindings = extract(metadata.insertable_columns(), &person);

        assert_eq!(
            bindings,
            vec![
                ("Name".to_string(), Value::from("Ann")),
                ("age_years".to_string(), Value::Int(31)),
            ]
        );
        assert_eq!(
            extract(metadata.key_columns(), &person),
            vec![("Id".to_string(), Value::Int(5))]
        );
    }

    #[test]
    fn names_match_by_column_or_property() {
        let metadata = resolve::<Person>();
        let age = &metadata.columns()[2];

        assert!(age.matches_name("AGE"));
        assert!(age.matches_name("Age_Years"));
        assert!(!age.matches_name("name"));
    }

    #[test]
    fn names_fold_one_char_at_a_time() {
        assert!(names_match("straße", "STRAßE"));
        assert!(names_match("Ärger", "äRGER"));
        assert!(!names_match("Straße", "STRASSE"));
        assert!(!names_match("Name", "Names"));
    }
}
