use crate::value::{FromRow, Value};

/// How the store produces a column's value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Generated {
    /// Computed by an expression; never written.
    Computed,
    /// Assigned by the store on insert (auto-increment); read back after insert.
    Identity,
}

/// Reads one field off a model instance.
pub type Accessor<T> = fn(&T) -> Value;

/// Mapping of one model field to a column.
pub struct Field<T> {
    pub(crate) property: &'static str,
    pub(crate) column: Option<&'static str>,
    pub(crate) key: bool,
    pub(crate) generated: Option<Generated>,
    pub(crate) mapped: bool,
    pub(crate) accessor: Accessor<T>,
}

impl<T> Field<T> {
    pub fn new(property: &'static str, accessor: Accessor<T>) -> Self {
        Self {
            property,
            column: None,
            key: false,
            generated: None,
            mapped: true,
            accessor,
        }
    }

    /// Overrides the column name, which otherwise equals the property name.
    pub fn column(mut self, name: &'static str) -> Self {
        self.column = Some(name);
        self
    }

    pub fn key(mut self) -> Self {
        self.key = true;
        self
    }

    pub fn generated(mut self, kind: Generated) -> Self {
        self.generated = Some(kind);
        self
    }

    pub fn identity(self) -> Self {
        self.generated(Generated::Identity)
    }

    pub fn computed(self) -> Self {
        self.generated(Generated::Computed)
    }

    /// Excludes the field from every column list.
    pub fn not_mapped(mut self) -> Self {
        self.mapped = false;
        self
    }
}

/// Declared table mapping of a model type.
pub struct Mapping<T> {
    pub(crate) table: Option<&'static str>,
    pub(crate) fields: Vec<Field<T>>,
}

impl<T> Default for Mapping<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mapping<T> {
    pub fn new() -> Self {
        Self {
            table: None,
            fields: Vec::new(),
        }
    }

    /// Overrides the table name, which otherwise equals the type name.
    pub fn table(mut self, name: &'static str) -> Self {
        self.table = Some(name);
        self
    }

    pub fn field(mut self, field: Field<T>) -> Self {
        self.fields.push(field);
        self
    }
}

/// A record type stored in one table.
///
/// # Example
///
/// ```ignore
/// impl Model for Person {
///     fn mapping() -> Mapping<Self> {
///         Mapping::new()
///             .table("people")
///             .field(Field::new("Id", |p: &Person| p.id.into()).key().identity())
///             .field(Field::new("Name", |p: &Person| p.name.as_str().into()))
///             .field(Field::new("Age", |p: &Person| p.age.into()))
///     }
/// }
/// ```
pub trait Model: FromRow + Send + Sync + Sized + 'static {
    fn mapping() -> Mapping<Self>;
}

/// Last path segment of the type name, without generic arguments.
pub(crate) fn declared_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let without_generics = match full.find('<') {
        Some(index) => &full[..index],
        None => full,
    };

    match without_generics.rfind("::") {
        Some(index) => &without_generics[index + 2..],
        None => without_generics,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Invoice;
    struct Wrapper<T>(T);

    #[test]
    fn declared_name_strips_path_and_generics() {
        assert_eq!(declared_type_name::<Invoice>(), "Invoice");
        assert_eq!(declared_type_name::<Wrapper<Invoice>>(), "Wrapper");
        assert_eq!(declared_type_name::<i64>(), "i64");
    }
}
