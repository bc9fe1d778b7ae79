//! Records
//!
//! Ordered named fields, each either a value or a closure evaluated on first
//! access and memoised. Lazy fields let a per-field cache read only the files
//! a consumer actually touches.

use std::cell::OnceCell;
use std::fmt;
use std::marker::PhantomData;
use std::rc::Rc;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Selector for field projection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Field {
    /// Named record field.
    Name(String),
    /// Position in a sequence-like element.
    Position(usize),
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Field::Name(name) => write!(f, "{}", name),
            Field::Position(i) => write!(f, "{}", i),
        }
    }
}

impl From<&str> for Field {
    fn from(name: &str) -> Self {
        Field::Name(name.to_string())
    }
}

impl From<usize> for Field {
    fn from(position: usize) -> Self {
        Field::Position(position)
    }
}

/// Elements that can be restricted to a subset of their fields.
pub trait Project: Sized {
    /// Whether `field` exists in this element.
    fn has_field(&self, field: &Field) -> bool;

    /// Keep only `fields`, in the given order; unknown fields are skipped.
    fn project(&self, fields: &[Field]) -> Self;
}

impl<T: Clone> Project for Vec<T> {
    fn has_field(&self, field: &Field) -> bool {
        matches!(field, Field::Position(i) if *i < self.len())
    }

    fn project(&self, fields: &[Field]) -> Self {
        fields
            .iter()
            .filter_map(|f| match f {
                Field::Position(i) => self.get(*i).cloned(),
                Field::Name(_) => None,
            })
            .collect()
    }
}

enum Slot<V> {
    Ready(Rc<V>),
    Lazy {
        cell: Rc<OnceCell<V>>,
        init: Rc<dyn Fn() -> V>,
    },
}

impl<V> Clone for Slot<V> {
    fn clone(&self) -> Self {
        match self {
            Slot::Ready(v) => Slot::Ready(Rc::clone(v)),
            Slot::Lazy { cell, init } => Slot::Lazy {
                cell: Rc::clone(cell),
                init: Rc::clone(init),
            },
        }
    }
}

impl<V> Slot<V> {
    fn get(&self) -> &V {
        match self {
            Slot::Ready(v) => v.as_ref(),
            Slot::Lazy { cell, init } => cell.get_or_init(|| (**init)()),
        }
    }

    fn is_evaluated(&self) -> bool {
        match self {
            Slot::Ready(_) => true,
            Slot::Lazy { cell, .. } => cell.get().is_some(),
        }
    }
}

/// One field of a record, evaluated on demand.
pub(crate) struct FieldHandle<V>(Slot<V>);

impl<V> FieldHandle<V> {
    pub(crate) fn get(&self) -> &V {
        self.0.get()
    }
}

/// An ordered collection of named, possibly lazy, fields.
///
/// # Example
/// ```rust
/// use rampart::data::Record;
///
/// let r = Record::new()
///     .with("x", 1.5f32)
///     .with_lazy("y", || 2.0f32);
/// assert_eq!(r.is_evaluated("y"), Some(false));
/// assert_eq!(r.get("y"), Some(&2.0));
/// assert_eq!(r.is_evaluated("y"), Some(true));
/// ```
pub struct Record<V> {
    fields: Vec<(String, Slot<V>)>,
}

impl<V> Record<V> {
    /// Create an empty record.
    pub fn new() -> Self {
        Self { fields: Vec::new() }
    }

    /// Add (or replace) an evaluated field.
    pub fn with(mut self, name: &str, value: V) -> Self {
        self.insert(name, Slot::Ready(Rc::new(value)));
        self
    }

    /// Add (or replace) a field computed on first access.
    pub fn with_lazy(mut self, name: &str, init: impl Fn() -> V + 'static) -> Self {
        self.insert(
            name,
            Slot::Lazy {
                cell: Rc::new(OnceCell::new()),
                init: Rc::new(init),
            },
        );
        self
    }

    fn insert(&mut self, name: &str, slot: Slot<V>) {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some((_, existing)) => *existing = slot,
            None => self.fields.push((name.to_string(), slot)),
        }
    }

    /// Value of a field, evaluating it if needed.
    pub fn get(&self, name: &str) -> Option<&V> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, slot)| slot.get())
    }

    /// Whether a field has been evaluated; `None` if it does not exist.
    pub fn is_evaluated(&self, name: &str) -> Option<bool> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, slot)| slot.is_evaluated())
    }

    /// Field names in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `(name, value)` pairs in order, evaluating every field.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.fields.iter().map(|(k, slot)| (k.as_str(), slot.get()))
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the record has no fields.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Detached handles to every field, sharing evaluation with this record.
    pub(crate) fn handles(&self) -> Vec<(String, FieldHandle<V>)> {
        self.fields
            .iter()
            .map(|(k, slot)| (k.clone(), FieldHandle(slot.clone())))
            .collect()
    }

    /// Lazily transform every field with `f`.
    pub fn map_fields<U: 'static>(&self, f: impl Fn(&V) -> U + Clone + 'static) -> Record<U>
    where
        V: 'static,
    {
        let mut out = Record::new();
        for (name, slot) in &self.fields {
            let slot = slot.clone();
            let f = f.clone();
            out = out.with_lazy(name, move || f(slot.get()));
        }
        out
    }
}

impl<V> Default for Record<V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<V> Clone for Record<V> {
    fn clone(&self) -> Self {
        Self {
            fields: self.fields.clone(),
        }
    }
}

impl<V> Project for Record<V> {
    fn has_field(&self, field: &Field) -> bool {
        match field {
            Field::Name(name) => self.fields.iter().any(|(k, _)| k == name),
            Field::Position(i) => *i < self.fields.len(),
        }
    }

    fn project(&self, fields: &[Field]) -> Self {
        let picked = fields
            .iter()
            .filter_map(|f| match f {
                Field::Name(name) => self.fields.iter().find(|(k, _)| k == name),
                Field::Position(i) => self.fields.get(*i),
            })
            .cloned()
            .collect();
        Self { fields: picked }
    }
}

impl<V: PartialEq> PartialEq for Record<V> {
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other.iter()).all(|(a, b)| a == b)
    }
}

impl<V: fmt::Debug> fmt::Debug for Record<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (name, slot) in &self.fields {
            match slot {
                Slot::Lazy { cell, .. } if cell.get().is_none() => map.entry(name, &"<lazy>"),
                _ => map.entry(name, slot.get()),
            };
        }
        map.finish()
    }
}

impl<V: Serialize> Serialize for Record<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (name, value) in self.iter() {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

struct RecordVisitor<V>(PhantomData<V>);

impl<'de, V: Deserialize<'de>> Visitor<'de> for RecordVisitor<V> {
    type Value = Record<V>;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "a map of field names to values")
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut record = Record::new();
        while let Some((name, value)) = access.next_entry::<String, V>()? {
            record = record.with(&name, value);
        }
        Ok(record)
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for Record<V> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_map(RecordVisitor(PhantomData))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_lazy_field_is_evaluated_once() {
        let calls = Rc::new(Cell::new(0));
        let counter = Rc::clone(&calls);
        let r = Record::new().with_lazy("x", move || {
            counter.set(counter.get() + 1);
            7
        });
        let copy = r.clone();
        assert_eq!(r.get("x"), Some(&7));
        assert_eq!(copy.get("x"), Some(&7));
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn test_projection_keeps_laziness_and_order() {
        let r = Record::new()
            .with("a", 1)
            .with_lazy("b", || 2)
            .with("c", 3);
        let p = r.project(&["c".into(), "b".into()]);
        assert_eq!(p.keys().collect::<Vec<_>>(), vec!["c", "b"]);
        assert_eq!(p.is_evaluated("b"), Some(false));
    }

    #[test]
    fn test_serialization_equals_eager_equivalent() {
        let lazy = Record::new().with("x", 1.0f32).with_lazy("y", || 2.0f32);
        let eager = Record::new().with("x", 1.0f32).with("y", 2.0f32);
        assert_eq!(
            bincode::serialize(&lazy).unwrap(),
            bincode::serialize(&eager).unwrap()
        );
        let back: Record<f32> = bincode::deserialize(&bincode::serialize(&lazy).unwrap()).unwrap();
        assert_eq!(back, eager);
    }

    #[test]
    fn test_vec_projection() {
        let v = vec![10, 20, 30];
        assert!(v.has_field(&Field::Position(2)));
        assert!(!v.has_field(&Field::Position(3)));
        assert_eq!(v.project(&[2.into(), 0.into()]), vec![30, 10]);
    }
}
