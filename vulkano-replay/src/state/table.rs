use super::MutateError;
use crate::Handle;
use foldhash::fast::RandomState;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::{hash::Hash, ops::Index};

/// A table of objects of one type, keyed by handle.
///
/// Iteration yields the objects in creation order.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    transparent,
    bound(
        serialize = "K: Serialize + Eq + Hash, V: Serialize",
        deserialize = "K: Deserialize<'de> + Eq + Hash, V: Deserialize<'de>",
    )
)]
pub struct ObjectTable<K, V> {
    inner: IndexMap<K, V, RandomState>,
}

impl<K, V> Default for ObjectTable<K, V> {
    #[inline]
    fn default() -> Self {
        ObjectTable {
            inner: IndexMap::default(),
        }
    }
}

impl<K: Handle, V> ObjectTable<K, V> {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the object with the given handle, if it exists.
    #[inline]
    pub fn get(&self, handle: &K) -> Option<&V> {
        self.inner.get(handle)
    }

    #[inline]
    pub fn get_mut(&mut self, handle: &K) -> Option<&mut V> {
        self.inner.get_mut(handle)
    }

    /// Returns the object with the given handle, or an error naming the missing handle.
    #[inline]
    pub fn require(&self, handle: &K) -> Result<&V, MutateError> {
        self.inner.get(handle).ok_or_else(|| MutateError::unknown(*handle))
    }

    #[inline]
    pub fn require_mut(&mut self, handle: &K) -> Result<&mut V, MutateError> {
        self.inner
            .get_mut(handle)
            .ok_or_else(|| MutateError::unknown(*handle))
    }

    #[inline]
    pub fn contains(&self, handle: &K) -> bool {
        self.inner.contains_key(handle)
    }

    /// Inserts an object, returning the object previously stored under the handle.
    #[inline]
    pub fn insert(&mut self, handle: K, object: V) -> Option<V> {
        self.inner.insert(handle, object)
    }

    /// Inserts an object under a handle that must not be in use.
    pub fn insert_new(&mut self, handle: K, object: V) -> Result<(), MutateError> {
        if handle.as_raw() == 0 || self.inner.contains_key(&handle) {
            return Err(MutateError::HandleInUse {
                type_name: K::TYPE_NAME,
                handle: handle.as_raw(),
            });
        }

        self.inner.insert(handle, object);

        Ok(())
    }

    /// Removes an object, preserving the order of the remaining ones.
    #[inline]
    pub fn remove(&mut self, handle: &K) -> Option<V> {
        self.inner.shift_remove(handle)
    }

    /// Removes an object that must exist.
    #[inline]
    pub fn remove_existing(&mut self, handle: &K) -> Result<V, MutateError> {
        self.inner
            .shift_remove(handle)
            .ok_or_else(|| MutateError::unknown(*handle))
    }

    /// Returns an iterator over all objects, in creation order.
    #[inline]
    pub fn iter(&self) -> impl ExactSizeIterator<Item = (&K, &V)> {
        self.inner.iter()
    }

    #[inline]
    pub fn keys(&self) -> impl ExactSizeIterator<Item = &K> {
        self.inner.keys()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<K: Handle, V> Index<K> for ObjectTable<K, V> {
    type Output = V;

    /// # Panics
    ///
    /// - Panics if there is no object with the handle.
    #[inline]
    #[track_caller]
    fn index(&self, handle: K) -> &V {
        match self.inner.get(&handle) {
            Some(object) => object,
            None => panic!("there is no {} {:?}", K::TYPE_NAME, handle),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ObjectTable;
    use crate::{image::Image, state::MutateError};

    #[test]
    fn insert_and_remove() {
        let mut table = ObjectTable::new();
        let a = Image::from_raw(1);
        let b = Image::from_raw(2);

        table.insert_new(a, "a").unwrap();
        table.insert_new(b, "b").unwrap();
        assert!(matches!(
            table.insert_new(a, "c"),
            Err(MutateError::HandleInUse { .. }),
        ));
        assert!(table.insert_new(Image::NULL, "null").is_err());

        assert_eq!(table[b], "b");
        assert_eq!(table.keys().copied().collect::<Vec<_>>(), [a, b]);

        assert_eq!(table.remove_existing(&a).unwrap(), "a");
        assert!(!table.contains(&a));
        assert!(table.remove_existing(&a).is_err());
        assert_eq!(table.get(&b), Some(&"b"));
    }

    #[test]
    #[should_panic(expected = "there is no Image")]
    fn index_missing() {
        let table: ObjectTable<Image, ()> = ObjectTable::new();
        let _ = &table[Image::from_raw(7)];
    }
}
