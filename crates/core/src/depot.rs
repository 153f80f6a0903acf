use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt::{self, Debug, Formatter};

/// A typed, string-keyed bag scoped to a connection or a request.
///
/// The data model (§3) calls for two such bags: a connection-scoped "user-scoped key/value bag"
/// and, per request, metadata views handed to hooks and handlers. Both are plain `Depot`s — the
/// lifetime distinction comes from where the `Depot` is stored (on the [`crate::connection::Connection`]
/// vs. on the [`crate::context::Context`] passed into a single handler invocation), not from the type.
///
/// # Example
///
/// ```
/// use swill_core::Depot;
///
/// let mut depot = Depot::new();
/// depot.insert("user_id", 42u64);
/// assert_eq!(depot.get::<u64>("user_id").copied().unwrap_or_default(), 42);
/// ```
#[derive(Default)]
pub struct Depot {
    map: HashMap<String, Box<dyn Any + Send + Sync>>,
}

#[inline]
fn type_key<T: 'static>() -> String {
    format!("{:?}", TypeId::of::<T>())
}

impl Depot {
    /// Creates an empty `Depot`.
    #[inline]
    pub fn new() -> Depot {
        Depot { map: HashMap::new() }
    }

    /// Creates an empty `Depot` with the specified capacity.
    #[inline]
    pub fn with_capacity(capacity: usize) -> Self {
        Depot { map: HashMap::with_capacity(capacity) }
    }

    /// Returns the number of elements the depot can hold without reallocating.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.map.capacity()
    }

    /// Inject a value into the depot, keyed by its type.
    #[inline]
    pub fn inject<V: Any + Send + Sync>(&mut self, value: V) -> &mut Self {
        self.map.insert(type_key::<V>(), Box::new(value));
        self
    }

    /// Obtain a reference to a value previously injected into the depot.
    #[inline]
    pub fn obtain<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.get(&type_key::<T>())
    }

    /// Obtain a mutable reference to a value previously injected into the depot.
    #[inline]
    pub fn obtain_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.get_mut(&type_key::<T>())
    }

    /// Inserts a key-value pair into the depot.
    #[inline]
    pub fn insert<K, V>(&mut self, key: K, value: V) -> &mut Self
    where
        K: Into<String>,
        V: Any + Send + Sync,
    {
        self.map.insert(key.into(), Box::new(value));
        self
    }

    /// Check whether a value is stored in the depot under this key.
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    /// Check whether a value has been injected into the depot by type.
    #[inline]
    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.map.contains_key(&type_key::<T>())
    }

    /// Immutably borrows a value from the depot.
    #[inline]
    pub fn get<V: Any + Send + Sync>(&self, key: &str) -> Option<&V> {
        self.map.get(key).and_then(|value| value.downcast_ref::<V>())
    }

    /// Mutably borrows a value from the depot.
    #[inline]
    pub fn get_mut<V: Any + Send + Sync>(&mut self, key: &str) -> Option<&mut V> {
        self.map.get_mut(key).and_then(|value| value.downcast_mut::<V>())
    }

    /// Removes and returns a value, if it was present under this key.
    #[inline]
    pub fn remove<V: Any + Send + Sync>(&mut self, key: &str) -> Option<V> {
        self.map.remove(key).and_then(|value| value.downcast::<V>().ok()).map(|b| *b)
    }

    /// Delete the key from the depot; returns `false` if it was not present.
    #[inline]
    pub fn delete(&mut self, key: &str) -> bool {
        self.map.remove(key).is_some()
    }

    /// Remove and return a value previously injected by type.
    #[inline]
    pub fn scrape<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.remove(&type_key::<T>())
    }
}

impl Debug for Depot {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Depot").field("keys", &self.map.keys()).finish()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn insert_and_get_by_key() {
        let mut depot = Depot::with_capacity(6);
        assert!(depot.capacity() >= 6);

        depot.insert("one", "ONE".to_owned());
        assert!(depot.contains_key("one"));
        assert_eq!(depot.get::<String>("one").unwrap(), &"ONE".to_owned());
        *depot.get_mut::<String>("one").unwrap() = "TWO".to_owned();
        assert_eq!(depot.get::<String>("one").unwrap(), &"TWO".to_owned());
    }

    #[test]
    fn inject_and_obtain_by_type() {
        #[derive(Debug, PartialEq)]
        struct UserId(u64);

        let mut depot = Depot::new();
        assert!(!depot.contains::<UserId>());
        depot.inject(UserId(7));
        assert_eq!(depot.obtain::<UserId>(), Some(&UserId(7)));
        assert_eq!(depot.scrape::<UserId>(), Some(UserId(7)));
        assert!(!depot.contains::<UserId>());
    }
}
