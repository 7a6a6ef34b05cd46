use polstate_types::{PolicyReader, RegistryValue};
use std::cell::RefCell;
use std::collections::HashMap;

type Location = (String, String);

fn location(key: &str, value: &str) -> Location {
    (
        key.trim_matches('\\').to_lowercase(),
        value.to_lowercase(),
    )
}

#[derive(Default)]
struct Memo {
    contains: HashMap<Location, bool>,
    values: HashMap<Location, Option<RegistryValue>>,
    deletes: HashMap<Location, bool>,
    names: HashMap<String, Vec<String>>,
}

/// Memoizes reads of an underlying source for the span of one evaluation.
///
/// Lookups are keyed case-insensitively. The cache never sees writes, so it must
/// not outlive the pass it was created for.
pub struct CachedReader<'a, R: PolicyReader + ?Sized> {
    inner: &'a R,
    memo: RefCell<Memo>,
}

impl<'a, R: PolicyReader + ?Sized> CachedReader<'a, R> {
    pub fn new(inner: &'a R) -> Self {
        Self {
            inner,
            memo: RefCell::new(Memo::default()),
        }
    }

    /// Drop everything cached so far.
    pub fn reset(&self) {
        *self.memo.borrow_mut() = Memo::default();
    }
}

impl<R: PolicyReader + ?Sized> PolicyReader for CachedReader<'_, R> {
    fn contains_value(&self, key: &str, value: &str) -> bool {
        let loc = location(key, value);
        if let Some(hit) = self.memo.borrow().contains.get(&loc) {
            return *hit;
        }
        let result = self.inner.contains_value(key, value);
        self.memo.borrow_mut().contains.insert(loc, result);
        result
    }

    fn get_value(&self, key: &str, value: &str) -> Option<RegistryValue> {
        let loc = location(key, value);
        if let Some(hit) = self.memo.borrow().values.get(&loc) {
            return hit.clone();
        }
        let result = self.inner.get_value(key, value);
        self.memo.borrow_mut().values.insert(loc, result.clone());
        result
    }

    fn will_delete_value(&self, key: &str, value: &str) -> bool {
        let loc = location(key, value);
        if let Some(hit) = self.memo.borrow().deletes.get(&loc) {
            return *hit;
        }
        let result = self.inner.will_delete_value(key, value);
        self.memo.borrow_mut().deletes.insert(loc, result);
        result
    }

    fn value_names(&self, key: &str) -> Vec<String> {
        let loc = key.trim_matches('\\').to_lowercase();
        if let Some(hit) = self.memo.borrow().names.get(&loc) {
            return hit.clone();
        }
        let result = self.inner.value_names(key);
        self.memo.borrow_mut().names.insert(loc, result.clone());
        result
    }
}
