//! Slot storage shared by a pipe's continuations.

use std::collections::HashMap;

use serde_json::Value;

/// The latest arguments and call context delivered into each slot.
///
/// Every fill overwrites the previous delivery for that slot; nothing
/// accumulates.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Slots {
    params: HashMap<String, Vec<Value>>,
    subjects: HashMap<String, Option<Value>>,
}

impl Slots {
    pub(crate) fn store(&mut self, slot: &str, args: Vec<Value>, subject: Option<Value>) {
        self.params.insert(slot.to_string(), args);
        self.subjects.insert(slot.to_string(), subject);
    }

    pub(crate) fn invalidate(&mut self, slot: &str) -> bool {
        self.subjects.remove(slot);
        self.params.remove(slot).is_some()
    }

    /// Arguments last delivered into `slot`.
    pub fn get(&self, slot: &str) -> Option<&[Value]> {
        self.params.get(slot).map(Vec::as_slice)
    }

    /// First argument last delivered into `slot`.
    pub fn first(&self, slot: &str) -> Option<&Value> {
        self.params.get(slot)?.first()
    }

    /// Call context last delivered into `slot`, if the filler carried one.
    pub fn subject(&self, slot: &str) -> Option<&Value> {
        self.subjects.get(slot)?.as_ref()
    }

    pub fn contains(&self, slot: &str) -> bool {
        self.params.contains_key(slot)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.params.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_store_overwrites() {
        let mut slots = Slots::default();
        slots.store("user", vec![json!(1)], None);
        slots.store("user", vec![json!(2), json!(3)], Some(json!("ctx")));
        assert_eq!(slots.get("user"), Some(&[json!(2), json!(3)][..]));
        assert_eq!(slots.first("user"), Some(&json!(2)));
        assert_eq!(slots.subject("user"), Some(&json!("ctx")));
        assert_eq!(slots.len(), 1);
    }

    #[test]
    fn test_invalidate_removes_both_maps() {
        let mut slots = Slots::default();
        slots.store("a", vec![], Some(json!(true)));
        assert!(slots.invalidate("a"));
        assert!(!slots.contains("a"));
        assert!(slots.subject("a").is_none());
        assert!(!slots.invalidate("a"));
    }
}
