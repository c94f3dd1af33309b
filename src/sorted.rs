// (c) Copyright 2025 Mikołaj Kuranowski
// SPDX-License-Identifier: MIT

use std::cmp::Ordering;

/// Vector of elements kept sorted by a numeric key extracted from every element,
/// where no two elements may share a key.
///
/// Elements are immutable once inserted: adding an element with an existing
/// key is a no-op, the stored element is never overwritten.
#[derive(Debug, Clone)]
pub struct SortedUnique<T, F> {
    key: F,
    elements: Vec<T>,
}

impl<T, F: Fn(&T) -> i64> SortedUnique<T, F> {
    pub fn new(key: F) -> Self {
        Self {
            key,
            elements: Vec::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    /// Returns all elements, ordered by their keys.
    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }

    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        self.elements.iter()
    }

    fn search(&self, key: i64) -> Result<usize, usize> {
        self.elements.binary_search_by(|e| (self.key)(e).cmp(&key))
    }

    /// Retrieves the element with the provided key.
    pub fn get(&self, key: i64) -> Option<&T> {
        self.search(key).ok().map(|idx| &self.elements[idx])
    }

    pub fn contains(&self, key: i64) -> bool {
        self.search(key).is_ok()
    }

    /// Inserts the element, unless an element with the same key already exists.
    /// Returns true if the element was inserted.
    pub fn add(&mut self, element: T) -> bool {
        match self.search((self.key)(&element)) {
            Ok(_) => false,
            Err(idx) => {
                self.elements.insert(idx, element);
                true
            }
        }
    }

    /// Inserts all elements with keys not yet present, returning the elements which
    /// were actually inserted, in input order. Duplicates within `elements` are also
    /// skipped - only the first occurrence is inserted.
    pub fn add_all<I: IntoIterator<Item = T>>(&mut self, elements: I) -> Vec<T>
    where
        T: Clone,
    {
        let mut added = Vec::default();
        for element in elements {
            if self.add(element.clone()) {
                added.push(element);
            }
        }
        added
    }
}

/// Vector of elements kept sorted by a (possibly repeated) floating-point key.
/// Elements with equal keys are kept in insertion order.
#[derive(Debug, Clone)]
pub struct SortedVec<T, F> {
    key: F,
    elements: Vec<T>,
}

impl<T, F: Fn(&T) -> f64> SortedVec<T, F> {
    pub fn new(key: F) -> Self {
        Self {
            key,
            elements: Vec::default(),
        }
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn as_slice(&self) -> &[T] {
        &self.elements
    }

    /// Index of the first element with a key greater or equal to `key`.
    fn lower_bound(&self, key: f64) -> usize {
        self.elements
            .partition_point(|e| (self.key)(e).total_cmp(&key) == Ordering::Less)
    }

    /// Index of the first element with a key greater than `key`.
    fn upper_bound(&self, key: f64) -> usize {
        self.elements
            .partition_point(|e| (self.key)(e).total_cmp(&key) != Ordering::Greater)
    }

    pub fn add(&mut self, element: T) {
        let idx = self.upper_bound((self.key)(&element));
        self.elements.insert(idx, element);
    }

    /// Removes and returns the element with the lowest key.
    pub fn shift(&mut self) -> Option<T> {
        if self.elements.is_empty() {
            None
        } else {
            Some(self.elements.remove(0))
        }
    }

    /// Removes and returns the element with the highest key.
    pub fn pop(&mut self) -> Option<T> {
        self.elements.pop()
    }

    /// Removes the first element with the given key matching the predicate.
    pub fn remove_where<P: Fn(&T) -> bool>(&mut self, key: f64, predicate: P) -> Option<T> {
        let start = self.lower_bound(key);
        let end = self.upper_bound(key);
        let idx = (start..end).find(|&idx| predicate(&self.elements[idx]))?;
        Some(self.elements.remove(idx))
    }
}
