//! Bounded top-k selection.
//!
//! [`BoundedTopK`] keeps the k smallest elements of a stream in a binary
//! max-heap whose root is the current k-th smallest element. Offers are
//! O(log k); positional reads sort the buffer once and reuse the result
//! until the next offer.
//!
//! [`SharedTopK`] wraps it for concurrent producers.

use parking_lot::Mutex;

use crate::error::{Result, ValidationError};

/// Selects the k smallest elements offered so far.
///
/// Ties are resolved by the element's full `Ord`, so for
/// [`Candidate`](super::Candidate) an equal distance is decided by tuple id.
#[derive(Debug, Clone)]
pub struct BoundedTopK<T: Ord> {
    k: usize,
    heap: Vec<T>,
    added: u64,
    sorted: bool,
}

impl<T: Ord> BoundedTopK<T> {
    /// Creates a selection of capacity `k`.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::InvalidField` if `k` is 0.
    pub fn new(k: usize) -> Result<Self> {
        if k == 0 {
            return Err(ValidationError::invalid_field("k", "must be greater than 0").into());
        }
        Ok(Self {
            k,
            heap: Vec::with_capacity(k),
            added: 0,
            sorted: true,
        })
    }

    /// Capacity.
    #[inline]
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of retained elements, `min(k, added)`.
    #[inline]
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Returns true if nothing has been offered yet.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    /// Total number of offers, retained or not.
    #[inline]
    pub fn added(&self) -> u64 {
        self.added
    }

    /// Offers an element.
    pub fn offer(&mut self, element: T) {
        self.added += 1;
        if self.heap.len() < self.k {
            self.sorted = false;
            self.heap.push(element);
            if self.heap.len() == self.k {
                self.heapify();
            }
        } else if element < self.heap[0] {
            self.sorted = false;
            self.heap[0] = element;
            self.sift_down(0);
        }
    }

    /// Offers every element of an iterator.
    pub fn offer_all(&mut self, elements: impl IntoIterator<Item = T>) {
        for element in elements {
            self.offer(element);
        }
    }

    /// The current k-th smallest element.
    ///
    /// `None` until k elements have been offered.
    pub fn peek(&self) -> Option<&T> {
        if self.heap.len() < self.k {
            return None;
        }
        self.heap.first()
    }

    /// The i-th smallest element seen so far (0 is the smallest).
    ///
    /// # Errors
    ///
    /// Returns `ValidationError::IndexOutOfRange` if `i >= len()`.
    pub fn get(&mut self, i: usize) -> Result<&T> {
        let len = self.heap.len();
        if i >= len {
            return Err(ValidationError::out_of_range(i, len).into());
        }
        if i == self.k - 1 {
            return Ok(&self.heap[0]);
        }
        if !self.sorted {
            self.sort();
        }
        Ok(&self.heap[len - 1 - i])
    }

    /// Drains the retained elements in ascending order.
    pub fn into_sorted_vec(mut self) -> Vec<T> {
        if !self.sorted {
            self.sort();
        }
        self.heap.reverse();
        self.heap
    }

    fn heapify(&mut self) {
        let n = self.heap.len();
        for i in (0..n / 2).rev() {
            self.sift_down(i);
        }
    }

    fn sift_down(&mut self, mut i: usize) {
        let n = self.heap.len();
        loop {
            let left = 2 * i + 1;
            if left >= n {
                break;
            }
            let right = left + 1;
            let mut child = left;
            if right < n && self.heap[left] < self.heap[right] {
                child = right;
            }
            if self.heap[i] >= self.heap[child] {
                break;
            }
            self.heap.swap(i, child);
            i = child;
        }
    }

    // Shell sort (gaps 1, 4, 13, 40, ...) into descending order. A
    // descending array is still a valid max-heap, so offers may resume.
    fn sort(&mut self) {
        let n = self.heap.len();
        let mut gap = 1usize;
        while gap <= n {
            gap = gap * 3 + 1;
        }
        while gap > 1 {
            gap /= 3;
            for i in gap..n {
                let mut j = i;
                while j >= gap && self.heap[j - gap] < self.heap[j] {
                    self.heap.swap(j - gap, j);
                    j -= gap;
                }
            }
        }
        self.sorted = true;
    }
}

/// A [`BoundedTopK`] shared between threads.
///
/// Every offer runs inside one exclusive critical section, so the
/// at-most-k bound holds at every observable point.
#[derive(Debug)]
pub struct SharedTopK<T: Ord> {
    inner: Mutex<BoundedTopK<T>>,
}

impl<T: Ord> SharedTopK<T> {
    /// Creates a shared selection of capacity `k`.
    pub fn new(k: usize) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(BoundedTopK::new(k)?),
        })
    }

    /// Offers one element.
    pub fn offer(&self, element: T) {
        self.inner.lock().offer(element);
    }

    /// Offers a batch under a single lock acquisition.
    pub fn offer_all(&self, elements: impl IntoIterator<Item = T>) {
        self.inner.lock().offer_all(elements);
    }

    /// Number of retained elements.
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Returns true if nothing has been offered yet.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Total number of offers.
    pub fn added(&self) -> u64 {
        self.inner.lock().added()
    }

    /// Unwraps the selection.
    pub fn into_inner(self) -> BoundedTopK<T> {
        self.inner.into_inner()
    }

    /// Drains the retained elements in ascending order.
    pub fn into_sorted_vec(self) -> Vec<T> {
        self.into_inner().into_sorted_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Arc;

    #[test]
    fn test_zero_capacity_rejected() {
        let err = BoundedTopK::<u32>::new(0).unwrap_err();
        assert!(err.is_validation());
    }

    #[test]
    fn test_keeps_k_smallest() {
        let mut top = BoundedTopK::new(3).unwrap();
        top.offer_all([9, 4, 7, 1, 8, 3, 6]);
        assert_eq!(top.len(), 3);
        assert_eq!(top.added(), 7);
        assert_eq!(top.peek(), Some(&4));
        assert_eq!(top.into_sorted_vec(), vec![1, 3, 4]);
    }

    #[test]
    fn test_capacity_two() {
        let mut top = BoundedTopK::new(2).unwrap();
        top.offer_all([5.0f64, 1.0, 3.0].map(ordered));
        assert_eq!(top.len(), 2);
        assert_eq!(*top.get(0).unwrap(), ordered(1.0));
        assert_eq!(*top.get(1).unwrap(), ordered(3.0));
        assert!(top.get(2).unwrap_err().is_validation());
    }

    #[test]
    fn test_peek_none_until_full() {
        let mut top = BoundedTopK::new(3).unwrap();
        top.offer(10);
        top.offer(20);
        assert_eq!(top.peek(), None);
        top.offer(5);
        assert_eq!(top.peek(), Some(&20));
    }

    #[test]
    fn test_get_before_full() {
        let mut top = BoundedTopK::new(5).unwrap();
        top.offer_all([3, 1, 2]);
        assert_eq!(*top.get(0).unwrap(), 1);
        assert_eq!(*top.get(2).unwrap(), 3);
        assert!(top.get(3).is_err());
    }

    #[test]
    fn test_offer_after_get_keeps_heap_valid() {
        let mut top = BoundedTopK::new(4).unwrap();
        top.offer_all([40, 10, 30, 20]);
        assert_eq!(*top.get(1).unwrap(), 20);
        top.offer(15);
        top.offer(5);
        assert_eq!(top.peek(), Some(&20));
        assert_eq!(top.into_sorted_vec(), vec![5, 10, 15, 20]);
    }

    #[test]
    fn test_ties_broken_by_full_ordering() {
        let mut top = BoundedTopK::new(2).unwrap();
        top.offer_all([(1, 9), (1, 3), (1, 5), (0, 7)]);
        assert_eq!(top.into_sorted_vec(), vec![(0, 7), (1, 3)]);
    }

    #[test]
    fn test_shared_top_k_concurrent_offers() {
        let shared = Arc::new(SharedTopK::new(10).unwrap());
        std::thread::scope(|s| {
            for t in 0..4u32 {
                let shared = Arc::clone(&shared);
                s.spawn(move || {
                    for i in 0..250u32 {
                        shared.offer(i * 4 + t);
                    }
                });
            }
        });
        let shared = Arc::try_unwrap(shared).unwrap();
        assert_eq!(shared.added(), 1000);
        assert_eq!(shared.into_sorted_vec(), (0..10).collect::<Vec<u32>>());
    }

    fn ordered(v: f64) -> u64 {
        v.to_bits()
    }

    proptest! {
        #[test]
        fn prop_retains_exactly_k_smallest(
            values in prop::collection::vec(any::<i32>(), 0..200),
            k in 1usize..20,
        ) {
            let mut top = BoundedTopK::new(k).unwrap();
            for (i, v) in values.iter().enumerate() {
                top.offer((*v, i));
            }
            prop_assert_eq!(top.len(), values.len().min(k));

            let mut expected: Vec<(i32, usize)> =
                values.iter().copied().enumerate().map(|(i, v)| (v, i)).collect();
            expected.sort();
            expected.truncate(k);
            prop_assert_eq!(top.into_sorted_vec(), expected);
        }

        #[test]
        fn prop_get_matches_sorted_order(
            values in prop::collection::vec(0u16..1000, 1..100),
            k in 1usize..30,
        ) {
            let mut top = BoundedTopK::new(k).unwrap();
            top.offer_all(values.iter().copied());
            let mut expected = values.clone();
            expected.sort_unstable();
            expected.truncate(k);
            for (i, v) in expected.iter().enumerate() {
                prop_assert_eq!(top.get(i).unwrap(), v);
            }
        }
    }
}
