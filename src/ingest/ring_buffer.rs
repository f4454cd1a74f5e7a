use std::collections::VecDeque;

/// Fixed-capacity buffer that evicts the oldest item on overflow.
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    items: VecDeque<T>,
    capacity: usize,
}

impl<T: Clone> RingBuffer<T> {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append `item`, returning the evicted oldest item when full.
    pub fn push(&mut self, item: T) -> Option<T> {
        let evicted = if self.items.len() == self.capacity {
            self.items.pop_front()
        } else {
            None
        };
        self.items.push_back(item);
        evicted
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.iter()
    }

    /// Copy of the contents, oldest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.items.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ring_buffer_keeps_last_items_in_order() {
        let mut buffer = RingBuffer::new(100);
        for i in 0..250 {
            buffer.push(i);
        }

        assert_eq!(buffer.len(), 100);
        assert_eq!(buffer.to_vec(), (150..250).collect::<Vec<_>>());
    }

    #[test]
    fn test_push_reports_eviction() {
        let mut buffer = RingBuffer::new(2);
        assert_eq!(buffer.push('a'), None);
        assert_eq!(buffer.push('b'), None);
        assert_eq!(buffer.push('c'), Some('a'));
        assert_eq!(buffer.iter().copied().collect::<String>(), "bc");
    }

    #[test]
    fn test_zero_capacity_is_raised_to_one() {
        let mut buffer = RingBuffer::new(0);
        buffer.push(1);
        buffer.push(2);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.to_vec(), vec![2]);
    }
}
