use std::collections::{HashMap, VecDeque};

/// Bounded least-recently-used map keyed by result id.
#[derive(Debug)]
pub(crate) struct DetailCache<V> {
    capacity: usize,
    entries: HashMap<String, V>,
    order: VecDeque<String>,
}

impl<V: Clone> DetailCache<V> {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub(crate) fn get(&mut self, id: &str) -> Option<V> {
        let value = self.entries.get(id)?.clone();
        self.touch(id);
        Some(value)
    }

    pub(crate) fn insert(&mut self, id: String, value: V) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.insert(id.clone(), value).is_some() {
            self.touch(&id);
            return;
        }
        self.order.push_back(id);

        while self.entries.len() > self.capacity {
            let Some(evicted) = self.order.pop_front() else {
                break;
            };
            self.entries.remove(&evicted);
        }
    }

    pub(crate) fn remove(&mut self, id: &str) {
        if self.entries.remove(id).is_some() {
            self.order.retain(|entry| entry != id);
        }
    }

    pub(crate) fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    fn touch(&mut self, id: &str) {
        if let Some(position) = self.order.iter().position(|entry| entry == id) {
            if let Some(entry) = self.order.remove(position) {
                self.order.push_back(entry);
            }
        }
    }
}
