/// Round robin over a fixed list.
///
/// Every pick moves the cursor, including picks made by [`pick_matching`]
/// that end up rejected. That is why picking takes `&mut self`: a selector
/// belongs to one owner and is never shared without a lock.
///
/// [`pick_matching`]: CyclicSelector::pick_matching
#[derive(Clone, Debug)]
pub struct CyclicSelector<T> {
    items: Vec<T>,
    cursor: usize,
}

impl<T> CyclicSelector<T> {
    pub fn new(items: Vec<T>) -> Self {
        Self { items, cursor: 0 }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> &[T] {
        &self.items
    }

    /// Returns the element under the cursor and advances the cursor,
    /// wrapping after the last element.
    pub fn pick(&mut self) -> Option<&T> {
        let index = self.advance()?;
        self.items.get(index)
    }

    /// Picks until `predicate` accepts an element, giving up after one full
    /// cycle.
    pub fn pick_matching<P>(&mut self, mut predicate: P) -> Option<&T>
    where
        P: FnMut(&T) -> bool,
    {
        for _ in 0..self.items.len() {
            let index = self.advance()?;
            if predicate(&self.items[index]) {
                return self.items.get(index);
            }
        }
        None
    }

    fn advance(&mut self) -> Option<usize> {
        if self.items.is_empty() {
            return None;
        }
        let index = self.cursor;
        self.cursor = (index + 1) % self.items.len();
        Some(index)
    }
}

impl<T> Default for CyclicSelector<T> {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl<T> FromIterator<T> for CyclicSelector<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}
