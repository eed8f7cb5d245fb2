use std::sync::Arc;

/// Ordered access node list with a private rotation cursor.
///
/// Cloning shares the endpoint list but copies the cursor, so every worker
/// holding its own clone fails over independently.
#[derive(Debug, Clone)]
pub struct EndpointPool {
    endpoints: Arc<[String]>,
    cursor: usize,
}

impl EndpointPool {
    /// Returns `None` for an empty list.
    pub fn new(endpoints: Vec<String>) -> Option<Self> {
        if endpoints.is_empty() {
            return None;
        }
        Some(Self {
            endpoints: endpoints.into(),
            cursor: 0,
        })
    }

    pub fn current(&self) -> &str {
        &self.endpoints[self.cursor]
    }

    pub fn index(&self) -> usize {
        self.cursor
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    /// Moves to the next endpoint, wrapping to the first one.
    pub fn rotate(&mut self) -> &str {
        self.cursor = (self.cursor + 1) % self.endpoints.len();
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> EndpointPool {
        EndpointPool::new(vec!["A".into(), "B".into(), "C".into()]).unwrap()
    }

    #[test]
    fn empty_pool_is_refused() {
        assert!(EndpointPool::new(Vec::new()).is_none());
    }

    #[test]
    fn rotation_advances_and_wraps() {
        let mut pool = pool();
        assert_eq!(pool.current(), "A");
        assert_eq!(pool.rotate(), "B");
        assert_eq!(pool.index(), 1);
        pool.rotate();
        assert_eq!(pool.rotate(), "A");
        assert_eq!(pool.index(), 0);
    }

    #[test]
    fn clones_rotate_independently() {
        let mut first = pool();
        let second = first.clone();
        first.rotate();
        assert_eq!(first.current(), "B");
        assert_eq!(second.current(), "A");
    }

    #[test]
    fn single_endpoint_pool_stays_put() {
        let mut pool = EndpointPool::new(vec!["only".into()]).unwrap();
        assert_eq!(pool.rotate(), "only");
        assert_eq!(pool.len(), 1);
    }
}
