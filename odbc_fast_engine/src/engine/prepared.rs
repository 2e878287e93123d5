use std::time::Instant;

/// One cached prepared statement. `driver_prepared` flips on first
/// execution; later executions through the same fingerprint are cache hits.
#[derive(Debug)]
pub struct PreparedEntry {
    pub stmt_id: u64,
    pub fingerprint: String,
    pub sql: String,
    /// Ordered parameter tags, learned on the first execution.
    pub param_schema: Option<Vec<u8>>,
    pub driver_prepared: bool,
    pub last_used: Instant,
}

impl PreparedEntry {
    pub fn new(stmt_id: u64, fingerprint: String, sql: String) -> Self {
        Self {
            stmt_id,
            fingerprint,
            sql,
            param_schema: None,
            driver_prepared: false,
            last_used: Instant::now(),
        }
    }
}

/// Statement fingerprint: whitespace-normalized SQL text. Literal case is
/// preserved, so `SELECT 'A'` and `SELECT 'a'` stay distinct.
pub fn fingerprint(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Per-connection LRU over prepared statements. Kept as an explicit ordered
/// list (front = least recently used) so eviction hands the victim back to
/// the caller, which must release its driver-side resources.
pub struct PreparedCache {
    entries: Vec<PreparedEntry>,
    capacity: usize,
}

impl PreparedCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity: capacity.max(1),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Looks up by fingerprint and promotes the entry to most recently used.
    pub fn get_promote(&mut self, fingerprint: &str) -> Option<&mut PreparedEntry> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.fingerprint == fingerprint)?;
        let mut entry = self.entries.remove(idx);
        entry.last_used = Instant::now();
        self.entries.push(entry);
        self.entries.last_mut()
    }

    /// Inserts as most recently used. Returns the evicted LRU entry when
    /// the cache was full; the caller closes its driver handle.
    pub fn insert(&mut self, entry: PreparedEntry) -> Option<PreparedEntry> {
        self.entries.push(entry);
        if self.entries.len() > self.capacity {
            Some(self.entries.remove(0))
        } else {
            None
        }
    }

    /// Empties the cache, returning every entry for driver-side cleanup.
    /// Used on disconnect and on connection-lost invalidation.
    pub fn clear(&mut self) -> Vec<PreparedEntry> {
        std::mem::take(&mut self.entries)
    }

    #[cfg(test)]
    fn fingerprints(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.fingerprint.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: u64, sql: &str) -> PreparedEntry {
        PreparedEntry::new(id, fingerprint(sql), sql.to_string())
    }

    #[test]
    fn test_fingerprint_collapses_whitespace() {
        assert_eq!(
            fingerprint("  SELECT   *\n  FROM\tt  "),
            "SELECT * FROM t"
        );
        assert_eq!(fingerprint("SELECT 1"), fingerprint("SELECT  1"));
        assert_ne!(fingerprint("SELECT 'a'"), fingerprint("SELECT 'A'"));
    }

    #[test]
    fn test_insert_and_promote() {
        let mut cache = PreparedCache::new(4);
        cache.insert(entry(1, "SELECT 1"));
        cache.insert(entry(2, "SELECT 2"));
        cache.insert(entry(3, "SELECT 3"));

        // Touch the oldest; it becomes most recently used.
        assert!(cache.get_promote("SELECT 1").is_some());
        assert_eq!(cache.fingerprints(), vec!["SELECT 2", "SELECT 3", "SELECT 1"]);
    }

    #[test]
    fn test_eviction_returns_least_recently_used() {
        let mut cache = PreparedCache::new(2);
        assert!(cache.insert(entry(1, "SELECT 1")).is_none());
        assert!(cache.insert(entry(2, "SELECT 2")).is_none());

        let evicted = cache.insert(entry(3, "SELECT 3")).unwrap();
        assert_eq!(evicted.stmt_id, 1);
        assert_eq!(cache.len(), 2);
        assert!(cache.get_promote("SELECT 1").is_none());
    }

    #[test]
    fn test_promotion_changes_eviction_victim() {
        let mut cache = PreparedCache::new(2);
        cache.insert(entry(1, "SELECT 1"));
        cache.insert(entry(2, "SELECT 2"));
        cache.get_promote("SELECT 1");

        let evicted = cache.insert(entry(3, "SELECT 3")).unwrap();
        assert_eq!(evicted.stmt_id, 2);
    }

    #[test]
    fn test_size_never_exceeds_capacity() {
        let mut cache = PreparedCache::new(3);
        for i in 0..10 {
            cache.insert(entry(i, &format!("SELECT {}", i)));
            assert!(cache.len() <= 3);
        }
    }

    #[test]
    fn test_clear_returns_all_entries() {
        let mut cache = PreparedCache::new(4);
        cache.insert(entry(1, "SELECT 1"));
        cache.insert(entry(2, "SELECT 2"));

        let removed = cache.clear();
        assert_eq!(removed.len(), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_zero_capacity_clamped_to_one() {
        let mut cache = PreparedCache::new(0);
        assert_eq!(cache.capacity(), 1);
        assert!(cache.insert(entry(1, "SELECT 1")).is_none());
        let evicted = cache.insert(entry(2, "SELECT 2")).unwrap();
        assert_eq!(evicted.stmt_id, 1);
    }

    #[test]
    fn test_schema_learned_once() {
        let mut cache = PreparedCache::new(2);
        cache.insert(entry(1, "SELECT ?"));
        let e = cache.get_promote("SELECT ?").unwrap();
        assert!(e.param_schema.is_none());
        e.param_schema = Some(vec![2]);
        assert!(!e.driver_prepared);
        e.driver_prepared = true;

        let e = cache.get_promote("SELECT ?").unwrap();
        assert_eq!(e.param_schema.as_deref(), Some(&[2u8][..]));
        assert!(e.driver_prepared);
    }
}
