/// Outcome of feeding one "already exists" into the resolver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CollisionDecision {
    /// Try again with this name
    Retry(String),
    /// Retry budget spent; `attempts` is the final attempt count
    Exhausted { attempts: u32 },
}

/// Turns a base index name into a bounded sequence of salted candidates.
///
/// Attempt 0 uses the base name unmodified; attempt `k >= 1` uses
/// `base + salt + k`. Past `max_retries` salted attempts the resolver gives
/// up for good.
#[derive(Debug, Clone)]
pub struct CollisionResolver {
    base: String,
    salt: String,
    max_retries: u16,
    attempt_count: u32,
    candidate: String,
}

impl CollisionResolver {
    pub fn new(base: impl Into<String>, salt: impl Into<String>, max_retries: u16) -> Self {
        let base = base.into();
        Self {
            candidate: base.clone(),
            base,
            salt: salt.into(),
            max_retries,
            attempt_count: 0,
        }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn candidate(&self) -> &str {
        &self.candidate
    }

    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempt_count > u32::from(self.max_retries)
    }

    /// Once exhausted the count stays put, even for `u16::MAX` retries.
    pub fn on_collision(&mut self) -> CollisionDecision {
        if !self.is_exhausted() {
            self.attempt_count += 1;
        }
        if self.is_exhausted() {
            return CollisionDecision::Exhausted {
                attempts: self.attempt_count,
            };
        }
        self.candidate = format!("{}{}{}", self.base, self.salt, self.attempt_count);
        CollisionDecision::Retry(self.candidate.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_first_candidate_is_base() {
        let resolver = CollisionResolver::new("BUCKET/photos", "index_salt_", 20);
        assert_eq!(resolver.candidate(), "BUCKET/photos");
        assert_eq!(resolver.attempt_count(), 0);
    }

    #[test]
    fn test_salted_candidates_are_numbered() {
        let mut resolver = CollisionResolver::new("BUCKET/X", "index_salt_", 20);
        for k in 1..=3 {
            assert_eq!(
                resolver.on_collision(),
                CollisionDecision::Retry(format!("BUCKET/Xindex_salt_{}", k))
            );
        }
        assert_eq!(resolver.candidate(), "BUCKET/Xindex_salt_3");
        assert_eq!(resolver.attempt_count(), 3);
    }

    #[test]
    fn test_budget_is_bounded_and_candidates_distinct() {
        let mut resolver = CollisionResolver::new("b", "_s", 5);
        let mut seen = HashSet::new();
        seen.insert(resolver.candidate().to_string());

        let mut retries = 0;
        loop {
            match resolver.on_collision() {
                CollisionDecision::Retry(name) => {
                    assert!(seen.insert(name));
                    retries += 1;
                }
                CollisionDecision::Exhausted { attempts } => {
                    assert_eq!(attempts, 6);
                    break;
                }
            }
        }
        assert_eq!(retries, 5);
        assert!(resolver.is_exhausted());
    }

    #[test]
    fn test_zero_budget_gives_up_on_first_collision() {
        let mut resolver = CollisionResolver::new("b", "_s", 0);
        assert_eq!(
            resolver.on_collision(),
            CollisionDecision::Exhausted { attempts: 1 }
        );
    }

    #[test]
    fn test_largest_budget_still_gives_up() {
        let mut resolver = CollisionResolver::new("BUCKET/X", "index_salt_", u16::MAX);
        let mut seen = HashSet::new();
        let mut retries = 0u32;
        loop {
            match resolver.on_collision() {
                CollisionDecision::Retry(name) => {
                    assert!(seen.insert(name));
                    retries += 1;
                    assert!(retries <= u32::from(u16::MAX), "resolver never gave up");
                }
                CollisionDecision::Exhausted { attempts } => {
                    assert_eq!(attempts, u32::from(u16::MAX) + 1);
                    break;
                }
            }
        }
        assert_eq!(retries, u32::from(u16::MAX));
        assert_eq!(resolver.candidate(), "BUCKET/Xindex_salt_65535");

        // further collisions do not move the count
        assert_eq!(
            resolver.on_collision(),
            CollisionDecision::Exhausted { attempts: 65536 }
        );
        assert_eq!(resolver.attempt_count(), 65536);
    }
}
