use log::{debug, warn};
use rand::Rng;
use std::collections::{HashMap, HashSet};

/// Color class used when no palette is configured
pub const FALLBACK_COLOR: &str = "text-gray-600";

/// Pre-approved replacement usernames plus the ones already handed out
#[derive(Debug, Clone, Default)]
pub struct ReplacementPool {
    candidates: Vec<String>,
    used: HashSet<String>,
}

impl ReplacementPool {
    pub fn new(candidates: Vec<String>) -> Self {
        Self {
            candidates,
            used: HashSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn used_count(&self) -> usize {
        self.used.len()
    }

    pub fn is_exhausted(&self) -> bool {
        self.used.len() >= self.candidates.len()
    }

    /// Hand out the first unused candidate. Once every candidate is used,
    /// a uniformly random one is returned without being marked, so distinct
    /// originals may share a replacement from then on. With no candidates
    /// the fallback is returned as-is.
    pub fn allocate(&mut self, fallback: &str) -> String {
        if self.candidates.is_empty() {
            return fallback.to_string();
        }

        if let Some(candidate) = self.candidates.iter().find(|c| !self.used.contains(*c)) {
            let candidate = candidate.clone();
            self.used.insert(candidate.clone());
            return candidate;
        }

        let idx = rand::rng().random_range(0..self.candidates.len());
        debug!("Replacement pool exhausted, reusing '{}'", self.candidates[idx]);
        self.candidates[idx].clone()
    }

    /// Swap in a new candidate list, keeping only used entries still present
    pub fn replace_candidates(&mut self, candidates: Vec<String>) {
        self.used.retain(|u| candidates.contains(u));
        self.candidates = candidates;
    }
}

/// Stable mapping from observed usernames to replacement usernames
#[derive(Debug, Clone, Default)]
pub struct IdentityMapper {
    pool: ReplacementPool,
    mappings: HashMap<String, String>,
}

impl IdentityMapper {
    pub fn new(pool: ReplacementPool) -> Self {
        Self {
            pool,
            mappings: HashMap::new(),
        }
    }

    pub fn with_candidates(candidates: Vec<String>) -> Self {
        Self::new(ReplacementPool::new(candidates))
    }

    /// Normalized form used as the mapping key
    pub fn normalize(name: &str) -> String {
        name.trim().to_lowercase()
    }

    /// Resolve an original username to its replacement, allocating on first sight
    pub fn resolve(&mut self, original: &str) -> String {
        let key = Self::normalize(original);
        if key.is_empty() {
            return original.to_string();
        }

        if let Some(existing) = self.mappings.get(&key) {
            return existing.clone();
        }

        if self.pool.is_exhausted() && !self.pool.is_empty() {
            warn!("No unused replacement left for '{}', reusing a random one", key);
        }

        let mapped = self.pool.allocate(original);
        debug!("Mapped username '{}' -> '{}'", key, mapped);
        self.mappings.insert(key, mapped.clone());
        mapped
    }

    pub fn get(&self, original: &str) -> Option<&str> {
        self.mappings.get(&Self::normalize(original)).map(String::as_str)
    }

    pub fn mapped_count(&self) -> usize {
        self.mappings.len()
    }

    pub fn pool(&self) -> &ReplacementPool {
        &self.pool
    }

    /// Install a freshly loaded replacement list; existing mappings are kept
    pub fn set_candidates(&mut self, candidates: Vec<String>) {
        self.pool.replace_candidates(candidates);
    }
}

/// First-seen random color assignment, stable per username
#[derive(Debug, Clone, Default)]
pub struct ColorTable {
    palette: Vec<String>,
    assigned: HashMap<String, String>,
}

impl ColorTable {
    pub fn new(palette: Vec<String>) -> Self {
        Self {
            palette,
            assigned: HashMap::new(),
        }
    }

    pub fn ensure(&mut self, username: &str) -> &str {
        if !self.assigned.contains_key(username) {
            let color = if self.palette.is_empty() {
                FALLBACK_COLOR.to_string()
            } else {
                let idx = rand::rng().random_range(0..self.palette.len());
                self.palette[idx].clone()
            };
            self.assigned.insert(username.to_string(), color);
        }
        self.assigned
            .get(username)
            .map(String::as_str)
            .unwrap_or(FALLBACK_COLOR)
    }

    pub fn color_for(&self, username: &str) -> Option<&str> {
        self.assigned.get(username).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assigned.is_empty()
    }
}
