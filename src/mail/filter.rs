/// Case-insensitive substring allow-list. An empty list allows nothing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    patterns: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            patterns: patterns
                .into_iter()
                .map(|p| p.as_ref().trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    pub fn matches(&self, candidate: &str) -> bool {
        let candidate = candidate.to_lowercase();
        self.patterns.iter().any(|p| candidate.contains(p.as_str()))
    }

    pub fn matches_any<'a, I>(&self, candidates: I) -> bool
    where
        I: IntoIterator<Item = &'a String>,
    {
        candidates.into_iter().any(|c| self.matches(c))
    }
}
