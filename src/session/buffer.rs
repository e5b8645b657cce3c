use regex::Regex;

/// Result of a successful expect: which pattern fired and the text around it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    pub index: usize,
    /// Text received before the match.
    pub before: String,
    /// The matched text itself.
    pub after: String,
}

/// Accumulates incoming session text until a pattern consumes it.
#[derive(Debug, Default)]
pub struct ExpectBuffer {
    data: String,
}

impl ExpectBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &str) {
        self.data.push_str(chunk);
    }

    /// Earliest match among `patterns`; ties go to the lower index.
    pub fn find(&mut self, patterns: &[Regex]) -> Option<Match> {
        let mut best: Option<(usize, usize, usize)> = None;
        for (index, re) in patterns.iter().enumerate() {
            if let Some(m) = re.find(&self.data) {
                if best.map_or(true, |(start, _, _)| m.start() < start) {
                    best = Some((m.start(), m.end(), index));
                }
            }
        }
        let (start, end, index) = best?;
        let before = self.data[..start].to_string();
        let after = self.data[start..end].to_string();
        self.data.drain(..end);
        Some(Match { index, before, after })
    }

    /// Up to the last `max` bytes of unconsumed text.
    pub fn tail(&self, max: usize) -> String {
        let mut start = self.data.len().saturating_sub(max);
        while !self.data.is_char_boundary(start) {
            start += 1;
        }
        self.data[start..].to_string()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn clear(&mut self) {
        self.data.clear();
    }
}
