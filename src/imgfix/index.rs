use crate::imgfix::paths;
use std::collections::HashMap;

/// Lower-cased file name -> catalogue paths carrying that name, in
/// catalogue order.
#[derive(Debug, Clone, Default)]
pub struct CandidateIndex {
    by_name: HashMap<String, Vec<String>>,
}

impl CandidateIndex {
    pub fn build(catalogue: &[String]) -> Self {
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for entry in catalogue {
            let key = paths::file_name(entry).to_lowercase();
            if key.is_empty() {
                continue;
            }
            by_name.entry(key).or_default().push(entry.clone());
        }
        Self { by_name }
    }

    /// Candidates for the base name of `reference`; empty when unknown.
    pub fn lookup(&self, reference: &str) -> &[String] {
        let key = paths::file_name(reference).to_lowercase();
        self.by_name.get(&key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn names(&self) -> usize {
        self.by_name.len()
    }
}
