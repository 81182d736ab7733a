use serde::Serialize;
use std::collections::HashMap;
use tracing::debug;

use crate::model::{CategorizationRule, CategoryBucket, FileRecord, UNCATEGORIZED};

/// Files bucketed by category label.
///
/// Buckets appear in the order of the first rule owning each label, with
/// `Uncategorized` last. Labels no file matched are absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Categorization {
    pub buckets: Vec<CategoryBucket>,
}

impl Categorization {
    pub fn get(&self, name: &str) -> Option<&CategoryBucket> {
        self.buckets.iter().find(|b| b.name == name)
    }

    pub fn category_of(&self, record: &FileRecord) -> Option<&str> {
        self.buckets
            .iter()
            .find(|b| b.files.iter().any(|f| f.path == record.path))
            .map(|b| b.name.as_str())
    }

    pub fn counts(&self) -> Vec<(String, usize)> {
        self.buckets
            .iter()
            .map(|b| (b.name.clone(), b.files.len()))
            .collect()
    }

    pub fn total_files(&self) -> usize {
        self.buckets.iter().map(|b| b.files.len()).sum()
    }
}

/// Assign every record to the category of the first rule whose pattern
/// occurs in its file name. Pure: same inputs, same output.
pub fn categorize(records: &[FileRecord], rules: &[CategorizationRule]) -> Categorization {
    let mut rank: HashMap<&str, usize> = HashMap::new();
    for (position, rule) in rules.iter().enumerate() {
        rank.entry(rule.category.as_str()).or_insert(position);
    }

    let mut buckets: Vec<CategoryBucket> = Vec::new();
    let mut bucket_index: HashMap<String, usize> = HashMap::new();

    for record in records {
        let file_name = record.file_name();
        let label = rules
            .iter()
            .find(|rule| rule.matches(&file_name))
            .map(|rule| rule.category.as_str())
            .unwrap_or(UNCATEGORIZED);

        let index = *bucket_index.entry(label.to_string()).or_insert_with(|| {
            buckets.push(CategoryBucket {
                name: label.to_string(),
                files: Vec::new(),
            });
            buckets.len() - 1
        });
        buckets[index].files.push(record.clone());
    }

    buckets.sort_by_key(|b| rank.get(b.name.as_str()).copied().unwrap_or(usize::MAX));

    debug!(
        "Categorized {} files into {} buckets using {} rules",
        records.len(),
        buckets.len(),
        rules.len()
    );
    Categorization { buckets }
}
