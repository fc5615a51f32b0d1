use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::Result;
use serde::Deserialize;
use tracing::{info, warn};

/// Static reference data driving taxonomy reconciliation:
/// canonical name → legacy aliases, plus which sub-categories are valid
/// under which category.
#[derive(Debug, Default, Deserialize)]
pub struct CategoryMapping {
    #[serde(default)]
    pub category_mapping: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub sub_category_mapping: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub category_subcategory_relationships: BTreeMap<String, Vec<String>>,
}

/// Known bad (category, sub_category) pairs and their corrections,
/// applied after normalization in the post-pass.
const KNOWN_FIXES: &[(&str, &str, &str, &str)] = &[
    ("animais", "alimentação infantil", "bebé", "alimentação infantil"),
    (
        "animais",
        "desporto, atividades e viagem",
        "desporto e malas de viagem",
        "desporto, atividades e viagem",
    ),
    ("mercearia", "vegetariano e vegan", "bio, eco e saudável", "vegetariano e vegan"),
    ("congelados", "vegetariano e vegan", "bio, eco e saudável", "vegetariano e vegan"),
];

pub struct CategoryNormalizer {
    mapping: CategoryMapping,
    // legacy alias (lowercased) → canonical category
    reverse_category: BTreeMap<String, String>,
}

impl CategoryNormalizer {
    /// Load the mapping file. A missing or corrupt file degrades to empty
    /// maps: every record passes through unchanged and verification
    /// reports nothing.
    pub fn load(mapping_path: &Path) -> Self {
        let mapping = match read_mapping(mapping_path) {
            Ok(m) => {
                info!(
                    "Loaded {} category and {} sub-category mappings",
                    m.category_mapping.len(),
                    m.sub_category_mapping.len()
                );
                m
            }
            Err(e) => {
                warn!(
                    "Could not load category mapping {}: {} — operating with empty maps",
                    mapping_path.display(),
                    e
                );
                CategoryMapping::default()
            }
        };
        Self::from_mapping(mapping)
    }

    pub fn from_mapping(mapping: CategoryMapping) -> Self {
        let mut reverse_category = BTreeMap::new();
        for (canonical, aliases) in &mapping.category_mapping {
            for alias in aliases {
                reverse_category.insert(alias.to_lowercase(), canonical.clone());
            }
        }
        CategoryNormalizer {
            mapping,
            reverse_category,
        }
    }

    /// Reconcile a (category, sub_category) pair to the canonical taxonomy.
    /// Unmapped values pass through unchanged, which also makes the
    /// operation idempotent for already-canonical pairs.
    pub fn normalize(&self, category: &str, sub_category: &str) -> (String, String) {
        let canonical_category = self.normalize_category(category);
        let canonical_sub = self.normalize_sub_category(sub_category, &canonical_category);
        (canonical_category, canonical_sub)
    }

    fn normalize_category(&self, category: &str) -> String {
        if category.is_empty() {
            return String::new();
        }
        let lower = category.to_lowercase();
        if let Some(canonical) = self.reverse_category.get(&lower) {
            return canonical.clone();
        }
        // Containment match in either direction against every known alias.
        for (alias, canonical) in &self.reverse_category {
            if alias.contains(&lower) || lower.contains(alias.as_str()) {
                return canonical.clone();
            }
        }
        category.to_string()
    }

    fn normalize_sub_category(&self, sub_category: &str, canonical_category: &str) -> String {
        if sub_category.is_empty() || canonical_category.is_empty() {
            return sub_category.to_string();
        }

        // First pass: only sub-categories declared valid for the category.
        let valid = self
            .mapping
            .category_subcategory_relationships
            .get(canonical_category);
        if let Some(valid) = valid {
            for valid_sub in valid {
                if let Some(aliases) = self.mapping.sub_category_mapping.get(valid_sub) {
                    if aliases.iter().any(|a| sub_matches(sub_category, a)) {
                        return valid_sub.clone();
                    }
                }
            }
        }

        // Fallback: every known sub-category alias, regardless of validity.
        for (canonical_sub, aliases) in &self.mapping.sub_category_mapping {
            if aliases.iter().any(|a| sub_matches(sub_category, a)) {
                return canonical_sub.clone();
            }
        }

        sub_category.to_string()
    }

    /// Corrections for pairs the alias maps cannot disambiguate.
    pub fn apply_known_fixes(&self, category: &str, sub_category: &str) -> (String, String) {
        for (bad_cat, bad_sub, good_cat, good_sub) in KNOWN_FIXES {
            if category == *bad_cat && sub_category == *bad_sub {
                return ((*good_cat).to_string(), (*good_sub).to_string());
            }
        }
        (category.to_string(), sub_category.to_string())
    }

    /// Group the record set by (category, sub_category) and report every
    /// pair not listed as valid in the category → sub-categories relation.
    /// Diagnostic only; mutates nothing.
    pub fn verify_consistency(&self, records: &[ProductSample]) -> ConsistencyReport {
        let mut groups: BTreeMap<(String, String), Vec<&ProductSample>> = BTreeMap::new();
        for rec in records {
            groups
                .entry((rec.category.clone(), rec.sub_category.clone()))
                .or_default()
                .push(rec);
        }

        let mut entries = Vec::new();
        for ((category, sub_category), members) in &groups {
            let Some(valid) = self
                .mapping
                .category_subcategory_relationships
                .get(category)
            else {
                continue;
            };
            if valid.contains(sub_category) {
                continue;
            }

            let samples = members
                .iter()
                .take(10)
                .map(|r| SampleLine {
                    id: r.id,
                    name: truncate_name(&r.name),
                    price: r.primary_price,
                })
                .collect();
            let suggested: Vec<String> = self
                .mapping
                .category_subcategory_relationships
                .iter()
                .filter(|(_, subs)| subs.contains(sub_category))
                .map(|(cat, _)| cat.clone())
                .collect();

            entries.push(InconsistentPair {
                category: category.clone(),
                sub_category: sub_category.clone(),
                affected: members.len(),
                samples,
                suggested_categories: suggested,
            });
        }

        ConsistencyReport { entries }
    }
}

fn read_mapping(path: &Path) -> Result<CategoryMapping> {
    let raw = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&raw)?)
}

/// Case-insensitive match, exact or containment in either direction.
fn sub_matches(a: &str, b: &str) -> bool {
    if a.is_empty() || b.is_empty() {
        return false;
    }
    let a = a.to_lowercase();
    let b = b.to_lowercase();
    a == b || a.contains(&b) || b.contains(&a)
}

fn truncate_name(name: &str) -> String {
    if name.chars().count() > 50 {
        let head: String = name.chars().take(47).collect();
        format!("{head}...")
    } else {
        name.to_string()
    }
}

/// Projection of a stored product used by the consistency verifier.
#[derive(Debug, Clone)]
pub struct ProductSample {
    pub id: i64,
    pub category: String,
    pub sub_category: String,
    pub name: String,
    pub primary_price: f64,
}

#[derive(Debug, Clone)]
pub struct SampleLine {
    pub id: i64,
    pub name: String,
    pub price: f64,
}

#[derive(Debug, Clone)]
pub struct InconsistentPair {
    pub category: String,
    pub sub_category: String,
    pub affected: usize,
    pub samples: Vec<SampleLine>,
    pub suggested_categories: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct ConsistencyReport {
    pub entries: Vec<InconsistentPair>,
}

impl ConsistencyReport {
    pub fn is_consistent(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn total_affected(&self) -> usize {
        self.entries.iter().map(|e| e.affected).sum()
    }

    /// Plain-text rendering: header, one block per inconsistent pair with
    /// up to 10 sample rows and a correction hint, total footer.
    pub fn render(&self) -> String {
        if self.entries.is_empty() {
            return "All category-subcategory pairs are consistent!".to_string();
        }

        let mut out = String::new();
        out.push_str("Category Inconsistencies Report\n");
        out.push_str("============================\n\n");

        for entry in &self.entries {
            out.push_str(&format!(
                "{}: {} ({} products)\n",
                entry.category, entry.sub_category, entry.affected
            ));
            out.push_str("- ID | Name | Price\n");
            for s in &entry.samples {
                out.push_str(&format!("- {} | {} | {}\n", s.id, s.name, s.price));
            }
            if entry.suggested_categories.is_empty() {
                out.push_str(&format!(
                    "\nConsider adding '{}' to the '{}' category in your mapping\n",
                    entry.sub_category, entry.category
                ));
            } else {
                out.push_str(&format!(
                    "\nPossible correct categories for '{}': {}\n",
                    entry.sub_category,
                    entry.suggested_categories.join(", ")
                ));
            }
            out.push_str(&format!("\n{}\n\n", "-".repeat(50)));
        }

        out.push_str(&format!("\nTotal affected products: {}\n", self.total_affected()));
        out
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.render())?;
        Ok(())
    }
}

// ── Tests ──
