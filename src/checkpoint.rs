use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;

/// The three catalog sources. Fixed at seed time; a campaign is complete
/// only when all three report completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Source {
    Continente,
    PingoDoce,
    Auchan,
}

pub const SOURCES: [Source; 3] = [Source::Continente, Source::PingoDoce, Source::Auchan];

impl Source {
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Continente => "continente",
            Source::PingoDoce => "pingo_doce",
            Source::Auchan => "auchan",
        }
    }

    /// The store's own label products carry when no brand is recognized.
    pub fn house_brand(&self) -> &'static str {
        match self {
            Source::Continente => "continente",
            Source::PingoDoce => "pingo doce",
            Source::Auchan => "auchan",
        }
    }

    /// Store name as seeded in the database.
    pub fn store_name(&self) -> &'static str {
        self.house_brand()
    }
}

impl FromStr for Source {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "continente" => Ok(Source::Continente),
            "pingo_doce" | "pingo doce" => Ok(Source::PingoDoce),
            "auchan" => Ok(Source::Auchan),
            other => anyhow::bail!("unknown source '{}'", other),
        }
    }
}

/// On-disk checkpoint record. The key layout is a wire contract shared
/// with the collectors; see the per-source `*_categories_scraped` and
/// `*_subcategories_scraped` fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointState {
    #[serde(default)]
    pub continente_categories_scraped: Vec<String>,
    #[serde(default)]
    pub pingo_doce_categories_scraped: Vec<String>,
    #[serde(default)]
    pub auchan_categories_scraped: Vec<String>,
    #[serde(default)]
    pub database_url: String,
    #[serde(default)]
    pub scraper_init_time: String,
    #[serde(default)]
    pub scraped_items: u64,
    #[serde(default)]
    pub total_categories: BTreeMap<String, usize>,
    #[serde(default)]
    pub scraped_categories: BTreeMap<String, usize>,
    #[serde(default)]
    pub continente_subcategories_scraped: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub pingo_doce_subcategories_scraped: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub auchan_subcategories_scraped: BTreeMap<String, Vec<String>>,
}

impl CheckpointState {
    /// Fresh template for a new campaign.
    pub fn template() -> Self {
        let zeroes: BTreeMap<String, usize> = SOURCES
            .iter()
            .map(|s| (s.as_str().to_string(), 0))
            .collect();
        CheckpointState {
            continente_categories_scraped: Vec::new(),
            pingo_doce_categories_scraped: Vec::new(),
            auchan_categories_scraped: Vec::new(),
            database_url: String::new(),
            scraper_init_time: String::new(),
            scraped_items: 0,
            total_categories: zeroes.clone(),
            scraped_categories: zeroes,
            continente_subcategories_scraped: BTreeMap::new(),
            pingo_doce_subcategories_scraped: BTreeMap::new(),
            auchan_subcategories_scraped: BTreeMap::new(),
        }
    }

    fn categories_scraped(&self, source: Source) -> &Vec<String> {
        match source {
            Source::Continente => &self.continente_categories_scraped,
            Source::PingoDoce => &self.pingo_doce_categories_scraped,
            Source::Auchan => &self.auchan_categories_scraped,
        }
    }

    fn categories_scraped_mut(&mut self, source: Source) -> &mut Vec<String> {
        match source {
            Source::Continente => &mut self.continente_categories_scraped,
            Source::PingoDoce => &mut self.pingo_doce_categories_scraped,
            Source::Auchan => &mut self.auchan_categories_scraped,
        }
    }

    fn subcategories_scraped(&self, source: Source) -> &BTreeMap<String, Vec<String>> {
        match source {
            Source::Continente => &self.continente_subcategories_scraped,
            Source::PingoDoce => &self.pingo_doce_subcategories_scraped,
            Source::Auchan => &self.auchan_subcategories_scraped,
        }
    }

    fn subcategories_scraped_mut(&mut self, source: Source) -> &mut BTreeMap<String, Vec<String>> {
        match source {
            Source::Continente => &mut self.continente_subcategories_scraped,
            Source::PingoDoce => &mut self.pingo_doce_subcategories_scraped,
            Source::Auchan => &mut self.auchan_subcategories_scraped,
        }
    }
}

/// Durable progress record with exclusive write access for the run.
/// Every mutation rewrites the whole file — there are no partial updates.
pub struct CheckpointStore {
    path: PathBuf,
    pub state: CheckpointState,
}

impl CheckpointStore {
    /// Load the checkpoint, creating a fresh template if the file is
    /// missing. A corrupt file is a fatal initialization error.
    pub fn load(path: &Path) -> Result<Self> {
        let state = if path.exists() {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading checkpoint {}", path.display()))?;
            serde_json::from_str(&raw)
                .with_context(|| format!("parsing checkpoint {}", path.display()))?
        } else {
            info!("Checkpoint not found at {} — starting a new campaign", path.display());
            CheckpointState::template()
        };
        let store = CheckpointStore {
            path: path.to_path_buf(),
            state,
        };
        if !store.path.exists() {
            store.save()?;
        }
        Ok(store)
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, raw)
            .with_context(|| format!("writing checkpoint {}", self.path.display()))?;
        Ok(())
    }

    pub fn is_category_scraped(&self, source: Source, category: &str) -> bool {
        self.state
            .categories_scraped(source)
            .iter()
            .any(|c| c == category)
    }

    pub fn is_subcategory_scraped(&self, source: Source, category: &str, sub: &str) -> bool {
        self.state
            .subcategories_scraped(source)
            .get(category)
            .map(|subs| subs.iter().any(|s| s == sub))
            .unwrap_or(false)
    }

    /// Mark one sub-category complete. The category itself transitions to
    /// scraped only when every currently-known sub-category is complete.
    /// Called only after the corresponding batch commit succeeded.
    pub fn complete_subcategory(
        &mut self,
        source: Source,
        category: &str,
        sub: &str,
        known_subs: &[String],
    ) -> Result<()> {
        let subs = self
            .state
            .subcategories_scraped_mut(source)
            .entry(category.to_string())
            .or_default();
        if !subs.iter().any(|s| s == sub) {
            subs.push(sub.to_string());
        }

        let all_done =
            !known_subs.is_empty() && known_subs.iter().all(|k| subs.iter().any(|s| s == k));
        if all_done && !self.is_category_scraped(source, category) {
            self.state
                .categories_scraped_mut(source)
                .push(category.to_string());
        }
        self.recount(source);
        self.save()
    }

    /// Reconcile the checkpoint with a freshly-discovered taxonomy
    /// (category → sub-categories). Categories and sub-categories that no
    /// longer exist upstream are pruned, and category completion is
    /// recomputed — the only path on which progress can regress.
    pub fn sync_taxonomy(
        &mut self,
        source: Source,
        taxonomy: &BTreeMap<String, Vec<String>>,
    ) -> Result<()> {
        let scraped_subs = self.state.subcategories_scraped_mut(source);
        scraped_subs.retain(|cat, _| taxonomy.contains_key(cat));
        for (cat, subs) in scraped_subs.iter_mut() {
            let known = &taxonomy[cat];
            subs.retain(|s| known.contains(s));
        }

        let mut removed = Vec::new();
        let scraped_subs = self.state.subcategories_scraped(source).clone();
        self.state.categories_scraped_mut(source).retain(|cat| {
            let keep = match taxonomy.get(cat) {
                // Category vanished upstream.
                None => false,
                // A new sub-category appeared, or a completed one was pruned.
                Some(known) => {
                    let done = scraped_subs.get(cat).cloned().unwrap_or_default();
                    known.iter().all(|k| done.iter().any(|d| d == k))
                }
            };
            if !keep {
                removed.push(cat.clone());
            }
            keep
        });
        if !removed.is_empty() {
            info!(
                "{}: {} categories regressed to unscraped after taxonomy sync",
                source.as_str(),
                removed.len()
            );
        }

        self.state
            .total_categories
            .insert(source.as_str().to_string(), taxonomy.len());
        self.recount(source);
        self.save()
    }

    fn recount(&mut self, source: Source) {
        let count = self.state.categories_scraped(source).len();
        self.state
            .scraped_categories
            .insert(source.as_str().to_string(), count);
    }

    /// True iff every source has scraped at least its total category count.
    pub fn is_run_complete(&self) -> bool {
        SOURCES.iter().all(|s| {
            let key = s.as_str();
            let scraped = self.state.scraped_categories.get(key).copied().unwrap_or(0);
            let total = self.state.total_categories.get(key).copied().unwrap_or(0);
            scraped >= total
        })
    }

    pub fn add_scraped_items(&mut self, count: u64) -> Result<()> {
        self.state.scraped_items += count;
        self.save()
    }

    /// Return the campaign's database path, creating a timestamped one and
    /// stamping the run start time on first use.
    pub fn ensure_database_path(&mut self, data_dir: &Path) -> Result<PathBuf> {
        if self.state.database_url.is_empty() {
            let stamp = Utc::now().format("%Y-%m-%d_%H-%M-%S");
            let path = data_dir.join(format!("products_{stamp}.sqlite"));
            self.state.database_url = path.to_string_lossy().into_owned();
            if self.state.scraper_init_time.is_empty() {
                self.state.scraper_init_time = Utc::now().to_rfc3339();
            }
            self.save()?;
        }
        Ok(PathBuf::from(&self.state.database_url))
    }

    /// Reset to a fresh template once all sources report full completion,
    /// so a new campaign can begin.
    pub fn reset(&mut self) -> Result<()> {
        self.state = CheckpointState::template();
        self.save()
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> (tempfile::TempDir, CheckpointStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = CheckpointStore::load(&dir.path().join("progress.json")).unwrap();
        (dir, store)
    }

    fn subs(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn template_round_trips() {
        let (dir, store) = store();
        drop(store);
        let reloaded = CheckpointStore::load(&dir.path().join("progress.json")).unwrap();
        assert_eq!(reloaded.state.scraped_items, 0);
        assert_eq!(reloaded.state.total_categories.len(), 3);
        assert!(reloaded.state.continente_categories_scraped.is_empty());
    }

    #[test]
    fn category_completes_when_all_known_subs_done() {
        let (_dir, mut store) = store();
        let known = subs(&["arroz", "massas"]);

        store
            .complete_subcategory(Source::Auchan, "mercearia", "arroz", &known)
            .unwrap();
        assert!(!store.is_category_scraped(Source::Auchan, "mercearia"));
        assert!(store.is_subcategory_scraped(Source::Auchan, "mercearia", "arroz"));

        store
            .complete_subcategory(Source::Auchan, "mercearia", "massas", &known)
            .unwrap();
        assert!(store.is_category_scraped(Source::Auchan, "mercearia"));
        assert_eq!(store.state.scraped_categories["auchan"], 1);
    }

    #[test]
    fn completion_is_monotonic_without_taxonomy_changes() {
        let (_dir, mut store) = store();
        let known = subs(&["arroz"]);
        let mut last = 0;
        for sub in ["arroz", "arroz", "arroz"] {
            store
                .complete_subcategory(Source::Continente, "mercearia", sub, &known)
                .unwrap();
            let count = store.state.scraped_categories["continente"];
            assert!(count >= last);
            last = count;
        }
        assert_eq!(last, 1);
    }

    #[test]
    fn sync_prunes_and_regresses() {
        let (_dir, mut store) = store();
        let known = subs(&["arroz", "massas"]);
        store
            .complete_subcategory(Source::Continente, "mercearia", "arroz", &known)
            .unwrap();
        store
            .complete_subcategory(Source::Continente, "mercearia", "massas", &known)
            .unwrap();
        assert!(store.is_category_scraped(Source::Continente, "mercearia"));

        // Upstream drops "massas" and adds "farinhas": category regresses.
        let mut taxonomy = BTreeMap::new();
        taxonomy.insert("mercearia".to_string(), subs(&["arroz", "farinhas"]));
        store.sync_taxonomy(Source::Continente, &taxonomy).unwrap();

        assert!(!store.is_category_scraped(Source::Continente, "mercearia"));
        assert!(store.is_subcategory_scraped(Source::Continente, "mercearia", "arroz"));
        assert!(!store.is_subcategory_scraped(Source::Continente, "mercearia", "massas"));
        assert_eq!(store.state.total_categories["continente"], 1);

        // A vanished category is pruned entirely.
        store.sync_taxonomy(Source::Continente, &BTreeMap::new()).unwrap();
        assert!(store.state.continente_subcategories_scraped.is_empty());
    }

    #[test]
    fn run_completion_requires_all_sources() {
        let (_dir, mut store) = store();
        for (source, total) in [("continente", 2), ("pingo_doce", 1), ("auchan", 1)] {
            store.state.total_categories.insert(source.into(), total);
        }
        store.state.scraped_categories.insert("continente".into(), 2);
        store.state.scraped_categories.insert("pingo_doce".into(), 1);
        store.state.scraped_categories.insert("auchan".into(), 0);
        assert!(!store.is_run_complete());

        store.state.scraped_categories.insert("auchan".into(), 1);
        assert!(store.is_run_complete());
    }

    #[test]
    fn database_path_is_stable_within_campaign() {
        let (dir, mut store) = store();
        let p1 = store.ensure_database_path(dir.path()).unwrap();
        let p2 = store.ensure_database_path(dir.path()).unwrap();
        assert_eq!(p1, p2);
        assert!(!store.state.scraper_init_time.is_empty());
    }

    #[test]
    fn reset_restores_template() {
        let (_dir, mut store) = store();
        store.add_scraped_items(42).unwrap();
        store.state.database_url = "somewhere.sqlite".into();
        store.reset().unwrap();
        assert_eq!(store.state.scraped_items, 0);
        assert!(store.state.database_url.is_empty());
        assert!(store.state.scraper_init_time.is_empty());
    }
}
