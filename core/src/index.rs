use crate::tokenizer::normalize_terms;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};

pub type Url = String;
pub type Term = String;

/// A crawled page as produced by a crawl worker. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRecord {
    pub url: Url,
    pub title: String,
    pub snippet: String,
    #[serde(default)]
    pub terms: BTreeSet<String>,
    #[serde(default)]
    pub out_links: Vec<Url>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub url: Url,
    pub title: String,
    pub snippet: String,
    /// Number of pages linking to `url`.
    pub relevance: u32,
}

/// Point-in-time copy of one replica, used for peer bootstrap and on-disk persistence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshot {
    pub pages: HashMap<Url, PageRecord>,
    pub index: HashMap<Term, HashSet<Url>>,
    pub backlinks: HashMap<Url, HashSet<Url>>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoreStats {
    pub term_count: usize,
    pub page_count: usize,
    pub backlink_entry_count: usize,
}

/// One full copy of the index: page metadata, inverted index, backlink graph.
///
/// Each map is sharded and locked per key, so concurrent ingestion from
/// several crawl workers and reads from the gateway need no outer lock.
/// Invariants spanning several keys converge eventually.
#[derive(Default)]
pub struct IndexStore {
    pages: DashMap<Url, PageRecord>,
    index: DashMap<Term, HashSet<Url>>,
    backlinks: DashMap<Url, HashSet<Url>>,
}

impl IndexStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: StateSnapshot) -> Self {
        let store = Self::new();
        store.merge_snapshot(snapshot);
        store
    }

    /// Upsert a page. Re-ingesting a URL replaces its record and prunes the
    /// index and backlink entries only the previous version contributed.
    pub fn add_document(&self, page: PageRecord) {
        let url = page.url.clone();
        let terms: HashSet<Term> = normalize_terms(&page.terms).into_iter().collect();
        let links: HashSet<&Url> = page.out_links.iter().collect();

        for term in &terms {
            self.index.entry(term.clone()).or_default().insert(url.clone());
        }
        for link in &links {
            self.backlinks
                .entry((*link).clone())
                .or_default()
                .insert(url.clone());
        }
        let new_links: HashSet<Url> = links.into_iter().cloned().collect();

        let Some(previous) = self.pages.insert(url.clone(), page) else {
            tracing::debug!(%url, terms = terms.len(), links = new_links.len(), "document added");
            return;
        };

        let mut pruned = 0usize;
        for term in normalize_terms(&previous.terms) {
            if !terms.contains(&term) {
                remove_member(&self.index, &term, &url);
                pruned += 1;
            }
        }
        for link in previous.out_links {
            if !new_links.contains(&link) {
                remove_member(&self.backlinks, &link, &url);
                pruned += 1;
            }
        }
        tracing::debug!(%url, terms = terms.len(), pruned, "document replaced");
    }

    /// Pages containing every term, ranked by backlink count (URL order on
    /// ties) and cut to one page of `page_size` results.
    pub fn search_all_terms<S: AsRef<str>>(
        &self,
        terms: &[S],
        page: usize,
        page_size: usize,
    ) -> Vec<SearchResultItem> {
        let terms = normalize_terms(terms);
        if terms.is_empty() || page_size == 0 {
            return Vec::new();
        }

        let mut acc: Option<HashSet<Url>> = None;
        for term in &terms {
            let Some(urls) = self.index.get(term) else {
                return Vec::new();
            };
            let next: HashSet<Url> = match acc {
                None => urls.value().clone(),
                Some(prev) => prev.into_iter().filter(|u| urls.contains(u)).collect(),
            };
            if next.is_empty() {
                return Vec::new();
            }
            acc = Some(next);
        }
        let Some(matches) = acc else {
            return Vec::new();
        };

        let mut ranked: Vec<(Url, usize)> = matches
            .into_iter()
            .map(|url| {
                let inbound = self.backlink_count(&url);
                (url, inbound)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        let total = ranked.len();
        let from = page.saturating_mul(page_size);
        if from >= total {
            return Vec::new();
        }
        let to = from.saturating_add(page_size).min(total);

        ranked
            .drain(from..to)
            .map(|(url, inbound)| {
                let (title, snippet) = match self.pages.get(&url) {
                    Some(p) => (p.title.clone(), p.snippet.clone()),
                    None => (url.clone(), String::new()),
                };
                SearchResultItem {
                    url,
                    title,
                    snippet,
                    relevance: u32::try_from(inbound).unwrap_or(u32::MAX),
                }
            })
            .collect()
    }

    /// Pages linking to `url`, sorted.
    pub fn get_backlinks(&self, url: &str) -> Vec<Url> {
        let mut out: Vec<Url> = self
            .backlinks
            .get(url)
            .map(|set| set.iter().cloned().collect())
            .unwrap_or_default();
        out.sort();
        out
    }

    pub fn backlink_count(&self, url: &str) -> usize {
        self.backlinks.get(url).map(|set| set.len()).unwrap_or(0)
    }

    pub fn get_page(&self, url: &str) -> Option<PageRecord> {
        self.pages.get(url).map(|p| p.clone())
    }

    /// Deep copy of the three maps; later writes never show up in it.
    pub fn full_state(&self) -> StateSnapshot {
        StateSnapshot {
            pages: self
                .pages
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            index: self
                .index
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
            backlinks: self
                .backlinks
                .iter()
                .map(|e| (e.key().clone(), e.value().clone()))
                .collect(),
        }
    }

    /// Union a snapshot into the live maps. Pages already present are kept,
    /// since they may have arrived through replication after the snapshot was taken.
    /// Index and backlink entries from the snapshot are taken only for URLs whose
    /// page came from it, so a kept page contributes exactly what its record produces.
    pub fn merge_snapshot(&self, snapshot: StateSnapshot) {
        let mut kept: HashSet<Url> = HashSet::new();
        for (url, page) in snapshot.pages {
            match self.pages.entry(url) {
                Entry::Occupied(e) => {
                    kept.insert(e.key().clone());
                }
                Entry::Vacant(e) => {
                    e.insert(page);
                }
            }
        }
        merge_memberships(&self.index, snapshot.index, &kept);
        merge_memberships(&self.backlinks, snapshot.backlinks, &kept);
        if !kept.is_empty() {
            tracing::debug!(kept = kept.len(), "local pages kept over snapshot copies");
        }
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            term_count: self.index.len(),
            page_count: self.pages.len(),
            backlink_entry_count: self.backlinks.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pages.is_empty() && self.index.is_empty() && self.backlinks.is_empty()
    }
}

fn merge_memberships(
    map: &DashMap<String, HashSet<Url>>,
    incoming: HashMap<String, HashSet<Url>>,
    kept: &HashSet<Url>,
) {
    for (key, members) in incoming {
        let members: Vec<Url> = members.into_iter().filter(|m| !kept.contains(m)).collect();
        if !members.is_empty() {
            map.entry(key).or_default().extend(members);
        }
    }
}

fn remove_member(map: &DashMap<String, HashSet<Url>>, key: &str, member: &str) {
    if let Some(mut set) = map.get_mut(key) {
        set.remove(member);
    }
    map.remove_if(key, |_, set| set.is_empty());
}
