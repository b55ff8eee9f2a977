//! Vector field indices
//!
//! Two implementations behind one dispatch type: a linear-scan FLAT
//! index with exact results, and an HNSW graph built with `M` and
//! `ef_construction`. Both answer KNN within an optional candidate set.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet};

use rand::Rng;
use roaring::RoaringBitmap;

use crate::distance::VectorMetric;
use crate::index::DocId;
use crate::schema::{VectorAlgo, VectorParams};

/// (distance, doc) ordered by distance, ties by doc id.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Neighbor {
    dist: f32,
    doc: DocId,
}

impl Eq for Neighbor {}

impl Ord for Neighbor {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.dist
            .total_cmp(&other.dist)
            .then(self.doc.cmp(&other.doc))
    }
}

impl PartialOrd for Neighbor {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub enum VectorFieldIndex {
    Flat(FlatVectorIndex),
    Hnsw(HnswVectorIndex),
}

impl VectorFieldIndex {
    pub fn new(params: &VectorParams) -> Self {
        match params.algo {
            VectorAlgo::Flat => VectorFieldIndex::Flat(FlatVectorIndex::new(params)),
            VectorAlgo::Hnsw => VectorFieldIndex::Hnsw(HnswVectorIndex::new(params)),
        }
    }

    pub fn add(&mut self, doc: DocId, vector: Vec<f32>) {
        match self {
            VectorFieldIndex::Flat(idx) => idx.add(doc, vector),
            VectorFieldIndex::Hnsw(idx) => idx.add(doc, vector),
        }
    }

    pub fn remove(&mut self, doc: DocId) {
        match self {
            VectorFieldIndex::Flat(idx) => idx.remove(doc),
            VectorFieldIndex::Hnsw(idx) => idx.remove(doc),
        }
    }

    /// Top-k nearest stored vectors, ascending by distance, restricted
    /// to `filter` when present. Result size is `min(k, population)`.
    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&RoaringBitmap>,
    ) -> Vec<(DocId, f32)> {
        match self {
            VectorFieldIndex::Flat(idx) => idx.knn(query, k, filter),
            VectorFieldIndex::Hnsw(idx) => idx.knn(query, k, filter),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            VectorFieldIndex::Flat(idx) => idx.len(),
            VectorFieldIndex::Hnsw(idx) => idx.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dim(&self) -> usize {
        match self {
            VectorFieldIndex::Flat(idx) => idx.dim,
            VectorFieldIndex::Hnsw(idx) => idx.dim,
        }
    }
}

/// Exact linear scan over stored vectors.
#[derive(Debug)]
pub struct FlatVectorIndex {
    dim: usize,
    metric: VectorMetric,
    vectors: HashMap<DocId, Vec<f32>>,
}

impl FlatVectorIndex {
    pub fn new(params: &VectorParams) -> Self {
        Self {
            dim: params.dim,
            metric: params.metric,
            vectors: HashMap::with_capacity(params.capacity),
        }
    }

    pub fn add(&mut self, doc: DocId, vector: Vec<f32>) {
        if vector.len() != self.dim {
            return;
        }
        self.vectors.insert(doc, vector);
    }

    pub fn remove(&mut self, doc: DocId) {
        self.vectors.remove(&doc);
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&RoaringBitmap>,
    ) -> Vec<(DocId, f32)> {
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (&doc, vector) in &self.vectors {
            if let Some(f) = filter {
                if !f.contains(doc) {
                    continue;
                }
            }
            let dist = self.metric.distance(query, vector);
            heap.push(Neighbor { dist, doc });
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut out: Vec<Neighbor> = heap.into_vec();
        out.sort();
        out.into_iter().map(|n| (n.doc, n.dist)).collect()
    }
}

/// Hierarchical navigable small-world graph.
#[derive(Debug)]
pub struct HnswVectorIndex {
    dim: usize,
    metric: VectorMetric,
    m: usize,
    ef_construction: usize,
    level_mult: f64,
    vectors: HashMap<DocId, Vec<f32>>,
    /// doc -> neighbor lists per layer, layer 0 first
    layers: HashMap<DocId, Vec<Vec<DocId>>>,
    entry: Option<DocId>,
}

impl HnswVectorIndex {
    pub fn new(params: &VectorParams) -> Self {
        let m = params.hnsw_m.max(2);
        Self {
            dim: params.dim,
            metric: params.metric,
            m,
            ef_construction: params.hnsw_ef_construction.max(m),
            level_mult: 1.0 / (m as f64).ln(),
            vectors: HashMap::with_capacity(params.capacity),
            layers: HashMap::with_capacity(params.capacity),
            entry: None,
        }
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    fn dist(&self, a: DocId, query: &[f32]) -> f32 {
        self.metric.distance(&self.vectors[&a], query)
    }

    fn random_level(&self) -> usize {
        let u: f64 = rand::thread_rng().gen_range(f64::MIN_POSITIVE..1.0);
        (-u.ln() * self.level_mult) as usize
    }

    fn max_neighbors(&self, level: usize) -> usize {
        if level == 0 {
            self.m * 2
        } else {
            self.m
        }
    }

    pub fn add(&mut self, doc: DocId, vector: Vec<f32>) {
        if vector.len() != self.dim {
            return;
        }
        self.remove(doc);
        self.vectors.insert(doc, vector);

        let level = self.random_level();
        let Some(entry) = self.entry else {
            self.layers.insert(doc, vec![Vec::new(); level + 1]);
            self.entry = Some(doc);
            return;
        };

        let query = self.vectors[&doc].clone();
        let top = self.layers[&entry].len() - 1;
        self.layers.insert(doc, vec![Vec::new(); level + 1]);

        // Greedy descent through layers above the new node's level
        let mut ep = entry;
        for l in ((level + 1)..=top).rev() {
            ep = self.greedy_closest(ep, &query, l);
        }

        // Beam search + link on each shared layer
        for l in (0..=level.min(top)).rev() {
            let found = self.search_layer(&query, ep, self.ef_construction, l);
            let selected: Vec<DocId> = found.iter().take(self.m).map(|n| n.doc).collect();
            if let Some(best) = found.first() {
                ep = best.doc;
            }

            for &neighbor in &selected {
                if let Some(lists) = self.layers.get_mut(&doc) {
                    lists[l].push(neighbor);
                }
                if let Some(lists) = self.layers.get_mut(&neighbor) {
                    if l < lists.len() {
                        lists[l].push(doc);
                    }
                }
                self.prune(neighbor, l);
            }
        }

        if level > top {
            self.entry = Some(doc);
        }
    }

    /// Trim a node's neighbor list at `level` back to the limit,
    /// keeping the closest.
    fn prune(&mut self, node: DocId, level: usize) {
        let limit = self.max_neighbors(level);
        let Some(lists) = self.layers.get(&node) else {
            return;
        };
        if level >= lists.len() || lists[level].len() <= limit {
            return;
        }
        let base = self.vectors[&node].clone();
        let mut scored: Vec<Neighbor> = lists[level]
            .iter()
            .map(|&n| Neighbor {
                dist: self.dist(n, &base),
                doc: n,
            })
            .collect();
        scored.sort();
        scored.truncate(limit);
        if let Some(lists) = self.layers.get_mut(&node) {
            lists[level] = scored.into_iter().map(|n| n.doc).collect();
        }
    }

    fn greedy_closest(&self, start: DocId, query: &[f32], level: usize) -> DocId {
        let mut current = start;
        let mut current_dist = self.dist(current, query);
        loop {
            let mut improved = false;
            let Some(lists) = self.layers.get(&current) else {
                return current;
            };
            if level >= lists.len() {
                return current;
            }
            for &n in &lists[level] {
                let d = self.dist(n, query);
                if d < current_dist {
                    current = n;
                    current_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return current;
            }
        }
    }

    /// Bounded beam search on one layer; ascending result order.
    fn search_layer(&self, query: &[f32], ep: DocId, ef: usize, level: usize) -> Vec<Neighbor> {
        let mut visited: HashSet<DocId> = HashSet::new();
        visited.insert(ep);

        let start = Neighbor {
            dist: self.dist(ep, query),
            doc: ep,
        };
        let mut candidates: BinaryHeap<Reverse<Neighbor>> = BinaryHeap::new();
        candidates.push(Reverse(start));
        let mut results: BinaryHeap<Neighbor> = BinaryHeap::new();
        results.push(start);

        while let Some(Reverse(current)) = candidates.pop() {
            let worst = results.peek().map(|n| n.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && results.len() >= ef {
                break;
            }
            let Some(lists) = self.layers.get(&current.doc) else {
                continue;
            };
            if level >= lists.len() {
                continue;
            }
            for &n in &lists[level] {
                if !visited.insert(n) {
                    continue;
                }
                let d = self.dist(n, query);
                let worst = results.peek().map(|x| x.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || d < worst {
                    let neighbor = Neighbor { dist: d, doc: n };
                    candidates.push(Reverse(neighbor));
                    results.push(neighbor);
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out = results.into_vec();
        out.sort();
        out
    }

    pub fn remove(&mut self, doc: DocId) {
        if self.vectors.remove(&doc).is_none() {
            return;
        }
        let lists = self.layers.remove(&doc).unwrap_or_default();
        for (level, neighbors) in lists.iter().enumerate() {
            for &n in neighbors {
                if let Some(nl) = self.layers.get_mut(&n) {
                    if level < nl.len() {
                        nl[level].retain(|&x| x != doc);
                    }
                }
            }
        }
        if self.entry == Some(doc) {
            self.entry = self
                .layers
                .iter()
                .max_by_key(|(_, ls)| ls.len())
                .map(|(&d, _)| d);
        }
    }

    pub fn knn(
        &self,
        query: &[f32],
        k: usize,
        filter: Option<&RoaringBitmap>,
    ) -> Vec<(DocId, f32)> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };

        // Small candidate sets are cheaper to scan exactly
        if let Some(f) = filter {
            if f.len() <= (k as u64 * 8).max(256) {
                return self.scan(query, k, Some(f));
            }
        }

        let mut ep = entry;
        let top = self.layers[&entry].len() - 1;
        for l in (1..=top).rev() {
            ep = self.greedy_closest(ep, query, l);
        }

        let ef = self.ef_construction.max(k * 2);
        let found = self.search_layer(query, ep, ef, 0);

        let mut out: Vec<(DocId, f32)> = found
            .into_iter()
            .filter(|n| filter.map(|f| f.contains(n.doc)).unwrap_or(true))
            .map(|n| (n.doc, n.dist))
            .take(k)
            .collect();

        // The beam can come up short against the eligible population;
        // fall back to an exact scan in that case.
        if out.len() < k && out.len() < self.population(filter) {
            out = self.scan(query, k, filter);
        }
        out
    }

    fn population(&self, filter: Option<&RoaringBitmap>) -> usize {
        match filter {
            Some(f) => f.iter().filter(|d| self.vectors.contains_key(d)).count(),
            None => self.vectors.len(),
        }
    }

    fn scan(&self, query: &[f32], k: usize, filter: Option<&RoaringBitmap>) -> Vec<(DocId, f32)> {
        let mut heap: BinaryHeap<Neighbor> = BinaryHeap::with_capacity(k + 1);
        for (&doc, vector) in &self.vectors {
            if let Some(f) = filter {
                if !f.contains(doc) {
                    continue;
                }
            }
            heap.push(Neighbor {
                dist: self.metric.distance(query, vector),
                doc,
            });
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut out = heap.into_vec();
        out.sort();
        out.into_iter().map(|n| (n.doc, n.dist)).collect()
    }
}
