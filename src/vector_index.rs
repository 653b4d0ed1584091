//! Nearest-neighbor index over fixed-dimension vectors.
//!
//! Vectors live in one flat row-major buffer: `data[position * dimension +
//! i]`. Positions are assigned in insertion order starting at zero and never
//! change. Distances are squared Euclidean; results are ordered by ascending
//! distance with ties broken by the lower position.

use std::{cmp::Ordering, fmt, str::FromStr};

use rayon::prelude::*;

use crate::{
    embedding::Vector,
    error::{Error, Result},
};

/// Minimum number of vectors per list before an approximate index trains.
const MIN_POINTS_PER_LIST: usize = 4;

/// Lloyd iterations used when training partition centroids.
const KMEANS_ITERATIONS: usize = 10;

/// Search strategy for a [`VectorIndex`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Linear scan over every vector. Deterministic and exact.
    #[default]
    Exact,
    /// Inverted-file partitioning: vectors are bucketed under `lists`
    /// k-means centroids and a search scans the `probes` nearest buckets.
    /// Results are only expected to have high recall, not the exact ranking.
    Approximate { lists: usize, probes: usize },
}

impl IndexKind {
    pub fn validate(&self) -> Result<()> {
        if let Self::Approximate { lists, probes } = *self {
            if lists == 0 || probes == 0 {
                return Err(Error::InvalidConfiguration(
                    "approximate index needs at least one list and one probe"
                        .to_string(),
                ));
            }
            if probes > lists {
                return Err(Error::InvalidConfiguration(format!(
                    "probes ({probes}) cannot exceed lists ({lists})"
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Approximate { lists, probes } => {
                write!(f, "approximate:{lists}:{probes}")
            }
        }
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    /// Parses `exact`, `approximate` (16 lists, 4 probes) or
    /// `approximate:<lists>:<probes>`.
    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.trim().split(':');
        let kind = match (parts.next(), parts.next(), parts.next()) {
            (Some("exact"), None, None) => Self::Exact,
            (Some("approximate"), None, None) => Self::Approximate {
                lists: 16,
                probes: 4,
            },
            (Some("approximate"), Some(lists), Some(probes)) => {
                let parse = |v: &str| {
                    v.parse::<usize>().map_err(|_| {
                        Error::InvalidConfiguration(format!(
                            "invalid index setting: {s}"
                        ))
                    })
                };
                Self::Approximate {
                    lists: parse(lists)?,
                    probes: parse(probes)?,
                }
            }
            _ => {
                return Err(Error::InvalidConfiguration(format!(
                    "unknown index kind: {s}"
                )));
            }
        };
        if parts.next().is_some() {
            return Err(Error::InvalidConfiguration(format!(
                "unknown index kind: {s}"
            )));
        }
        kind.validate()?;
        Ok(kind)
    }
}

/// K-means buckets for [`IndexKind::Approximate`]. Derived entirely from the
/// stored vectors, so it is rebuilt rather than persisted.
#[derive(Debug, Clone)]
struct Partitions {
    centroids: Vec<f32>,
    members: Vec<Vec<usize>>,
    trained_at: usize,
}

impl Partitions {
    fn list_count(&self) -> usize {
        self.members.len()
    }

    fn centroid(&self, list: usize, dimension: usize) -> &[f32] {
        &self.centroids[list * dimension..(list + 1) * dimension]
    }

    fn nearest_list(&self, vector: &[f32], dimension: usize) -> usize {
        (0..self.list_count())
            .map(|list| {
                (list, squared_l2(vector, self.centroid(list, dimension)))
            })
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map_or(0, |(list, _)| list)
    }
}

#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    kind: IndexKind,
    dimension: Option<usize>,
    data: Vec<f32>,
    partitions: Option<Partitions>,
}

impl VectorIndex {
    pub fn new(kind: IndexKind) -> Self {
        Self {
            kind,
            ..Self::default()
        }
    }

    /// Build an index from vectors in position order.
    pub fn from_vectors(kind: IndexKind, vectors: &[Vector]) -> Result<Self> {
        let mut index = Self::new(kind);
        index.add_batch(vectors)?;
        Ok(index)
    }

    /// Switch search strategy, rebuilding any derived partitions.
    pub fn into_kind(mut self, kind: IndexKind) -> Self {
        self.kind = kind;
        self.partitions = None;
        self.update_partitions(0);
        self
    }

    pub fn kind(&self) -> IndexKind {
        self.kind
    }

    /// Dimension committed by the first insertion, or `None` while empty.
    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    pub fn count(&self) -> usize {
        match self.dimension {
            Some(dim) => self.data.len() / dim,
            None => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// The vector stored at `position`.
    pub fn vector(&self, position: usize) -> Option<&[f32]> {
        let dim = self.dimension?;
        self.data.get(position * dim..(position + 1) * dim)
    }

    /// Iterate over stored vectors in position order.
    pub fn vectors(&self) -> impl Iterator<Item = &[f32]> {
        self.data.chunks_exact(self.dimension.unwrap_or(1))
    }

    /// Append one vector and return its position.
    pub fn add(&mut self, vector: &[f32]) -> Result<usize> {
        let positions = self.add_batch(std::slice::from_ref(&vector.to_vec()))?;
        Ok(positions[0])
    }

    /// Append vectors in order and return their positions.
    ///
    /// The whole batch is checked before anything is appended: one vector of
    /// the wrong dimension leaves the index untouched.
    pub fn add_batch(&mut self, vectors: &[Vector]) -> Result<Vec<usize>> {
        let Some(first) = vectors.first() else {
            return Ok(Vec::new());
        };
        let expected = self.dimension.unwrap_or(first.len());
        if expected == 0 {
            return Err(Error::InvalidConfiguration(
                "vectors must have at least one dimension".to_string(),
            ));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
            return Err(Error::DimensionMismatch {
                expected,
                actual: bad.len(),
            });
        }

        let start = self.count();
        self.data.reserve(vectors.len() * expected);
        for vector in vectors {
            self.data.extend_from_slice(vector);
        }
        self.dimension = Some(expected);
        self.update_partitions(start);

        Ok((start..self.count()).collect())
    }

    /// Drop every vector at or after `len`.
    ///
    /// Restores the exact vector contents of an earlier state. If approximate
    /// partitions were retrained after that state they are retrained again
    /// over the remaining vectors.
    pub fn truncate(&mut self, len: usize) {
        if len >= self.count() {
            return;
        }
        let Some(dim) = self.dimension else {
            return;
        };
        self.data.truncate(len * dim);
        if len == 0 {
            self.dimension = None;
            self.partitions = None;
            return;
        }
        let still_trained = self
            .partitions
            .as_ref()
            .is_some_and(|p| p.trained_at <= len);
        if still_trained {
            if let Some(partitions) = &mut self.partitions {
                for members in &mut partitions.members {
                    members.retain(|&p| p < len);
                }
            }
        } else {
            self.partitions = None;
            self.update_partitions(0);
        }
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.dimension = None;
        self.partitions = None;
    }

    /// Return up to `k` nearest neighbours of `query` as
    /// `(position, squared distance)`.
    ///
    /// An empty index yields no results; `k` larger than the index is
    /// clamped.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(usize, f32)>> {
        let count = self.count();
        let Some(dim) = self.dimension else {
            return Ok(Vec::new());
        };
        if count == 0 || k == 0 {
            return Ok(Vec::new());
        }
        if query.len() != dim {
            return Err(Error::DimensionMismatch {
                expected: dim,
                actual: query.len(),
            });
        }
        let k = k.min(count);

        let mut scored: Vec<(usize, f32)> = match (&self.kind, &self.partitions)
        {
            (IndexKind::Approximate { probes, .. }, Some(partitions)) => {
                self.probe_candidates(partitions, query, *probes, k)
                    .par_iter()
                    .map(|&p| (p, squared_l2(query, self.row(p, dim))))
                    .collect()
            }
            _ => self
                .data
                .par_chunks_exact(dim)
                .enumerate()
                .map(|(p, v)| (p, squared_l2(query, v)))
                .collect(),
        };

        if k < scored.len() {
            scored.select_nth_unstable_by(k - 1, compare_hits);
            scored.truncate(k);
        }
        scored.sort_by(compare_hits);
        Ok(scored)
    }

    fn row(&self, position: usize, dim: usize) -> &[f32] {
        &self.data[position * dim..(position + 1) * dim]
    }

    /// Members of the `probes` lists nearest to `query`. Further lists are
    /// scanned in centroid order until at least `k` candidates are found.
    fn probe_candidates(
        &self,
        partitions: &Partitions,
        query: &[f32],
        probes: usize,
        k: usize,
    ) -> Vec<usize> {
        let dim = query.len();
        let mut lists: Vec<(usize, f32)> = (0..partitions.list_count())
            .map(|l| (l, squared_l2(query, partitions.centroid(l, dim))))
            .collect();
        lists.sort_by(compare_hits);

        let mut candidates = Vec::new();
        for (scanned, (list, _)) in lists.iter().enumerate() {
            if scanned >= probes && candidates.len() >= k {
                break;
            }
            candidates.extend_from_slice(&partitions.members[*list]);
        }
        candidates
    }

    /// Keep approximate partitions in step with vectors appended from
    /// `start` onward. Trains once enough vectors exist and retrains whenever
    /// the index has doubled since the last training.
    fn update_partitions(&mut self, start: usize) {
        let IndexKind::Approximate { lists, .. } = self.kind else {
            return;
        };
        let Some(dim) = self.dimension else {
            return;
        };
        let count = self.count();
        let needs_training = match &self.partitions {
            None => count >= lists * MIN_POINTS_PER_LIST,
            Some(p) => count >= p.trained_at * 2,
        };

        if needs_training {
            self.partitions = Some(train_partitions(&self.data, dim, lists));
        } else if let Some(partitions) = &mut self.partitions {
            for position in start..count {
                let vector = &self.data[position * dim..(position + 1) * dim];
                let list = partitions.nearest_list(vector, dim);
                partitions.members[list].push(position);
            }
        }
    }
}

fn compare_hits(a: &(usize, f32), b: &(usize, f32)) -> Ordering {
    a.1.total_cmp(&b.1).then(a.0.cmp(&b.0))
}

/// Squared Euclidean distance between two equal-length vectors.
pub fn squared_l2(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b)
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

fn train_partitions(data: &[f32], dim: usize, lists: usize) -> Partitions {
    let count = data.len() / dim;
    let lists = lists.min(count).max(1);

    // Seed centroids from evenly spaced vectors so training is repeatable.
    let mut centroids: Vec<f32> = (0..lists)
        .flat_map(|l| {
            let p = l * count / lists;
            data[p * dim..(p + 1) * dim].iter().copied()
        })
        .collect();

    let mut partitions = Partitions {
        centroids: Vec::new(),
        members: vec![Vec::new(); lists],
        trained_at: count,
    };

    for _ in 0..KMEANS_ITERATIONS {
        partitions.centroids.clone_from(&centroids);
        let assignment: Vec<usize> = data
            .par_chunks_exact(dim)
            .map(|v| partitions.nearest_list(v, dim))
            .collect();

        let mut sums = vec![0.0f32; lists * dim];
        let mut sizes = vec![0usize; lists];
        for (p, &list) in assignment.iter().enumerate() {
            sizes[list] += 1;
            for (s, x) in sums[list * dim..(list + 1) * dim]
                .iter_mut()
                .zip(&data[p * dim..(p + 1) * dim])
            {
                *s += x;
            }
        }
        for list in 0..lists {
            if sizes[list] == 0 {
                continue;
            }
            for i in 0..dim {
                centroids[list * dim + i] =
                    sums[list * dim + i] / sizes[list] as f32;
            }
        }
    }

    partitions.centroids = centroids;
    let mut members = vec![Vec::new(); lists];
    for (p, v) in data.chunks_exact(dim).enumerate() {
        members[partitions.nearest_list(v, dim)].push(p);
    }
    partitions.members = members;
    partitions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn exact_index(vectors: &[Vector]) -> VectorIndex {
        VectorIndex::from_vectors(IndexKind::Exact, vectors).unwrap()
    }

    #[test]
    fn add_assigns_sequential_positions() {
        let mut index = VectorIndex::new(IndexKind::Exact);
        assert_eq!(index.add(&[1.0, 0.0]).unwrap(), 0);
        assert_eq!(index.add(&[0.0, 1.0]).unwrap(), 1);
        assert_eq!(
            index.add_batch(&[vec![1.0, 1.0], vec![2.0, 2.0]]).unwrap(),
            vec![2, 3]
        );
        assert_eq!(index.count(), 4);
        assert_eq!(index.dimension(), Some(2));
        assert_eq!(index.vector(2), Some(&[1.0, 1.0][..]));
    }

    #[test]
    fn search_orders_by_squared_distance() {
        let index = exact_index(&[
            vec![0.0, 1.0, 0.0],
            vec![1.0, 0.0, 0.0],
            vec![0.9, 0.1, 0.0],
        ]);

        let results = index.search(&[1.0, 0.0, 0.0], 2).unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0], (1, 0.0));
        assert_eq!(results[1].0, 2);
        assert!((results[1].1 - 0.02).abs() < 1e-6);
    }

    #[test]
    fn ties_break_by_lowest_position() {
        let index = exact_index(&[
            vec![1.0, 0.0],
            vec![0.0, 1.0],
            vec![-1.0, 0.0],
            vec![0.0, -1.0],
        ]);
        let results = index.search(&[0.0, 0.0], 4).unwrap();
        let positions: Vec<usize> = results.iter().map(|r| r.0).collect();
        assert_eq!(positions, vec![0, 1, 2, 3]);

        let top_two = index.search(&[0.0, 0.0], 2).unwrap();
        assert_eq!(top_two.iter().map(|r| r.0).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn repeated_searches_are_identical() {
        let vectors: Vec<Vector> = (0..50)
            .map(|i| vec![(i % 7) as f32, (i % 3) as f32])
            .collect();
        let index = exact_index(&vectors);
        let first = index.search(&[2.0, 1.0], 10).unwrap();
        for _ in 0..5 {
            assert_eq!(index.search(&[2.0, 1.0], 10).unwrap(), first);
        }
    }

    #[test]
    fn empty_index_returns_no_results() {
        let index = VectorIndex::new(IndexKind::Exact);
        assert!(index.search(&[1.0, 2.0], 5).unwrap().is_empty());
        assert_eq!(index.count(), 0);
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn oversized_k_is_clamped() {
        let index = exact_index(&[vec![1.0], vec![2.0]]);
        assert_eq!(index.search(&[0.0], 100).unwrap().len(), 2);
        assert!(index.search(&[0.0], 0).unwrap().is_empty());
    }

    #[test]
    fn dimension_mismatch_rejects_whole_batch() {
        let mut index = exact_index(&[vec![1.0, 0.0, 0.0]]);

        let err = index
            .add_batch(&[vec![0.0, 1.0, 0.0], vec![1.0, 0.0]])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
        assert_eq!(index.count(), 1);

        let err = index.search(&[1.0, 0.0], 1).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
    }

    #[test]
    fn first_batch_must_agree_with_itself() {
        let mut index = VectorIndex::new(IndexKind::Exact);
        assert!(index.add_batch(&[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(index.is_empty());
        assert_eq!(index.dimension(), None);
    }

    #[test]
    fn zero_length_vectors_are_rejected() {
        let mut index = VectorIndex::new(IndexKind::Exact);
        assert!(matches!(
            index.add(&[]),
            Err(Error::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn truncate_restores_earlier_state() {
        let mut index = exact_index(&[vec![1.0], vec![2.0]]);
        index.add_batch(&[vec![3.0], vec![4.0]]).unwrap();
        index.truncate(2);
        assert_eq!(index.count(), 2);
        assert_eq!(index.vector(2), None);

        index.truncate(0);
        assert_eq!(index.dimension(), None);
        index.add(&[1.0, 1.0]).unwrap();
        assert_eq!(index.dimension(), Some(2));
    }

    #[test]
    fn parse_index_kind() {
        assert_eq!("exact".parse::<IndexKind>().unwrap(), IndexKind::Exact);
        assert_eq!(
            "approximate".parse::<IndexKind>().unwrap(),
            IndexKind::Approximate {
                lists: 16,
                probes: 4
            }
        );
        assert_eq!(
            "approximate:8:2".parse::<IndexKind>().unwrap(),
            IndexKind::Approximate {
                lists: 8,
                probes: 2
            }
        );
        assert!("approximate:2:8".parse::<IndexKind>().is_err());
        assert!("approximate:0:0".parse::<IndexKind>().is_err());
        assert!("hnsw".parse::<IndexKind>().is_err());

        let kind = IndexKind::Approximate {
            lists: 8,
            probes: 2,
        };
        assert_eq!(kind.to_string().parse::<IndexKind>().unwrap(), kind);
    }

    fn clustered_vectors() -> Vec<Vector> {
        // four well separated clusters of 10 points each
        let centers = [[0.0, 0.0], [10.0, 0.0], [0.0, 10.0], [10.0, 10.0]];
        (0..40)
            .map(|i| {
                let c = centers[i / 10];
                let jitter = (i % 10) as f32 * 0.01;
                vec![c[0] + jitter, c[1] - jitter]
            })
            .collect()
    }

    #[test]
    fn approximate_finds_nearest_in_clustered_data() {
        let vectors = clustered_vectors();
        let kind = IndexKind::Approximate {
            lists: 4,
            probes: 1,
        };
        let approx = VectorIndex::from_vectors(kind, &vectors).unwrap();
        let exact = exact_index(&vectors);

        for query in [[0.1, 0.1], [9.9, 0.2], [0.3, 9.7], [10.2, 10.1]] {
            let a = approx.search(&query, 3).unwrap();
            let e = exact.search(&query, 3).unwrap();
            assert_eq!(a, e);
        }
    }

    #[test]
    fn approximate_below_training_threshold_is_exact() {
        let vectors: Vec<Vector> = (0..5).map(|i| vec![i as f32]).collect();
        let kind = IndexKind::Approximate {
            lists: 4,
            probes: 1,
        };
        let approx = VectorIndex::from_vectors(kind, &vectors).unwrap();
        let exact = exact_index(&vectors);
        assert_eq!(
            approx.search(&[2.2], 5).unwrap(),
            exact.search(&[2.2], 5).unwrap()
        );
    }

    #[test]
    fn approximate_assigns_vectors_added_after_training() {
        let kind = IndexKind::Approximate {
            lists: 4,
            probes: 1,
        };
        let vectors = clustered_vectors();
        let mut index = VectorIndex::from_vectors(kind, &vectors).unwrap();
        let position = index.add(&[10.05, 10.05]).unwrap();

        let results = index.search(&[10.05, 10.05], 1).unwrap();
        assert_eq!(results[0], (position, 0.0));

        index.truncate(vectors.len());
        let results = index.search(&[10.05, 10.05], 1).unwrap();
        assert_ne!(results[0].0, position);
    }

    #[test]
    fn approximate_fills_k_beyond_probed_lists() {
        // 16 tight groups of 4, one list per group once trained
        let vectors: Vec<Vector> = (0..64)
            .map(|i| vec![(i / 4) as f32 * 100.0 + (i % 4) as f32 * 0.01])
            .collect();
        let kind = IndexKind::Approximate {
            lists: 16,
            probes: 4,
        };
        let index = VectorIndex::from_vectors(kind, &vectors).unwrap();
        let exact = exact_index(&vectors);

        for k in [1, 16, 30, 64, 100] {
            let hits = index.search(&[0.0], k).unwrap();
            assert_eq!(hits.len(), k.min(vectors.len()));
            assert!(
                hits.windows(2)
                    .all(|w| compare_hits(&w[0], &w[1]).is_lt())
            );
        }
        assert_eq!(
            index.search(&[0.0], 64).unwrap(),
            exact.search(&[0.0], 64).unwrap()
        );
    }
}
