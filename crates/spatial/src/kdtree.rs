use kiddo::float::distance::SquaredEuclidean;
use kiddo::immutable::float::kdtree::ImmutableKdTree;
use scanstitch_core::PointCloud;
use std::num::NonZero;

/// Kd-tree over 3D positions.
///
/// Wraps kiddo's `ImmutableKdTree`, built once from a point slice. Items are
/// `u32` indices back into the slice (or cloud) the tree was built from.
/// Non-finite input points are left out of the tree so they can never be
/// returned as neighbours.
#[derive(Debug, Clone)]
pub struct KdTree {
    tree: Option<ImmutableKdTree<f32, u32, 3, 32>>,
    // Tree item -> caller index, present only when non-finite points were skipped.
    remap: Option<Vec<usize>>,
    num_points: usize,
}

impl KdTree {
    pub fn build(cloud: &PointCloud) -> Self {
        Self::from_points(&cloud.to_points())
    }

    pub fn from_points(points: &[[f32; 3]]) -> Self {
        let all_finite = points.iter().all(|p| p.iter().all(|v| v.is_finite()));

        if all_finite {
            if points.is_empty() {
                return Self::empty();
            }
            return Self {
                tree: Some(ImmutableKdTree::new_from_slice(points)),
                remap: None,
                num_points: points.len(),
            };
        }

        let (original, compact): (Vec<usize>, Vec<[f32; 3]>) = points
            .iter()
            .copied()
            .enumerate()
            .filter(|(_, p)| p.iter().all(|v| v.is_finite()))
            .unzip();

        if compact.is_empty() {
            return Self::empty();
        }

        Self {
            tree: Some(ImmutableKdTree::new_from_slice(&compact)),
            num_points: compact.len(),
            remap: Some(original),
        }
    }

    fn empty() -> Self {
        Self {
            tree: None,
            remap: None,
            num_points: 0,
        }
    }

    #[inline]
    fn original_index(&self, item: u32) -> usize {
        match &self.remap {
            Some(map) => map[item as usize],
            None => item as usize,
        }
    }

    pub fn len(&self) -> usize {
        self.num_points
    }

    pub fn is_empty(&self) -> bool {
        self.num_points == 0
    }

    /// The single nearest neighbour and its Euclidean distance.
    pub fn nearest(&self, query: &[f32; 3]) -> Option<(usize, f32)> {
        let tree = self.tree.as_ref()?;
        if !query.iter().all(|v| v.is_finite()) {
            return None;
        }
        let nn = tree.nearest_one::<SquaredEuclidean>(query);
        Some((self.original_index(nn.item), nn.distance.sqrt()))
    }

    /// Find the `k` nearest neighbours to `query`.
    ///
    /// Returns `(indices, distances)` with Euclidean distances in ascending
    /// order. Empty if `k == 0`, the tree is empty, or the query is not
    /// finite. If `k > len()`, every point is returned.
    pub fn knn(&self, query: &[f32; 3], k: usize) -> (Vec<usize>, Vec<f32>) {
        let Some(tree) = self.tree.as_ref() else {
            return (Vec::new(), Vec::new());
        };
        let Some(nz_k) = NonZero::new(k) else {
            return (Vec::new(), Vec::new());
        };
        if !query.iter().all(|v| v.is_finite()) {
            return (Vec::new(), Vec::new());
        }

        let results = tree.nearest_n::<SquaredEuclidean>(query, nz_k);

        let mut indices = Vec::with_capacity(results.len());
        let mut distances = Vec::with_capacity(results.len());
        for nn in results {
            indices.push(self.original_index(nn.item));
            distances.push(nn.distance.sqrt());
        }

        (indices, distances)
    }

    /// Up to `k` nearest neighbours no farther than `max_distance`.
    pub fn knn_within(
        &self,
        query: &[f32; 3],
        k: usize,
        max_distance: f32,
    ) -> (Vec<usize>, Vec<f32>) {
        let (mut indices, mut distances) = self.knn(query, k);
        let keep = distances.partition_point(|&d| d <= max_distance);
        indices.truncate(keep);
        distances.truncate(keep);
        (indices, distances)
    }

    /// Indices of all points with `euclidean_dist <= radius`, sorted by
    /// index so results are deterministic.
    ///
    /// Empty if `radius` is not a positive finite number, the tree is empty,
    /// or the query is not finite.
    pub fn radius_search(&self, query: &[f32; 3], radius: f32) -> Vec<usize> {
        self.radius_search_with_distances(query, radius)
            .into_iter()
            .map(|(i, _)| i)
            .collect()
    }

    /// Like [`radius_search`](Self::radius_search) but also returns each
    /// neighbour's Euclidean distance.
    pub fn radius_search_with_distances(&self, query: &[f32; 3], radius: f32) -> Vec<(usize, f32)> {
        let Some(tree) = self.tree.as_ref() else {
            return Vec::new();
        };
        if radius <= 0.0 || !radius.is_finite() || !query.iter().all(|v| v.is_finite()) {
            return Vec::new();
        }

        let radius_sq = radius * radius;

        // kiddo's `within_unsorted` is strict `<`; widen slightly and
        // post-filter with `<=` so boundary points are included.
        let query_radius_sq = radius_sq + f32::EPSILON * radius_sq.max(1.0);

        let mut hits: Vec<(usize, f32)> = tree
            .within_unsorted::<SquaredEuclidean>(query, query_radius_sq)
            .into_iter()
            .filter(|nn| nn.distance <= radius_sq)
            .map(|nn| (self.original_index(nn.item), nn.distance.sqrt()))
            .collect();

        hits.sort_unstable_by_key(|(i, _)| *i);
        hits
    }
}
