// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

//! Density based clustering (DBSCAN) over circular data.
//!
//! Items are sorted by a key whose domain wraps (an angle) and are stored in
//! an index space that wraps as well: index `N - 1` is adjacent to index 0.
//! Under that layout every neighbourhood is a contiguous circular index
//! range, so the neighbourhoods of all points are found with two
//! monotonically advancing pointers in O(N) instead of O(N²) distance
//! queries.
//!
//! Index ranges are kept "unwrapped": an upper bound may run up to
//! `N + i - 1` and a lower bound down to `u - N + 1`, so a range that crosses
//! the end of the array is still a plain `[lower, upper]` interval. Every
//! range is clamped to at most one full revolution (`N` items).
//!
//! A produced [`Cluster`] is just such a range plus an id. It never copies
//! the items; [`Cluster::view`] and [`Cluster::view_mut`] map cluster
//! positions `0..len` back onto the sorted array.

use std::{cmp::Ordering, slice};

/// Label of a point not yet reached by the scan.
pub const NOT_VISITED: i32 = -1;
/// Label of a point that is neither core nor reachable from a core point.
pub const NOISE: i32 = 0;

#[inline]
fn wrap(i: isize, n: usize) -> usize {
    i.rem_euclid(n as isize) as usize
}

/// Reusable state for circular DBSCAN.
///
/// Scratch arrays grow to the largest input seen and are reused afterwards,
/// so there is no allocation per call once warmed up.
#[derive(Debug, Default)]
pub struct CircularDbscan {
    upper: Vec<isize>,
    lower: Vec<isize>,
    labels: Vec<i32>,
}

impl CircularDbscan {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            upper: Vec::with_capacity(capacity),
            lower: Vec::with_capacity(capacity),
            labels: Vec::with_capacity(capacity),
        }
    }

    /// Sort `items` with `compare` and cluster them, returning the clusters
    /// in order of discovery with ids `1..`.
    pub fn cluster<T, C, M>(
        &mut self,
        items: &mut [T],
        eps: f32,
        min_points: usize,
        compare: C,
        metric: M,
    ) -> Vec<Cluster>
    where
        C: FnMut(&T, &T) -> Ordering,
        M: Fn(&T, &T) -> f32,
    {
        let mut clusters = Vec::new();
        self.cluster_into(items, eps, min_points, compare, metric, &mut clusters);
        clusters
    }

    /// Same as [`cluster`](Self::cluster), reusing `clusters` for the output.
    ///
    /// The sort is stable. `metric` must be symmetric and consistent with the
    /// sort order: points within `eps` of a point are contiguous around it.
    /// Both a wrapping metric over a wrapping key (angles) and a plain
    /// absolute difference over a linear key qualify.
    /// Afterwards [`labels`](Self::labels) holds, per sorted index, the id of
    /// the owning cluster or [`NOISE`].
    pub fn cluster_into<T, C, M>(
        &mut self,
        items: &mut [T],
        eps: f32,
        min_points: usize,
        compare: C,
        metric: M,
        clusters: &mut Vec<Cluster>,
    ) where
        C: FnMut(&T, &T) -> Ordering,
        M: Fn(&T, &T) -> f32,
    {
        clusters.clear();
        let n = items.len();

        self.labels.clear();
        self.labels.resize(n, NOT_VISITED);
        if n == 0 {
            return;
        }

        items.sort_by(compare);
        self.neighbourhoods(items, eps, &metric);

        let mut id = 0;
        for i in 0..n {
            if self.labels[i] != NOT_VISITED {
                continue;
            }
            if self.neighbour_count(i) < min_points {
                self.labels[i] = NOISE;
            } else {
                id += 1;
                clusters.push(self.expand_cluster(n, i, id, min_points));
            }
        }
    }

    /// Compute the unwrapped neighbourhood bounds of every point.
    ///
    /// A scan that stopped on an item at least `eps` away leaves a window
    /// that is still valid for the next point and is carried over. A scan
    /// that ran into the one revolution cap may have walked back into items
    /// close to the previous point only, so the next point starts afresh.
    /// The pass is linear unless neighbourhoods span the whole set.
    fn neighbourhoods<T, M>(&mut self, items: &[T], eps: f32, metric: &M)
    where
        M: Fn(&T, &T) -> f32,
    {
        let n = items.len();
        let n_i = n as isize;
        self.upper.clear();
        self.upper.resize(n, 0);
        self.lower.clear();
        self.lower.resize(n, 0);

        let mut u: isize = 0;
        let mut capped = false;
        for i in 0..n {
            let ii = i as isize;
            if capped {
                u = ii;
            }
            u = u.max(ii);
            while u < n_i + ii && metric(&items[wrap(u, n)], &items[i]) < eps {
                u += 1;
            }
            capped = u == n_i + ii;
            self.upper[i] = u - 1;
        }

        let mut l: isize = n_i - 1;
        let mut capped = false;
        for i in (0..n).rev() {
            let ii = i as isize;
            let upper = self.upper[i];
            if capped {
                l = ii;
            }
            l = l.min(ii);
            while upper - l + 1 <= n_i && metric(&items[wrap(l, n)], &items[i]) < eps {
                l -= 1;
            }
            // the carried window may overlap the forward one
            capped = upper - l + 1 > n_i;
            self.lower[i] = (l + 1).max(upper - n_i + 1);
        }
    }

    /// Flood a new cluster outwards from core point `p`.
    fn expand_cluster(&mut self, n: usize, p: usize, id: i32, min_points: usize) -> Cluster {
        let n_i = n as isize;
        let p_i = p as isize;
        self.labels[p] = id;

        let mut u = self.upper[p];
        let mut i = p_i + 1;
        while i <= u && i < n_i + p_i {
            let ind = wrap(i, n);
            match self.labels[ind] {
                NOT_VISITED => {
                    self.labels[ind] = id;
                    if self.neighbour_count(ind) >= min_points {
                        // translate into the unwrapped space of `i`
                        u = u.max(self.upper[ind] + (i - ind as isize));
                    }
                }
                NOISE => self.labels[ind] = id,
                _ => {}
            }
            i += 1;
        }
        let u = i - 1;

        let mut l = self.lower[p];
        let mut i = p_i - 1;
        while i >= l && u - i + 1 <= n_i {
            let ind = wrap(i, n);
            match self.labels[ind] {
                NOT_VISITED => {
                    self.labels[ind] = id;
                    if self.neighbour_count(ind) >= min_points {
                        l = l.min(self.lower[ind] + (i - ind as isize));
                    }
                }
                NOISE => self.labels[ind] = id,
                _ => {}
            }
            i -= 1;
        }
        let l = i + 1;

        Cluster {
            lower: l,
            upper: u,
            id,
            scan_len: n,
        }
    }

    /// Cluster id per sorted index from the last call.
    pub fn labels(&self) -> &[i32] {
        &self.labels
    }

    /// Number of points within `eps` of sorted index `i`, itself included.
    #[inline]
    pub fn neighbour_count(&self, i: usize) -> usize {
        (self.upper[i] - self.lower[i] + 1).max(0) as usize
    }

    /// Unwrapped `(lower, upper)` neighbourhood bounds of sorted index `i`.
    pub fn neighbourhood(&self, i: usize) -> (isize, isize) {
        (self.lower[i], self.upper[i])
    }

    /// Whether sorted index `j` lies in the neighbourhood of `i`.
    pub fn in_neighbourhood(&self, i: usize, j: usize) -> bool {
        let n = self.labels.len();
        let (l, u) = self.neighbourhood(i);
        u >= l && (j as isize - l).rem_euclid(n as isize) <= u - l
    }
}

/// A circular index range `[lower_index, upper_index]` over the sorted items
/// of one clustering call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Cluster {
    lower: isize,
    upper: isize,
    id: i32,
    scan_len: usize,
}

impl Cluster {
    /// Unwrapped lower bound, may be negative.
    pub fn lower_index(&self) -> isize {
        self.lower
    }

    /// Unwrapped upper bound, may exceed the item count.
    pub fn upper_index(&self) -> isize {
        self.upper
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn len(&self) -> usize {
        (self.upper - self.lower + 1) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.upper < self.lower
    }

    /// Length of the item array this cluster was produced over.
    pub fn scan_len(&self) -> usize {
        self.scan_len
    }

    /// Index into the sorted items of cluster position `k`.
    ///
    /// # Panics
    ///
    /// Panics if `k >= self.len()`.
    #[inline]
    pub fn index(&self, k: usize) -> usize {
        assert!(k < self.len(), "cluster position {} out of {}", k, self.len());
        wrap(self.lower + k as isize, self.scan_len)
    }

    pub fn indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.len()).map(move |k| wrap(self.lower + k as isize, self.scan_len))
    }

    fn spans(&self, data_len: usize) -> (usize, usize, usize) {
        assert_eq!(
            data_len, self.scan_len,
            "cluster over {} items viewed on {} items",
            self.scan_len, data_len
        );
        let start = wrap(self.lower, self.scan_len);
        let len = self.len();
        let first = len.min(self.scan_len - start);
        (start, first, len - first)
    }

    /// Borrow the cluster's items without copying.
    ///
    /// # Panics
    ///
    /// Panics if `data` is not the array (length) this cluster came from.
    pub fn view<'a, T>(&self, data: &'a [T]) -> ClusterView<'a, T> {
        let (start, first, second) = self.spans(data.len());
        ClusterView {
            first: &data[start..start + first],
            second: &data[..second],
        }
    }

    /// Mutable variant of [`view`](Self::view).
    pub fn view_mut<'a, T>(&self, data: &'a mut [T]) -> ClusterViewMut<'a, T> {
        let (start, first, second) = self.spans(data.len());
        let (head, tail) = data.split_at_mut(start);
        ClusterViewMut {
            first: &mut tail[..first],
            second: &mut head[..second],
        }
    }
}

/// Read-only cluster positions `0..len` over the sorted items.
#[derive(Debug)]
pub struct ClusterView<'a, T> {
    first: &'a [T],
    second: &'a [T],
}

impl<'a, T> ClusterView<'a, T> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, k: usize) -> Option<&'a T> {
        if k < self.first.len() {
            self.first.get(k)
        } else {
            self.second.get(k - self.first.len())
        }
    }

    pub fn iter(&self) -> std::iter::Chain<slice::Iter<'a, T>, slice::Iter<'a, T>> {
        self.first.iter().chain(self.second.iter())
    }
}

impl<'a, T> IntoIterator for &ClusterView<'a, T> {
    type Item = &'a T;
    type IntoIter = std::iter::Chain<slice::Iter<'a, T>, slice::Iter<'a, T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Mutable cluster positions `0..len` over the sorted items.
#[derive(Debug)]
pub struct ClusterViewMut<'a, T> {
    first: &'a mut [T],
    second: &'a mut [T],
}

impl<'a, T> ClusterViewMut<'a, T> {
    pub fn len(&self) -> usize {
        self.first.len() + self.second.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get_mut(&mut self, k: usize) -> Option<&mut T> {
        let split = self.first.len();
        if k < split {
            self.first.get_mut(k)
        } else {
            self.second.get_mut(k - split)
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.first.iter().chain(self.second.iter())
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.first.iter_mut().chain(self.second.iter_mut())
    }
}
