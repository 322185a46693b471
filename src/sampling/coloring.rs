//! Conflict graphs over sampler positions and their greedy coloring.
//!
//! Two positions share an edge when resampling one reads the label of the
//! other. Positions of one color class are therefore conditionally
//! independent given everything else and can be resampled together.

use std::collections::BTreeSet;

use super::{alignment::Alignment, model::SequenceModel};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConflictGraph {
    adjacency: Vec<BTreeSet<usize>>,
}

impl ConflictGraph {
    /// `n` vertices, no edges.
    pub fn new(n: usize) -> Self {
        Self {
            adjacency: vec![BTreeSet::new(); n],
        }
    }

    /// Connects every position to the ones within the model's left and right windows.
    pub fn for_model<M: SequenceModel + ?Sized>(model: &M) -> Self {
        let n = model.length();
        let reach = model.left_window().max(model.right_window());
        let mut graph = Self::new(n);
        for i in 0..n {
            for j in i + 1..=i.saturating_add(reach).min(n.saturating_sub(1)) {
                graph.add_edge(i, j);
            }
        }
        graph
    }

    /// Two chains of lengths `len_a` and `len_b` (the second offset by
    /// `len_a`), plus one edge per alignment link.
    pub fn from_alignment(alignment: &Alignment, len_a: usize, len_b: usize) -> Self {
        let mut graph = Self::new(len_a + len_b);
        graph.add_chain(0, len_a);
        graph.add_chain(len_a, len_b);
        for link in alignment.links() {
            graph.add_edge(link.a, len_a + link.b);
        }
        graph
    }

    /// Links consecutive positions of `offset..offset + len`.
    pub fn add_chain(&mut self, offset: usize, len: usize) {
        for i in offset + 1..offset + len {
            self.add_edge(i - 1, i);
        }
    }

    /// Undirected; self loops are ignored.
    pub fn add_edge(&mut self, a: usize, b: usize) {
        if a == b {
            return;
        }
        let n = a.max(b) + 1;
        if self.adjacency.len() < n {
            self.adjacency.resize(n, BTreeSet::new());
        }
        self.adjacency[a].insert(b);
        self.adjacency[b].insert(a);
    }

    pub fn num_vertices(&self) -> usize {
        self.adjacency.len()
    }

    pub fn degree(&self, v: usize) -> usize {
        self.adjacency[v].len()
    }

    pub fn neighbors(&self, v: usize) -> impl Iterator<Item = usize> + '_ {
        self.adjacency[v].iter().copied()
    }

    pub fn has_edge(&self, a: usize, b: usize) -> bool {
        self.adjacency.get(a).is_some_and(|n| n.contains(&b))
    }

    /// Welsh-Powell: visit vertices by decreasing degree; each still
    /// uncolored vertex opens a new color that every later uncolored vertex
    /// joins unless it neighbors a member. Ties go to the lower vertex.
    ///
    /// Returns one list of vertices per color, each in ascending order.
    pub fn color(&self) -> Vec<Vec<usize>> {
        let mut order: Vec<usize> = (0..self.num_vertices()).collect();
        order.sort_by(|&a, &b| self.degree(b).cmp(&self.degree(a)).then(a.cmp(&b)));

        let mut colored = vec![false; self.num_vertices()];
        let mut classes = Vec::new();
        for (i, &v) in order.iter().enumerate() {
            if colored[v] {
                continue;
            }
            colored[v] = true;
            let mut class = vec![v];
            for &u in &order[i + 1..] {
                if !colored[u] && class.iter().all(|&w| !self.has_edge(u, w)) {
                    colored[u] = true;
                    class.push(u);
                }
            }
            class.sort_unstable();
            classes.push(class);
        }
        log::debug!("colored {} vertices with {} colors", self.num_vertices(), classes.len());
        classes
    }

    /// Every vertex in exactly one class and no class holding both ends of an edge.
    pub fn is_valid_coloring(&self, classes: &[Vec<usize>]) -> bool {
        let mut seen = vec![false; self.num_vertices()];
        for class in classes {
            for (i, &v) in class.iter().enumerate() {
                if v >= seen.len() || seen[v] {
                    return false;
                }
                seen[v] = true;
                if class[i + 1..].iter().any(|&u| self.has_edge(u, v)) {
                    return false;
                }
            }
        }
        seen.into_iter().all(|s| s)
    }
}
