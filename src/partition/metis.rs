//! METIS graph partitioner (requires the `metis` feature).

use super::{AdjacencyGraph, GraphPartitioner, PartitionError, PartitionResult};
use metis::{Graph, Idx};

/// Balanced partitioning through the METIS C library
#[derive(Debug, Clone, Copy)]
pub struct MetisPartitioner {
    /// Use recursive bisection instead of multilevel k-way partitioning
    pub recursive: bool,
}

impl Default for MetisPartitioner {
    fn default() -> Self {
        Self { recursive: true }
    }
}

impl MetisPartitioner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_recursive(mut self, recursive: bool) -> Self {
        self.recursive = recursive;
        self
    }
}

fn to_idx(values: &[usize]) -> PartitionResult<Vec<Idx>> {
    values
        .iter()
        .map(|&v| {
            Idx::try_from(v).map_err(|_| {
                PartitionError::InvalidInput(format!("Graph index {v} exceeds the METIS index range"))
            })
        })
        .collect()
}

impl GraphPartitioner for MetisPartitioner {
    fn partition(&self, graph: &AdjacencyGraph, nparts: usize) -> PartitionResult<Vec<usize>> {
        if nparts == 0 {
            return Err(PartitionError::InvalidInput(
                "Number of parts must be positive".to_string(),
            ));
        }
        let n = graph.num_nodes();
        // METIS rejects a single part and graphs with fewer nodes than parts
        if nparts == 1 || n < 2 {
            return Ok(vec![0; n]);
        }
        if n <= nparts {
            return Ok((0..n).collect());
        }

        let xadj = to_idx(graph.xadj())?;
        let adjncy = to_idx(graph.adjncy())?;
        let nparts_idx = Idx::try_from(nparts)
            .map_err(|_| PartitionError::InvalidInput(format!("Too many parts: {nparts}")))?;

        let metis_graph = Graph::new(1, nparts_idx, &xadj, &adjncy)
            .map_err(|e| PartitionError::Partitioner(format!("Invalid METIS graph: {e:?}")))?;
        let mut part = vec![0 as Idx; n];
        let result = if self.recursive {
            metis_graph.part_recursive(&mut part)
        } else {
            metis_graph.part_kway(&mut part)
        };
        result.map_err(|e| PartitionError::Partitioner(format!("METIS failed: {e:?}")))?;

        part.into_iter()
            .map(|p| {
                usize::try_from(p).map_err(|_| {
                    PartitionError::Partitioner(format!("METIS returned negative part {p}"))
                })
            })
            .collect()
    }

    fn name(&self) -> &'static str {
        "metis"
    }
}
