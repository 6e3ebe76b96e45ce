//! Formula dependency graph and execution ordering.
//!
//! Nodes are formulas; an edge runs from a producer to every consumer that
//! reads a name the producer writes. Ordering is Kahn's algorithm with the
//! ready set kept sorted by declaration index, so formulas without a
//! relative dependency keep their document order and repeated runs agree.

use std::collections::{BTreeMap, BTreeSet};

use crate::document::{Document, Formula};
use crate::error::ConfigError;

/// Static read/write sets of every formula, and the edges between them.
#[derive(Debug, Clone)]
pub struct FormulaGraph {
    ids: Vec<String>,
    reads: Vec<Vec<String>>,
    writes: Vec<Vec<String>>,
    successors: Vec<BTreeSet<usize>>,
    predecessors: Vec<BTreeSet<usize>>,
}

impl FormulaGraph {
    pub fn build(formulas: &[Formula]) -> FormulaGraph {
        let writes: Vec<Vec<String>> = formulas.iter().map(Formula::writes).collect();
        let reads: Vec<Vec<String>> = formulas
            .iter()
            .zip(&writes)
            .map(|(f, own)| {
                f.referenced_variables()
                    .into_iter()
                    .filter(|r| !own.contains(r))
                    .collect()
            })
            .collect();

        let mut producers: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, ws) in writes.iter().enumerate() {
            for w in ws {
                producers.entry(w.as_str()).or_default().push(i);
            }
        }

        let n = formulas.len();
        let mut successors = vec![BTreeSet::new(); n];
        let mut predecessors = vec![BTreeSet::new(); n];
        for (consumer, rs) in reads.iter().enumerate() {
            for r in rs {
                for &producer in producers.get(r.as_str()).into_iter().flatten() {
                    if producer != consumer {
                        successors[producer].insert(consumer);
                        predecessors[consumer].insert(producer);
                    }
                }
            }
        }

        FormulaGraph {
            ids: formulas.iter().map(|f| f.id.clone()).collect(),
            reads,
            writes,
            successors,
            predecessors,
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    /// Names formula `i` reads that it does not itself write.
    pub fn reads(&self, i: usize) -> &[String] {
        &self.reads[i]
    }

    pub fn writes(&self, i: usize) -> &[String] {
        &self.writes[i]
    }

    /// Formulas that must run before formula `i`.
    pub fn dependencies(&self, i: usize) -> impl Iterator<Item = usize> + '_ {
        self.predecessors[i].iter().copied()
    }

    /// Whether any formula writes `name`.
    pub fn is_produced(&self, name: &str) -> bool {
        self.writes.iter().any(|ws| ws.iter().any(|w| w == name))
    }

    /// Reads with no producing formula, in the order given by `order`.
    pub fn external_inputs(&self, order: &[usize]) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for &i in order {
            for r in &self.reads[i] {
                if !self.is_produced(r) && !out.contains(r) {
                    out.push(r.clone());
                }
            }
        }
        out
    }

    /// Stable topological order of formula indices.
    pub fn topological_order(&self) -> Result<Vec<usize>, ConfigError> {
        let n = self.len();
        let mut in_degree: Vec<usize> = self.predecessors.iter().map(BTreeSet::len).collect();
        let mut ready: BTreeSet<usize> = (0..n).filter(|&i| in_degree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);

        while let Some(next) = ready.pop_first() {
            order.push(next);
            for &succ in &self.successors[next] {
                in_degree[succ] -= 1;
                if in_degree[succ] == 0 {
                    ready.insert(succ);
                }
            }
        }

        if order.len() < n {
            let mut placed = vec![false; n];
            for &i in &order {
                placed[i] = true;
            }
            return Err(ConfigError::CyclicDependency {
                ids: self.find_cycle(&placed),
            });
        }
        Ok(order)
    }

    /// Name one cycle among the formulas Kahn's algorithm could not place.
    ///
    /// Every unplaced formula has an unplaced predecessor, so walking
    /// predecessors from any of them must revisit a node.
    fn find_cycle(&self, placed: &[bool]) -> Vec<String> {
        let Some(start) = placed.iter().position(|p| !p) else {
            return Vec::new();
        };
        let mut path = vec![start];
        let mut cur = start;
        loop {
            let Some(pred) = self.predecessors[cur].iter().copied().find(|&p| !placed[p]) else {
                break;
            };
            if let Some(pos) = path.iter().position(|&p| p == pred) {
                path.drain(..pos);
                break;
            }
            path.push(pred);
            cur = pred;
        }

        // `path` runs consumer to producer; report producer to consumer,
        // starting from the earliest declared participant.
        path.reverse();
        if let Some(min_pos) = path.iter().enumerate().min_by_key(|&(_, &i)| i).map(|(p, _)| p) {
            path.rotate_left(min_pos);
        }
        let mut ids: Vec<String> = path.iter().map(|&i| self.ids[i].clone()).collect();
        if let Some(first) = ids.first().cloned() {
            ids.push(first);
        }
        ids
    }
}

/// A document's formulas in execution order, ready to run or compile.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionPlan {
    pub document_id: Option<String>,
    /// Formulas in resolved execution order.
    pub formulas: Vec<Formula>,
    /// Names read but produced by no formula; must come from the inputs.
    pub external_inputs: Vec<String>,
}

impl ExecutionPlan {
    pub fn order(&self) -> Vec<&str> {
        self.formulas.iter().map(|f| f.id.as_str()).collect()
    }

    /// Every name written by some formula, sorted.
    pub fn outputs(&self) -> Vec<String> {
        let set: BTreeSet<String> = self.formulas.iter().flat_map(Formula::writes).collect();
        set.into_iter().collect()
    }
}

/// Build the formula graph of a parsed document and order its formulas.
pub fn resolve(doc: Document) -> Result<ExecutionPlan, ConfigError> {
    let graph = FormulaGraph::build(&doc.formulas);
    let order = graph.topological_order()?;
    let external_inputs = graph.external_inputs(&order);

    let mut slots: Vec<Option<Formula>> = doc.formulas.into_iter().map(Some).collect();
    let formulas = order.iter().filter_map(|&i| slots[i].take()).collect();

    Ok(ExecutionPlan {
        document_id: doc.id,
        formulas,
        external_inputs,
    })
}
