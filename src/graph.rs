//! Dependency graph over form fields
//!
//! Fields are stored in declaration order and addressed by index; every edge points
//! from a dependency to the field that depends on it. The graph is rebuilt wholesale
//! on schema load and is read-only afterwards.

use crate::diagnostics::Diagnostic;
use crate::scheduler::{schedule, Schedule};
use crate::template::Template;
use crate::types::{ExpressionMode, FieldDescriptor};
use std::collections::{BTreeSet, HashMap, HashSet};

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    ids: Vec<String>,
    index: HashMap<String, usize>,
    /// field -> fields that depend on it
    dependents: Vec<Vec<usize>>,
    /// field -> its own dependencies
    dependencies: Vec<Vec<usize>>,
}

/// Output of a graph build: the graph, the acyclicity check, and schema diagnostics.
#[derive(Debug, Clone)]
pub struct GraphBuild {
    pub graph: DependencyGraph,
    pub cycles: Vec<Vec<String>>,
    pub diagnostics: Vec<Diagnostic>,
}

impl DependencyGraph {
    /// Build the graph from the loaded form's fields.
    ///
    /// Unknown declared dependencies are reported and dropped. Template placeholders
    /// that name no field are skipped silently; they render empty.
    pub fn build(fields: &[FieldDescriptor]) -> GraphBuild {
        let mut graph = DependencyGraph::default();
        let mut diagnostics = Vec::new();

        for field in fields {
            if graph.index.contains_key(&field.id) {
                continue;
            }
            graph.index.insert(field.id.clone(), graph.ids.len());
            graph.ids.push(field.id.clone());
        }
        graph.dependents = vec![Vec::new(); graph.ids.len()];
        graph.dependencies = vec![Vec::new(); graph.ids.len()];

        let mut seen = HashSet::new();
        for field in fields {
            if !seen.insert(field.id.as_str()) {
                continue;
            }
            let Some(spec) = &field.expression else {
                continue;
            };
            let target = graph.index[&field.id];

            for dependency in &spec.dependencies {
                match graph.index.get(dependency) {
                    Some(&source) => graph.add_edge(source, target),
                    None => {
                        log::warn!("Field '{}' depends on unknown field '{}'", field.id, dependency);
                        diagnostics.push(Diagnostic::unknown_dependency(&field.id, dependency));
                    }
                }
            }

            if spec.mode == ExpressionMode::Text {
                for placeholder in Template::parse(&spec.source).referenced_fields() {
                    match graph.index.get(&placeholder) {
                        Some(&source) => graph.add_edge(source, target),
                        None => log::debug!(
                            "Template of '{}' references unknown field '{}', it will render empty",
                            field.id,
                            placeholder
                        ),
                    }
                }
            }
        }

        for list in graph.dependents.iter_mut().chain(graph.dependencies.iter_mut()) {
            list.sort_unstable();
        }

        let full: BTreeSet<usize> = (0..graph.ids.len()).collect();
        let Schedule { cycles, .. } = schedule(&graph, &full);
        for members in &cycles {
            log::warn!("Dependency cycle detected among {{{}}}", members.join(", "));
            diagnostics.extend(Diagnostic::cycle(members));
        }

        log::debug!(
            "Dependency graph built: {} fields, {} edges, {} cycle(s)",
            graph.len(),
            graph.edge_count(),
            cycles.len()
        );

        GraphBuild { graph, cycles, diagnostics }
    }

    fn add_edge(&mut self, source: usize, target: usize) {
        if !self.dependents[source].contains(&target) {
            self.dependents[source].push(target);
            self.dependencies[target].push(source);
        }
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.dependents.iter().map(Vec::len).sum()
    }

    pub fn index_of(&self, field_id: &str) -> Option<usize> {
        self.index.get(field_id).copied()
    }

    pub fn id(&self, index: usize) -> &str {
        &self.ids[index]
    }

    /// Field ids in declaration order.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub(crate) fn dependent_indices(&self, index: usize) -> &[usize] {
        &self.dependents[index]
    }

    pub(crate) fn dependency_indices(&self, index: usize) -> &[usize] {
        &self.dependencies[index]
    }

    pub fn dependents_of(&self, field_id: &str) -> Vec<&str> {
        self.index_of(field_id)
            .map(|i| self.dependents[i].iter().map(|&d| self.id(d)).collect())
            .unwrap_or_default()
    }

    pub fn dependencies_of(&self, field_id: &str) -> Vec<&str> {
        self.index_of(field_id)
            .map(|i| self.dependencies[i].iter().map(|&d| self.id(d)).collect())
            .unwrap_or_default()
    }

    pub fn has_dependents(&self, field_id: &str) -> bool {
        self.index_of(field_id)
            .map_or(false, |i| !self.dependents[i].is_empty())
    }

    /// Changed fields plus everything reachable forward from them.
    pub fn affected_by<'a, I>(&self, changed: I) -> BTreeSet<usize>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut affected = BTreeSet::new();
        let mut stack: Vec<usize> = changed
            .into_iter()
            .filter_map(|id| self.index_of(id))
            .collect();

        while let Some(node) = stack.pop() {
            if affected.insert(node) {
                stack.extend(self.dependents[node].iter().copied());
            }
        }

        affected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExpressionSpec;

    fn derived(id: &str, source: &str, deps: &[&str]) -> FieldDescriptor {
        FieldDescriptor::derived(id, ExpressionSpec::new(source, ExpressionMode::Value, deps))
    }

    fn chain() -> Vec<FieldDescriptor> {
        vec![
            FieldDescriptor::input("x"),
            derived("y", "x * 2", &["x"]),
            derived("z", "y + 5", &["y"]),
            FieldDescriptor::input("unrelated"),
        ]
    }

    #[test]
    fn test_forward_and_reverse_edges() {
        let build = DependencyGraph::build(&chain());
        let graph = &build.graph;

        assert!(build.diagnostics.is_empty());
        assert!(build.cycles.is_empty());
        assert_eq!(graph.dependents_of("x"), vec!["y"]);
        assert_eq!(graph.dependents_of("y"), vec!["z"]);
        assert_eq!(graph.dependencies_of("z"), vec!["y"]);
        assert_eq!(graph.edge_count(), 2);
        assert!(!graph.has_dependents("unrelated"));
    }

    #[test]
    fn test_affected_by_is_forward_closure() {
        let build = DependencyGraph::build(&chain());
        let graph = &build.graph;

        let affected: Vec<&str> = graph.affected_by(["x"]).into_iter().map(|i| graph.id(i)).collect();
        assert_eq!(affected, vec!["x", "y", "z"]);

        let affected: Vec<&str> = graph.affected_by(["y"]).into_iter().map(|i| graph.id(i)).collect();
        assert_eq!(affected, vec!["y", "z"]);

        assert_eq!(graph.affected_by(["unrelated"]).len(), 1);
        assert!(graph.affected_by(["missing"]).is_empty());
    }

    #[test]
    fn test_unknown_dependency_reported() {
        let fields = vec![FieldDescriptor::input("x"), derived("total", "x + qty", &["x", "qty"])];
        let build = DependencyGraph::build(&fields);

        assert_eq!(build.diagnostics.len(), 1);
        assert_eq!(build.diagnostics[0].field_id, "total");
        assert!(build.diagnostics[0].message.contains("qty"));
        assert_eq!(build.graph.dependencies_of("total"), vec!["x"]);
    }

    #[test]
    fn test_cycle_reported_at_build() {
        let fields = vec![
            derived("a", "b + 1", &["b"]),
            derived("b", "a + 1", &["a"]),
            FieldDescriptor::input("c"),
        ];
        let build = DependencyGraph::build(&fields);

        assert_eq!(build.cycles, vec![vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(build.diagnostics.len(), 2);
    }

    #[test]
    fn test_template_placeholders_become_edges() {
        let fields = vec![
            FieldDescriptor::input("x"),
            FieldDescriptor::derived(
                "summary",
                ExpressionSpec::new("{{x}} and {{gone}}", ExpressionMode::Text, &[]),
            ),
        ];
        let build = DependencyGraph::build(&fields);

        assert!(build.diagnostics.is_empty());
        assert_eq!(build.graph.dependents_of("x"), vec!["summary"]);
    }

    #[test]
    fn test_duplicate_ids_keep_first_declaration() {
        let fields = vec![
            FieldDescriptor::input("x"),
            derived("x", "1", &[]),
            derived("y", "x", &["x"]),
        ];
        let build = DependencyGraph::build(&fields);
        assert_eq!(build.graph.len(), 2);
        assert_eq!(build.graph.ids(), &["x".to_string(), "y".to_string()]);
    }
}
