// Dependency Graph Builder
// Builds the stage-level DAG and one job-level DAG per stage

use crate::parser::models::{DependsOn, Job, Stage};

use std::collections::{HashMap, VecDeque};
use std::fmt;

/// Error type for graph operations
#[derive(Debug, Clone)]
pub struct GraphError {
    pub message: String,
    pub kind: GraphErrorKind,
    /// Cycle members in traversal order, or the missing reference
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// Circular dependency detected
    CyclicDependency,
    /// Reference to unknown stage/job
    UnknownDependency,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph error: {}", self.message)
    }
}

impl std::error::Error for GraphError {}

impl GraphError {
    pub fn cyclic(scope: &str, cycle: Vec<String>) -> Self {
        Self {
            message: format!("circular dependency detected in {}: {}", scope, cycle.join(" -> ")),
            kind: GraphErrorKind::CyclicDependency,
            nodes: cycle,
        }
    }

    pub fn unknown_dependency(message: impl Into<String>, missing: &str) -> Self {
        Self {
            message: message.into(),
            kind: GraphErrorKind::UnknownDependency,
            nodes: vec![missing.to_string()],
        }
    }
}

/// A node at either nesting level. Edges are stored as indices into the
/// owning level, in both directions, so the scheduler can walk them
/// without name lookups.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub name: String,
    pub dependencies: Vec<usize>,
    pub dependents: Vec<usize>,
}

#[derive(Debug, Clone)]
pub struct StageNode {
    pub node: Node,
    pub jobs: Vec<Node>,
}

impl StageNode {
    pub fn name(&self) -> &str {
        &self.node.name
    }

    pub fn job_index(&self, name: &str) -> Option<usize> {
        self.jobs.iter().position(|j| j.name.eq_ignore_ascii_case(name))
    }
}

/// Stage-level DAG with a job-level DAG per stage
#[derive(Debug, Clone)]
pub struct PipelineGraph {
    pub stages: Vec<StageNode>,
}

impl PipelineGraph {
    pub fn build(stages: &[Stage]) -> Result<Self, GraphError> {
        let stage_names: Vec<&str> = stages.iter().map(|s| s.stage.as_str()).collect();

        let mut stage_nodes = Vec::with_capacity(stages.len());
        for (index, stage) in stages.iter().enumerate() {
            let declared = Self::stage_dependencies(stage, index, stages);
            let dependencies = resolve(&declared, &stage_names).map_err(|missing| {
                GraphError::unknown_dependency(
                    format!("stage '{}' depends on unknown stage '{}'", stage.stage, missing),
                    &missing,
                )
            })?;

            stage_nodes.push(StageNode {
                node: Node {
                    name: stage.stage.clone(),
                    dependencies,
                    dependents: Vec::new(),
                },
                jobs: Self::build_jobs(stage)?,
            });
        }

        let mut levels: Vec<Node> = stage_nodes.iter().map(|s| s.node.clone()).collect();
        link(&mut levels);
        detect_cycle("stages", &levels)?;
        for (stage, linked) in stage_nodes.iter_mut().zip(levels) {
            stage.node = linked;
        }

        Ok(Self { stages: stage_nodes })
    }

    /// Omitted `dependsOn` on a stage means the previous stage
    fn stage_dependencies(stage: &Stage, index: usize, all: &[Stage]) -> Vec<String> {
        match &stage.depends_on {
            DependsOn::Implicit if index > 0 => vec![all[index - 1].stage.clone()],
            other => other.as_vec(),
        }
    }

    fn build_jobs(stage: &Stage) -> Result<Vec<Node>, GraphError> {
        let job_names: Vec<&str> = stage.jobs.iter().map(|j| j.job.as_str()).collect();

        let mut nodes = stage
            .jobs
            .iter()
            .map(|job: &Job| {
                let dependencies = resolve(&job.depends_on.as_vec(), &job_names).map_err(|missing| {
                    GraphError::unknown_dependency(
                        format!(
                            "job '{}' in stage '{}' depends on unknown job '{}'",
                            job.job, stage.stage, missing
                        ),
                        &missing,
                    )
                })?;
                Ok(Node {
                    name: job.job.clone(),
                    dependencies,
                    dependents: Vec::new(),
                })
            })
            .collect::<Result<Vec<_>, GraphError>>()?;

        link(&mut nodes);
        detect_cycle(&format!("jobs of stage '{}'", stage.stage), &nodes)?;
        Ok(nodes)
    }

    pub fn stage_index(&self, name: &str) -> Option<usize> {
        self.stages
            .iter()
            .position(|s| s.node.name.eq_ignore_ascii_case(name))
    }

    /// Stage indices in dependency order; ties keep declaration order
    pub fn topological_order(&self) -> Vec<usize> {
        let nodes: Vec<&Node> = self.stages.iter().map(|s| &s.node).collect();
        kahn(&nodes)
    }

    /// Job indices of one stage in dependency order
    pub fn jobs_topological_order(&self, stage: usize) -> Vec<usize> {
        let nodes: Vec<&Node> = self.stages[stage].jobs.iter().collect();
        kahn(&nodes)
    }

    /// Stages grouped by depth; stages in the same group have no edge between them
    pub fn stage_levels(&self) -> Vec<Vec<usize>> {
        let nodes: Vec<&Node> = self.stages.iter().map(|s| &s.node).collect();
        levels(&nodes)
    }

    pub fn job_levels(&self, stage: usize) -> Vec<Vec<usize>> {
        let nodes: Vec<&Node> = self.stages[stage].jobs.iter().collect();
        levels(&nodes)
    }
}

/// Map declared names to indices, case-insensitively
fn resolve(declared: &[String], names: &[&str]) -> Result<Vec<usize>, String> {
    let lookup: HashMap<String, usize> = names
        .iter()
        .enumerate()
        .map(|(i, n)| (n.to_lowercase(), i))
        .collect();

    let mut indices = Vec::with_capacity(declared.len());
    for name in declared {
        match lookup.get(&name.to_lowercase()) {
            Some(&i) if !indices.contains(&i) => indices.push(i),
            Some(_) => {}
            None => return Err(name.clone()),
        }
    }
    Ok(indices)
}

fn link(nodes: &mut [Node]) {
    for i in 0..nodes.len() {
        let dependencies = nodes[i].dependencies.clone();
        for dep in dependencies {
            nodes[dep].dependents.push(i);
        }
    }
}

/// DFS with an explicit recursion stack; a back edge to a node on the
/// stack closes a cycle, reported from the repeated node onwards
fn detect_cycle(scope: &str, nodes: &[Node]) -> Result<(), GraphError> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        OnStack,
        Done,
    }

    fn visit(
        index: usize,
        nodes: &[Node],
        marks: &mut [Mark],
        path: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[index] = Mark::OnStack;
        path.push(index);

        for &dep in &nodes[index].dependencies {
            match marks[dep] {
                Mark::OnStack => {
                    let start = path.iter().position(|&p| p == dep).unwrap_or(0);
                    let mut cycle = path[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::Unvisited => {
                    if let Some(cycle) = visit(dep, nodes, marks, path) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }

        path.pop();
        marks[index] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::Unvisited; nodes.len()];
    for index in 0..nodes.len() {
        if marks[index] != Mark::Unvisited {
            continue;
        }
        let mut path = Vec::new();
        if let Some(cycle) = visit(index, nodes, &mut marks, &mut path) {
            let names = cycle.into_iter().map(|i| nodes[i].name.clone()).collect();
            return Err(GraphError::cyclic(scope, names));
        }
    }
    Ok(())
}

fn kahn(nodes: &[&Node]) -> Vec<usize> {
    let mut in_degree: Vec<usize> = nodes.iter().map(|n| n.dependencies.len()).collect();
    let mut queue: VecDeque<usize> = (0..nodes.len()).filter(|&i| in_degree[i] == 0).collect();

    let mut order = Vec::with_capacity(nodes.len());
    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependent in &nodes[index].dependents {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                queue.push_back(dependent);
            }
        }
    }
    order
}

fn levels(nodes: &[&Node]) -> Vec<Vec<usize>> {
    let mut depth = vec![0usize; nodes.len()];
    let mut grouped: Vec<Vec<usize>> = Vec::new();

    for index in kahn(nodes) {
        let level = nodes[index]
            .dependencies
            .iter()
            .map(|&d| depth[d] + 1)
            .max()
            .unwrap_or(0);
        depth[index] = level;

        if level >= grouped.len() {
            grouped.resize(level + 1, Vec::new());
        }
        grouped[level].push(index);
    }

    for group in &mut grouped {
        group.sort_unstable();
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_stage(name: &str, depends_on: DependsOn) -> Stage {
        Stage {
            stage: name.to_string(),
            display_name: None,
            depends_on,
            condition: None,
            variables: Default::default(),
            jobs: vec![make_job("Job1", DependsOn::Implicit)],
        }
    }

    fn make_job(name: &str, depends_on: DependsOn) -> Job {
        Job {
            job: name.to_string(),
            display_name: None,
            depends_on,
            condition: None,
            matrix: None,
            max_parallel: None,
            allow_empty_matrix: false,
            timeout_in_minutes: None,
            variables: Default::default(),
            steps: Vec::new(),
        }
    }

    fn single(name: &str) -> DependsOn {
        DependsOn::Single(name.to_string())
    }

    #[test]
    fn test_implicit_stage_ordering() {
        let graph = PipelineGraph::build(&[
            make_stage("Build", DependsOn::Implicit),
            make_stage("Test", DependsOn::Implicit),
            make_stage("Release", DependsOn::Implicit),
        ])
        .unwrap();

        assert!(graph.stages[0].node.dependencies.is_empty());
        assert_eq!(graph.stages[1].node.dependencies, vec![0]);
        assert_eq!(graph.stages[2].node.dependencies, vec![1]);
        assert_eq!(graph.stages[0].node.dependents, vec![1]);
        assert_eq!(graph.topological_order(), vec![0, 1, 2]);
    }

    #[test]
    fn test_explicit_root_and_fan_in() {
        let graph = PipelineGraph::build(&[
            make_stage("Build", DependsOn::Implicit),
            make_stage("UnitTest", single("Build")),
            make_stage("Lint", DependsOn::Multiple(vec![])),
            make_stage(
                "Deploy",
                DependsOn::Multiple(vec!["UnitTest".to_string(), "lint".to_string()]),
            ),
        ])
        .unwrap();

        assert_eq!(graph.stage_levels(), vec![vec![0, 2], vec![1], vec![3]]);
        assert_eq!(graph.stages[3].node.dependencies, vec![1, 2]);
    }

    #[test]
    fn test_forward_reference_is_allowed() {
        let graph = PipelineGraph::build(&[
            make_stage("Deploy", single("Build")),
            make_stage("Build", DependsOn::Multiple(vec![])),
        ])
        .unwrap();
        assert_eq!(graph.topological_order(), vec![1, 0]);
    }

    #[test]
    fn test_cycle_names_every_member() {
        let err = PipelineGraph::build(&[
            make_stage("A", single("C")),
            make_stage("B", single("A")),
            make_stage("C", single("B")),
        ])
        .unwrap_err();

        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert_eq!(err.nodes, vec!["A", "C", "B", "A"]);
        assert!(err.message.contains("A -> C -> B -> A"));
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let err = PipelineGraph::build(&[make_stage("A", single("A"))]).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert_eq!(err.nodes, vec!["A", "A"]);
    }

    #[test]
    fn test_unknown_stage_dependency() {
        let err = PipelineGraph::build(&[
            make_stage("Build", DependsOn::Implicit),
            make_stage("Test", single("Unknown")),
        ])
        .unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
        assert_eq!(err.nodes, vec!["Unknown"]);
    }

    #[test]
    fn test_jobs_within_stage() {
        let mut stage = make_stage("Build", DependsOn::Implicit);
        stage.jobs = vec![
            make_job("Compile", DependsOn::Implicit),
            make_job("Lint", DependsOn::Implicit),
            make_job(
                "Package",
                DependsOn::Multiple(vec!["Compile".to_string(), "Lint".to_string()]),
            ),
        ];

        let graph = PipelineGraph::build(&[stage]).unwrap();
        assert_eq!(graph.job_levels(0), vec![vec![0, 1], vec![2]]);
        assert_eq!(graph.stages[0].job_index("package"), Some(2));
    }

    #[test]
    fn test_job_cycle_and_unknown_job() {
        let mut stage = make_stage("Build", DependsOn::Implicit);
        stage.jobs = vec![
            make_job("A", single("B")),
            make_job("B", single("A")),
        ];
        let err = PipelineGraph::build(&[stage]).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::CyclicDependency);
        assert!(err.message.contains("jobs of stage 'Build'"));

        let mut stage = make_stage("Build", DependsOn::Implicit);
        stage.jobs = vec![make_job("A", single("Other"))];
        let err = PipelineGraph::build(&[stage]).unwrap_err();
        assert_eq!(err.kind, GraphErrorKind::UnknownDependency);
    }
}
