//! Backtracking dependency resolver over profile requirements.
//!
//! The specification provider answers "which candidates satisfy this
//! requirement?"; the resolver assigns one version per profile name so
//! that every requirement in the transitive closure is satisfied,
//! backtracking through candidate lists when a choice conflicts with an
//! already-activated profile.
//!
//! `search_for` must be pure: equal requirements yield equal candidate
//! lists. The backtracker snapshots its activation state around each
//! decision point and relies on replayed searches agreeing with the
//! originals.

use crate::cache::{LocalSpec, VendorIndex};
use crate::errors::{ProfileError, Result};
use crate::requirement::{Requirement, RequirementSource};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};

/// Provenance label for requirements read from the manifest.
pub const EXPLICIT_SOURCE: &str = "inspec.yml";
/// Provenance label for requirements replayed from a lockfile.
pub const LOCK_SOURCE: &str = "inspec.lock";

/// The resolver's oracle for candidate specifications.
pub trait SpecProvider {
    /// Candidates satisfying the requirement, ascending version order.
    ///
    /// The resolver inspects the list from the end, so the newest
    /// version is tried first.
    fn search_for(&self, requirement: &Requirement) -> Result<Vec<LocalSpec>>;

    fn dependencies_for(&self, spec: &LocalSpec) -> Result<Vec<Requirement>> {
        Ok(spec.depends.clone())
    }
}

/// The default provider: a vendor index plus a base directory against
/// which path-sourced requirements resolve.
///
/// A pinned source short-circuits the search: the requirement is its own
/// candidate, constraint and all.
pub struct VendorProvider {
    index: VendorIndex,
    base: PathBuf,
}

impl VendorProvider {
    pub fn new(index: VendorIndex, base: impl Into<PathBuf>) -> Self {
        Self {
            index,
            base: base.into(),
        }
    }
}

impl SpecProvider for VendorProvider {
    fn search_for(&self, requirement: &Requirement) -> Result<Vec<LocalSpec>> {
        if let RequirementSource::Path { path } = &requirement.source {
            let dir = self.base.join(path);
            if !dir.is_dir() {
                return Ok(Vec::new());
            }
            return match LocalSpec::from_dir(&dir) {
                Ok(spec) => Ok(vec![spec]),
                Err(e) => {
                    tracing::warn!(path = %dir.display(), error = %e, "unusable path dependency");
                    Ok(Vec::new())
                }
            };
        }
        self.index.find(requirement)
    }
}

/// One activated profile in the resolved set.
#[derive(Debug, Clone)]
pub struct ResolvedDependency {
    pub name: String,
    pub version: crate::version::Version,
    pub path: PathBuf,
    pub requirement: Requirement,
    /// Name of the profile that required this one; `None` for roots.
    pub parent: Option<String>,
}

/// The resolver's output: an acyclic set in topological order, every
/// profile preceding its own dependencies.
#[derive(Debug, Clone, Default)]
pub struct DependencySet {
    entries: Vec<ResolvedDependency>,
}

impl DependencySet {
    pub fn list(&self) -> &[ResolvedDependency] {
        &self.entries
    }

    pub fn get(&self, name: &str) -> Option<&ResolvedDependency> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Paths of every resolved profile, in resolution order.
    pub fn flatten(&self) -> Vec<&Path> {
        self.entries.iter().map(|e| e.path.as_path()).collect()
    }
}

#[derive(Debug, Clone)]
struct OpenDep {
    requirement: Requirement,
    parent: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct State {
    activated: Vec<ResolvedDependency>,
    index: HashMap<String, usize>,
    open: Vec<OpenDep>,
}

struct Frame {
    /// State as it was before this decision was taken.
    state: State,
    /// Untried candidates, ascending; popped newest-first.
    remaining: Vec<LocalSpec>,
    dep: OpenDep,
}

pub struct Resolver<'a> {
    provider: &'a dyn SpecProvider,
    provenance: &'static str,
    /// Memoized candidate counts, keyed by requirement rendering.
    /// Valid because `search_for` is pure.
    counts: HashMap<String, usize>,
    /// Names that have conflicted at least once this resolution.
    conflicts: BTreeSet<String>,
    /// Every requirement seen per name, for conflict reporting.
    requirements_on: HashMap<String, Vec<String>>,
}

impl<'a> Resolver<'a> {
    pub fn new(provider: &'a dyn SpecProvider) -> Self {
        Self::with_provenance(provider, EXPLICIT_SOURCE)
    }

    pub fn with_provenance(provider: &'a dyn SpecProvider, provenance: &'static str) -> Self {
        Self {
            provider,
            provenance,
            counts: HashMap::new(),
            conflicts: BTreeSet::new(),
            requirements_on: HashMap::new(),
        }
    }

    /// Resolve a set of root requirements to a dependency set.
    pub fn resolve(mut self, roots: &[Requirement]) -> Result<DependencySet> {
        let mut state = State::default();
        state.open = roots
            .iter()
            .map(|requirement| OpenDep {
                requirement: requirement.clone(),
                parent: None,
            })
            .collect();

        let mut stack: Vec<Frame> = Vec::new();

        loop {
            if state.open.is_empty() {
                return Ok(DependencySet {
                    entries: state.activated,
                });
            }

            self.sort_dependencies(&mut state)?;
            let dep = state.open.remove(0);
            let name = dep.requirement.name.clone();
            let described = self.describe(&dep);
            self.requirements_on
                .entry(name.clone())
                .or_default()
                .push(described);

            if let Some(&i) = state.index.get(&name) {
                let active = &state.activated[i];
                if dep
                    .requirement
                    .satisfied_by(&active.name, &active.version)
                {
                    self.check_cycle(&state, &dep)?;
                    continue;
                }
                self.conflicts.insert(name.clone());
                state = self.backtrack(&mut stack, &name)?;
                continue;
            }

            let mut candidates = self.provider.search_for(&dep.requirement)?;
            if candidates.is_empty() {
                if dep.requirement.optional {
                    continue;
                }
                self.conflicts.insert(name.clone());
                state = self.backtrack(&mut stack, &name)?;
                continue;
            }

            let choice = candidates.pop().expect("nonempty candidate list");
            stack.push(Frame {
                state: state.clone(),
                remaining: candidates,
                dep: dep.clone(),
            });
            self.activate(&mut state, &dep, choice)?;
        }
    }

    /// Order open requirements so easier subproblems are tried first:
    /// already-activated names, then previously conflicted names, then
    /// by ascending candidate count.
    fn sort_dependencies(&mut self, state: &mut State) -> Result<()> {
        let mut keys: HashMap<String, (u8, u8, usize)> = HashMap::new();
        for dep in &state.open {
            let rendered = dep.requirement.to_string();
            if keys.contains_key(&rendered) {
                continue;
            }
            let activated = u8::from(!state.index.contains_key(&dep.requirement.name));
            let conflicted = u8::from(!self.conflicts.contains(&dep.requirement.name));
            let count = match self.counts.get(&rendered) {
                Some(&count) => count,
                None => {
                    let count = self.provider.search_for(&dep.requirement)?.len();
                    self.counts.insert(rendered.clone(), count);
                    count
                }
            };
            keys.insert(rendered, (activated, conflicted, count));
        }
        state
            .open
            .sort_by_key(|dep| keys[&dep.requirement.to_string()]);
        Ok(())
    }

    fn activate(&mut self, state: &mut State, dep: &OpenDep, spec: LocalSpec) -> Result<()> {
        let name = spec.name.clone();
        state.index.insert(name.clone(), state.activated.len());
        state.activated.push(ResolvedDependency {
            name: name.clone(),
            version: spec.version.clone(),
            path: spec.path.clone(),
            requirement: dep.requirement.clone(),
            parent: dep.parent.clone(),
        });

        for requirement in self.provider.dependencies_for(&spec)? {
            state.open.push(OpenDep {
                requirement,
                parent: Some(name.clone()),
            });
        }
        Ok(())
    }

    /// A satisfied requirement that points back into its own ancestor
    /// chain closes a cycle.
    fn check_cycle(&self, state: &State, dep: &OpenDep) -> Result<()> {
        let target = &dep.requirement.name;
        let mut chain = Vec::new();
        let mut cursor = dep.parent.clone();
        while let Some(name) = cursor {
            chain.push(name.clone());
            if &name == target {
                let members: BTreeSet<String> = chain.into_iter().collect();
                return Err(ProfileError::CyclicDependency {
                    profiles: members.into_iter().collect(),
                });
            }
            cursor = state
                .index
                .get(&name)
                .and_then(|&i| state.activated[i].parent.clone());
        }
        Ok(())
    }

    /// Rewind to the most recent decision point with an untried
    /// candidate. With none left, the conflict is unsolvable.
    fn backtrack(&mut self, stack: &mut Vec<Frame>, failed: &str) -> Result<State> {
        while let Some(mut frame) = stack.pop() {
            if let Some(next) = frame.remaining.pop() {
                let mut state = frame.state.clone();
                let dep = frame.dep.clone();
                stack.push(frame);
                self.activate(&mut state, &dep, next)?;
                return Ok(state);
            }
        }
        Err(ProfileError::VersionConflict {
            name: failed.to_string(),
            requirements: self
                .requirements_on
                .remove(failed)
                .unwrap_or_default(),
        })
    }

    fn describe(&self, dep: &OpenDep) -> String {
        match &dep.parent {
            Some(parent) => format!("{} (required by {parent})", dep.requirement),
            None => format!("{} (required by {})", dep.requirement, self.provenance),
        }
    }
}
