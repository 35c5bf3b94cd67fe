//! Variables of the selected frame.
//!
//! Roots are the frame's locals plus any watch expressions. Each expandable
//! root may have its children fetched once, one level deep. Every
//! replacement of the roots starts a new generation, and a fetch that
//! completes after its generation has passed is discarded.

use parking_lot::Mutex;

use crate::{
    error::{Result, SessionError},
    gateway::{CommandGateway, GatewayExt},
    types::{Variable, VariableNode},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expansion {
    Collapsed,
    /// Children have been requested but not received.
    Pending,
    Expanded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpandOutcome {
    /// Children were fetched and appended.
    Expanded(usize),
    /// Children are already present or already being fetched.
    AlreadyExpanded,
    /// The roots were replaced while the fetch was in flight.
    Stale,
}

#[derive(Debug)]
struct RootEntry {
    node: VariableNode,
    children: Vec<VariableNode>,
    expansion: Expansion,
}

impl RootEntry {
    fn new(node: VariableNode) -> Self {
        Self {
            node,
            children: Vec::new(),
            expansion: Expansion::Collapsed,
        }
    }
}

#[derive(Debug, Default)]
struct Tree {
    generation: u64,
    roots: Vec<RootEntry>,
}

impl Tree {
    fn replace(&mut self, variables: Vec<Variable>) -> u64 {
        self.generation += 1;
        self.roots = variables
            .into_iter()
            .map(|variable| RootEntry::new(VariableNode::root(variable.name.clone(), variable)))
            .collect();
        tracing::debug!(generation = self.generation, roots = self.roots.len(), "variable roots set");
        self.generation
    }
}

#[derive(Debug, Default)]
pub struct VariableTreeCache {
    tree: Mutex<Tree>,
}

impl VariableTreeCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn generation(&self) -> u64 {
        self.tree.lock().generation
    }

    /// Replace every root. Returns the new generation.
    pub fn set_roots(&self, variables: Vec<Variable>) -> u64 {
        self.tree.lock().replace(variables)
    }

    /// Install roots fetched during `generation`, unless the tree has moved
    /// on since. Returns the new generation if they were installed.
    pub(crate) fn set_roots_if_current(
        &self,
        generation: u64,
        variables: Vec<Variable>,
    ) -> Option<u64> {
        let mut tree = self.tree.lock();
        if tree.generation != generation {
            tracing::debug!(generation, current = tree.generation, "discarding stale frame variables");
            return None;
        }
        Some(tree.replace(variables))
    }

    /// Drop every root. Returns the new generation.
    pub fn clear(&self) -> u64 {
        let mut tree = self.tree.lock();
        tree.generation += 1;
        tree.roots.clear();
        tree.generation
    }

    /// Fetch the children of the root addressed by `expression`.
    ///
    /// On failure the root stays collapsed so a later call can try again.
    #[tracing::instrument(skip(self, gateway))]
    pub async fn expand<G>(&self, gateway: &G, expression: &str) -> Result<ExpandOutcome>
    where
        G: CommandGateway + ?Sized,
    {
        let (generation, slot, handle) = {
            let mut tree = self.tree.lock();
            let generation = tree.generation;
            let (slot, entry) = tree
                .roots
                .iter_mut()
                .enumerate()
                .find(|(_, entry)| entry.node.expression == expression)
                .ok_or_else(|| SessionError::UnknownVariable(expression.to_string()))?;
            if !entry.node.is_expandable() {
                return Err(SessionError::NotExpandable(expression.to_string()));
            }
            if entry.expansion != Expansion::Collapsed {
                return Ok(ExpandOutcome::AlreadyExpanded);
            }
            entry.expansion = Expansion::Pending;
            (generation, slot, entry.node.handle.clone())
        };

        let fetched = gateway.variable_list_children(&handle).await;

        let mut tree = self.tree.lock();
        if tree.generation != generation {
            tracing::debug!(generation, current = tree.generation, "discarding stale children");
            return Ok(ExpandOutcome::Stale);
        }
        // roots are only appended to within a generation
        let Some(entry) = tree.roots.get_mut(slot) else {
            return Ok(ExpandOutcome::Stale);
        };
        match fetched {
            Ok(children) => {
                let parent = entry.node.expression.clone();
                entry.children = children
                    .into_iter()
                    .map(|child| VariableNode::child(&parent, child))
                    .collect();
                entry.expansion = Expansion::Expanded;
                Ok(ExpandOutcome::Expanded(entry.children.len()))
            }
            Err(e) => {
                entry.expansion = Expansion::Collapsed;
                Err(e)
            }
        }
    }

    /// Evaluate `expression` in the current frame and add it as a root.
    ///
    /// Returns `None` if the roots were replaced while it was evaluated.
    /// Backend errors are returned unchanged.
    #[tracing::instrument(skip(self, gateway))]
    pub async fn create_watch<G>(&self, gateway: &G, expression: &str) -> Result<Option<VariableNode>>
    where
        G: CommandGateway + ?Sized,
    {
        let generation = self.generation();
        let variable = gateway.variable_create(expression).await?;

        let mut tree = self.tree.lock();
        if tree.generation != generation {
            tracing::debug!(%expression, "discarding stale watch");
            return Ok(None);
        }
        let node = VariableNode::root(expression, variable);
        tree.roots.push(RootEntry::new(node.clone()));
        Ok(Some(node))
    }

    /// How far the root addressed by `expression` has been expanded.
    pub fn expansion(&self, expression: &str) -> Option<Expansion> {
        self.tree
            .lock()
            .roots
            .iter()
            .find(|entry| entry.node.expression == expression)
            .map(|entry| entry.expansion)
    }

    /// The display list: each root followed by its fetched children.
    pub fn list(&self) -> Vec<VariableNode> {
        let tree = self.tree.lock();
        tree.roots
            .iter()
            .flat_map(|entry| std::iter::once(&entry.node).chain(&entry.children))
            .cloned()
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.lock().roots.is_empty()
    }
}
