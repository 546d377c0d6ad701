use crate::errors::{Result, StackError};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

/// The forest of tracked branches rooted at trunk
#[derive(Debug, Clone)]
pub struct BranchGraph {
    trunk: String,
    bases: HashMap<String, String>,
    /// Children of each branch, sorted by name
    aboves: BTreeMap<String, Vec<String>>,
}

impl BranchGraph {
    /// Build the graph from `(branch, base)` edges
    pub fn new<I>(trunk: impl Into<String>, edges: I) -> Self
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let mut bases = HashMap::new();
        let mut aboves: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, base) in edges {
            aboves.entry(base.clone()).or_default().push(name.clone());
            bases.insert(name, base);
        }
        for children in aboves.values_mut() {
            children.sort();
        }

        Self {
            trunk: trunk.into(),
            bases,
            aboves,
        }
    }

    pub fn trunk(&self) -> &str {
        &self.trunk
    }

    /// Base of a tracked branch
    pub fn base(&self, name: &str) -> Option<&str> {
        self.bases.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        name == self.trunk || self.bases.contains_key(name)
    }

    /// Branches based directly on `name`
    pub fn list_above(&self, name: &str) -> Vec<String> {
        self.aboves.get(name).cloned().unwrap_or_default()
    }

    /// `name` and everything stacked on it, breadth first. A branch never
    /// comes before its base.
    pub fn list_upstack(&self, name: &str) -> Result<Vec<String>> {
        let mut upstack = Vec::new();
        let mut visited = HashSet::new();
        let mut parents: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([name]);
        visited.insert(name);

        while let Some(current) = queue.pop_front() {
            upstack.push(current.to_string());
            for child in self.aboves.get(current).into_iter().flatten() {
                if !visited.insert(child.as_str()) {
                    return Err(StackError::Cycle {
                        path: cycle_path(&parents, current, child),
                    });
                }
                parents.insert(child.as_str(), current);
                queue.push_back(child.as_str());
            }
        }

        Ok(upstack)
    }

    /// Branches at the top of the stacks above `name` (`name` itself if
    /// nothing is stacked on it)
    pub fn find_top(&self, name: &str) -> Result<Vec<String>> {
        Ok(self
            .list_upstack(name)?
            .into_iter()
            .filter(|b| self.aboves.get(b).map_or(true, Vec::is_empty))
            .collect())
    }

    /// The branch directly on trunk below `name`.
    ///
    /// # Panics
    ///
    /// If `name` is the trunk branch.
    pub fn find_bottom(&self, name: &str) -> Result<String> {
        assert_ne!(name, self.trunk, "trunk has no bottom branch");

        let downstack = self.list_downstack(name)?;
        downstack
            .last()
            .cloned()
            .ok_or_else(|| StackError::NotTracked(name.to_string()))
    }

    /// `name` followed by its bases, down to (not including) trunk
    pub fn list_downstack(&self, name: &str) -> Result<Vec<String>> {
        let mut downstack = Vec::new();
        let mut visited = HashSet::new();
        let mut current = name;

        while current != self.trunk {
            if !visited.insert(current) {
                let start = downstack.iter().position(|b| b == current).unwrap_or(0);
                let mut path: Vec<String> = downstack[start..].to_vec();
                path.push(current.to_string());
                return Err(StackError::Cycle { path });
            }
            downstack.push(current.to_string());
            current = self
                .bases
                .get(current)
                .map(String::as_str)
                .ok_or_else(|| StackError::NotTracked(current.to_string()))?;
        }

        Ok(downstack)
    }

    /// The whole stack through `name`: bases from the bottom up, then
    /// `name` and its upstack
    pub fn list_stack(&self, name: &str) -> Result<Vec<String>> {
        let mut stack = if name == self.trunk {
            Vec::new()
        } else {
            let mut downstack = self.list_downstack(name)?;
            downstack.remove(0);
            downstack.reverse();
            downstack
        };
        stack.extend(self.list_upstack(name)?);
        Ok(stack)
    }

    /// Indented tree of `root` and everything above it
    pub fn render_tree(&self, root: &str) -> Result<String> {
        let mut out = String::new();
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        self.render_node(root, 0, &mut visited, &mut path, &mut out)?;
        Ok(out)
    }

    fn render_node<'a>(
        &'a self,
        name: &'a str,
        depth: usize,
        visited: &mut HashSet<&'a str>,
        path: &mut Vec<String>,
        out: &mut String,
    ) -> Result<()> {
        path.push(name.to_string());
        if !visited.insert(name) {
            let start = path.iter().position(|b| b == name).unwrap_or(0);
            return Err(StackError::Cycle {
                path: path[start..].to_vec(),
            });
        }

        out.push_str(&"  ".repeat(depth));
        out.push_str(name);
        out.push('\n');

        for child in self.aboves.get(name).into_iter().flatten() {
            self.render_node(child, depth + 1, visited, path, out)?;
        }
        path.pop();
        Ok(())
    }
}

/// `child -> ... -> current -> child`, following recorded BFS parents
fn cycle_path(parents: &HashMap<&str, &str>, current: &str, child: &str) -> Vec<String> {
    let mut path = vec![current.to_string()];
    let mut node = current;
    while node != child {
        match parents.get(node) {
            Some(parent) => {
                node = parent;
                path.push(node.to_string());
            }
            None => break,
        }
    }
    path.reverse();
    if path.first().map(String::as_str) != Some(child) {
        path.insert(0, child.to_string());
    }
    path.push(child.to_string());
    path
}
