//! Dataset groups.
//!
//! A [`Group`] owns its dimensions, variables, and child groups; ownership is
//! strictly downward from the dataset. Names are compared by value
//! throughout, and name collisions within a namespace are rejected.

use std::collections::BTreeMap;

use thiserror::Error;

use crate::data_type::AttrValue;
use crate::dimension::Dimension;
use crate::variable::Variable;

/// A group of dimensions, variables, and child groups.
#[derive(Debug)]
pub struct Group {
    name: String,
    attributes: BTreeMap<String, AttrValue>,
    dimensions: BTreeMap<String, Dimension>,
    variables: BTreeMap<String, Variable>,
    groups: BTreeMap<String, Group>,
}

impl Group {
    /// Create an empty group.
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attributes: BTreeMap::new(),
            dimensions: BTreeMap::new(),
            variables: BTreeMap::new(),
            groups: BTreeMap::new(),
        }
    }

    /// The name of the group.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The attributes of the group.
    #[must_use]
    pub fn attributes(&self) -> &BTreeMap<String, AttrValue> {
        &self.attributes
    }

    /// Mutably borrow the attributes of the group.
    pub fn attributes_mut(&mut self) -> &mut BTreeMap<String, AttrValue> {
        &mut self.attributes
    }

    /// Add a dimension to the group.
    ///
    /// # Errors
    /// Returns [`GroupError::AlreadyExists`] if a dimension with the same name exists.
    pub fn add_dimension(&mut self, dimension: Dimension) -> Result<&mut Dimension, GroupError> {
        let name = dimension.name().to_string();
        if self.dimensions.contains_key(&name) {
            return Err(GroupError::AlreadyExists { name });
        }
        Ok(self.dimensions.entry(name).or_insert(dimension))
    }

    /// The dimension named `name`.
    #[must_use]
    pub fn dimension(&self, name: &str) -> Option<&Dimension> {
        self.dimensions.get(name)
    }

    /// The dimension named `name`, mutably.
    #[must_use]
    pub fn dimension_mut(&mut self, name: &str) -> Option<&mut Dimension> {
        self.dimensions.get_mut(name)
    }

    /// The dimensions of the group.
    #[must_use]
    pub fn dimensions(&self) -> &BTreeMap<String, Dimension> {
        &self.dimensions
    }

    /// Add a variable to the group.
    ///
    /// # Errors
    /// Returns [`GroupError::AlreadyExists`] if a variable with the same name exists.
    pub fn add_variable(&mut self, variable: Variable) -> Result<&mut Variable, GroupError> {
        let name = variable.name().to_string();
        if self.variables.contains_key(&name) {
            return Err(GroupError::AlreadyExists { name });
        }
        Ok(self.variables.entry(name).or_insert(variable))
    }

    /// The variable named `name`.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&Variable> {
        self.variables.get(name)
    }

    /// The variable named `name`, mutably.
    #[must_use]
    pub fn variable_mut(&mut self, name: &str) -> Option<&mut Variable> {
        self.variables.get_mut(name)
    }

    /// The variables of the group.
    #[must_use]
    pub fn variables(&self) -> &BTreeMap<String, Variable> {
        &self.variables
    }

    /// Mutably borrow the variables of the group.
    pub fn variables_mut(&mut self) -> &mut BTreeMap<String, Variable> {
        &mut self.variables
    }

    /// Rename a variable within the group.
    ///
    /// # Errors
    /// Returns [`GroupError::NotFound`] if `from` does not exist, or
    /// [`GroupError::AlreadyExists`] if `to` does.
    pub fn rename_variable(&mut self, from: &str, to: &str) -> Result<(), GroupError> {
        if self.variables.contains_key(to) {
            return Err(GroupError::AlreadyExists {
                name: to.to_string(),
            });
        }
        let mut variable = self
            .variables
            .remove(from)
            .ok_or_else(|| GroupError::NotFound {
                name: from.to_string(),
            })?;
        variable.rename(to);
        self.variables.insert(to.to_string(), variable);
        Ok(())
    }

    /// Add a child group.
    ///
    /// # Errors
    /// Returns [`GroupError::AlreadyExists`] if a child group with the same name exists.
    pub fn add_group(&mut self, name: &str) -> Result<&mut Group, GroupError> {
        if self.groups.contains_key(name) {
            return Err(GroupError::AlreadyExists {
                name: name.to_string(),
            });
        }
        Ok(self
            .groups
            .entry(name.to_string())
            .or_insert_with(|| Group::new(name)))
    }

    /// The child group named `name`.
    #[must_use]
    pub fn group(&self, name: &str) -> Option<&Group> {
        self.groups.get(name)
    }

    /// The child group named `name`, mutably.
    #[must_use]
    pub fn group_mut(&mut self, name: &str) -> Option<&mut Group> {
        self.groups.get_mut(name)
    }

    /// The child groups.
    #[must_use]
    pub fn groups(&self) -> &BTreeMap<String, Group> {
        &self.groups
    }

    /// Walk to the group at a `/`-separated `path` relative to this group.
    #[must_use]
    pub fn find(&self, path: &str) -> Option<&Group> {
        let mut group = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            group = group.groups.get(segment)?;
        }
        Some(group)
    }

    /// Walk to the group at a `/`-separated `path` relative to this group, mutably.
    #[must_use]
    pub fn find_mut(&mut self, path: &str) -> Option<&mut Group> {
        let mut group = self;
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            group = group.groups.get_mut(segment)?;
        }
        Some(group)
    }
}

/// A group namespace error.
#[derive(Clone, Debug, Error)]
pub enum GroupError {
    /// The name is already in use.
    #[error("{name} already exists")]
    AlreadyExists {
        /// The colliding name.
        name: String,
    },
    /// No such member.
    #[error("{name} does not exist")]
    NotFound {
        /// The missing name.
        name: String,
    },
}

#[cfg(test)]
mod tests {
    use crate::data_type::DataType;

    use super::*;

    #[test]
    fn namespaces() {
        let mut root = Group::new("root");
        root.add_dimension(Dimension::new("x", Some(4))).unwrap();
        assert!(root.add_dimension(Dimension::new("x", Some(8))).is_err());
        assert_eq!(root.dimension("x").unwrap().len(), 4);

        root.add_variable(Variable::new_classical(
            "t",
            DataType::Float32,
            vec!["x".to_string()],
            vec![4],
            None,
        ))
        .unwrap();
        assert!(root
            .add_variable(Variable::new_classical(
                "t",
                DataType::Float32,
                vec![],
                vec![],
                None,
            ))
            .is_err());

        // Dimensions and variables are separate namespaces: a dimension variable shares its
        // dimension's name.
        root.add_variable(Variable::new_classical(
            "x",
            DataType::Float64,
            vec!["x".to_string()],
            vec![4],
            None,
        ))
        .unwrap();
    }

    #[test]
    fn nested_lookup() {
        let mut root = Group::new("root");
        root.add_group("a").unwrap().add_group("b").unwrap();
        assert!(root.add_group("a").is_err());
        assert!(root.find("a/b").is_some());
        assert!(root.find("a/c").is_none());
        assert_eq!(root.find("").unwrap().name(), "root");
        root.find_mut("a/b")
            .unwrap()
            .attributes_mut()
            .insert("k".to_string(), AttrValue::from(1i64));
        assert_eq!(
            root.find("a/b").unwrap().attributes().get("k"),
            Some(&AttrValue::from(1i64))
        );
    }

    #[test]
    fn rename_variable() {
        let mut root = Group::new("root");
        root.add_variable(Variable::new_classical(
            "t",
            DataType::Int32,
            vec![],
            vec![],
            None,
        ))
        .unwrap();
        root.rename_variable("t", "temperature").unwrap();
        assert!(root.variable("t").is_none());
        assert_eq!(root.variable("temperature").unwrap().name(), "temperature");
        assert!(root.rename_variable("missing", "x").is_err());
    }
}
