//! Declaration diff.
//!
//! Compares two declarations by content digest, resource by resource
//! and property by property. Only names are reported, never values, so a
//! diff is safe to print even when a secret changed.

use crate::declare::Declaration;
use crate::resource::Resource;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeType {
    /// Present only on the right
    Added,
    /// Present only on the left
    Removed,
    /// Present on both sides with different content
    Modified,
}

impl ChangeType {
    fn symbol(self) -> char {
        match self {
            Self::Added => '+',
            Self::Removed => '-',
            Self::Modified => '~',
        }
    }
}

/// Change to one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    /// Logical name
    pub name: String,
    /// Provider type token (right side when present)
    pub type_token: String,
    /// Type of change
    pub change_type: ChangeType,
    /// Changed properties, for modifications
    pub properties: Vec<String>,
}

/// Change to one exported value
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputChange {
    /// Export name
    pub name: String,
    /// Type of change
    pub change_type: ChangeType,
}

/// Summary counts
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffSummary {
    /// Resources and outputs added
    pub added_count: usize,
    /// Resources and outputs removed
    pub removed_count: usize,
    /// Resources and outputs modified
    pub modified_count: usize,
}

/// Result of comparing two declarations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeclarationDiff {
    /// Whether the declarations are equivalent
    pub equivalent: bool,
    /// Summary counts
    pub summary: DiffSummary,
    /// Resource changes, left order then right-only additions
    pub resources: Vec<ResourceChange>,
    /// Output changes
    pub outputs: Vec<OutputChange>,
}

impl DeclarationDiff {
    /// Resource change by name
    #[must_use]
    pub fn resource(&self, name: &str) -> Option<&ResourceChange> {
        self.resources.iter().find(|c| c.name == name)
    }

    /// Output change by name
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&OutputChange> {
        self.outputs.iter().find(|c| c.name == name)
    }
}

impl fmt::Display for DeclarationDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.equivalent {
            return writeln!(f, "no changes");
        }
        for change in &self.resources {
            write!(f, "{} {} ({})", change.change_type.symbol(), change.name, change.type_token)?;
            if !change.properties.is_empty() {
                write!(f, ": {}", change.properties.join(", "))?;
            }
            writeln!(f)?;
        }
        for change in &self.outputs {
            writeln!(f, "{} output {}", change.change_type.symbol(), change.name)?;
        }
        writeln!(
            f,
            "{} added, {} removed, {} modified",
            self.summary.added_count, self.summary.removed_count, self.summary.modified_count
        )
    }
}

/// Names of the properties that differ between two versions of a resource,
/// compared by in-process digest so a password change is seen too
fn changed_properties(before: &Resource, after: &Resource) -> Vec<String> {
    let old = before.property_digests();
    let new = after.property_digests();
    let mut properties: Vec<String> = new
        .iter()
        .filter(|(name, digest)| old.get(*name) != Some(*digest))
        .map(|(name, _)| name.clone())
        .collect();
    properties.extend(old.keys().filter(|name| !new.contains_key(*name)).cloned());
    if before.type_token() != after.type_token() {
        properties.insert(0, "type".to_string());
    }
    if before.depends_on != after.depends_on {
        properties.push("dependsOn".to_string());
    }
    properties
}

/// Compare two declarations
#[must_use]
pub fn diff(left: &Declaration, right: &Declaration) -> DeclarationDiff {
    let mut resources = Vec::new();

    for before in left.resources() {
        match right.get(&before.name) {
            None => resources.push(ResourceChange {
                name: before.name.clone(),
                type_token: before.type_token().to_string(),
                change_type: ChangeType::Removed,
                properties: Vec::new(),
            }),
            Some(after) => {
                let properties = changed_properties(before, after);
                if !properties.is_empty() {
                    resources.push(ResourceChange {
                        name: before.name.clone(),
                        type_token: after.type_token().to_string(),
                        change_type: ChangeType::Modified,
                        properties,
                    });
                }
            }
        }
    }
    for after in right.resources() {
        if left.get(&after.name).is_none() {
            resources.push(ResourceChange {
                name: after.name.clone(),
                type_token: after.type_token().to_string(),
                change_type: ChangeType::Added,
                properties: Vec::new(),
            });
        }
    }

    let mut outputs = Vec::new();
    for before in left.outputs() {
        match right.output(&before.name) {
            None => outputs.push(OutputChange {
                name: before.name.clone(),
                change_type: ChangeType::Removed,
            }),
            Some(after) if after.value.digest() != before.value.digest() => {
                outputs.push(OutputChange {
                    name: before.name.clone(),
                    change_type: ChangeType::Modified,
                });
            }
            Some(_) => {}
        }
    }
    for after in right.outputs() {
        if left.output(&after.name).is_none() {
            outputs.push(OutputChange {
                name: after.name.clone(),
                change_type: ChangeType::Added,
            });
        }
    }

    let mut summary = DiffSummary::default();
    let kinds = resources
        .iter()
        .map(|c| c.change_type)
        .chain(outputs.iter().map(|c| c.change_type));
    for kind in kinds {
        match kind {
            ChangeType::Added => summary.added_count += 1,
            ChangeType::Removed => summary.removed_count += 1,
            ChangeType::Modified => summary.modified_count += 1,
        }
    }

    DeclarationDiff {
        equivalent: resources.is_empty() && outputs.is_empty(),
        summary,
        resources,
        outputs,
    }
}
