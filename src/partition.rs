//! Partition-assignment value objects.
//!
//! A [`PartitionSpec`] maps each axis of a global array to the grid axes that split it. The
//! mini-language mirrors JAX's `PartitionSpec`:
//!
//! | JAX | gridshard |
//! |---|---|
//! | `None` | [`AxisAssignment::Replicated`] |
//! | `'x'` | [`AxisAssignment::along("x")`][AxisAssignment::along] |
//! | `('x', 'y')` | [`AxisAssignment::along_product(["x", "y"])`][AxisAssignment::along_product] |
//! | `P()` (rank `r`) | [`PartitionSpec::replicated(r)`][PartitionSpec::replicated] |
//!
//! A spec may be shorter than the array rank; trailing unspecified axes are implicitly
//! replicated. Parsing of any textual form is out of scope; assignments arrive already
//! structured.

use std::collections::HashSet;

use crate::errors::ShardingError;
use crate::grid::DeviceGrid;

/// Partition assignment for one axis of the global array.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum AxisAssignment {
    /// The axis is not split; every shard holds its full extent.
    Replicated,

    /// The axis is split across the product of the named grid axes, major to minor.
    ///
    /// A one-element list is the single-grid-axis case; with a 4x2 grid and
    /// `Along(["x", "y"])`, a dimension is split into `4 * 2 = 8` equal parts.
    Along(Vec<String>),
}

impl AxisAssignment {
    /// Creates a replicated (unassigned) axis assignment.
    pub fn replicated() -> Self {
        Self::Replicated
    }

    /// Creates an assignment splitting the axis along exactly one grid axis.
    pub fn along<N: Into<String>>(axis_name: N) -> Self {
        Self::Along(vec![axis_name.into()])
    }

    /// Creates an assignment splitting the axis along the product of several grid axes.
    pub fn along_product<I, N>(axis_names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: Into<String>,
    {
        Self::Along(axis_names.into_iter().map(Into::into).collect())
    }

    /// Returns the grid axes this assignment splits along, if any.
    pub fn grid_axes(&self) -> Option<&[String]> {
        match self {
            Self::Replicated => None,
            Self::Along(axis_names) => Some(axis_names.as_slice()),
        }
    }
}

/// Per-axis partition assignment for a global array.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PartitionSpec {
    assignments: Vec<AxisAssignment>,
}

impl PartitionSpec {
    /// Creates a partition specification from per-axis assignments.
    pub fn new(assignments: Vec<AxisAssignment>) -> Self {
        Self { assignments }
    }

    /// Creates a fully replicated specification for an array of rank `rank`.
    pub fn replicated(rank: usize) -> Self {
        Self { assignments: vec![AxisAssignment::Replicated; rank] }
    }

    /// Returns per-axis assignments. May be shorter than the array rank.
    pub fn assignments(&self) -> &[AxisAssignment] {
        self.assignments.as_slice()
    }

    /// Returns the assignment for `array_axis`, treating trailing unspecified axes as replicated.
    pub fn assignment(&self, array_axis: usize) -> &AxisAssignment {
        self.assignments.get(array_axis).unwrap_or(&AxisAssignment::Replicated)
    }

    /// Number of explicitly assigned array axes.
    pub fn rank(&self) -> usize {
        self.assignments.len()
    }

    /// Validates this specification against `grid` for an array of rank `array_rank`.
    ///
    /// Checks that the spec is no longer than the array rank, that every referenced grid axis
    /// exists, that no assigned axis has an empty grid-axis list, and that no grid axis is used
    /// more than once across the whole assignment.
    pub fn validate(&self, grid: &DeviceGrid, array_rank: usize) -> Result<(), ShardingError> {
        if self.assignments.len() > array_rank {
            return Err(ShardingError::AssignmentRankExceedsShape {
                assignment_rank: self.assignments.len(),
                array_rank,
            });
        }

        let mut used_axes = HashSet::new();
        for (array_axis, assignment) in self.assignments.iter().enumerate() {
            if let AxisAssignment::Along(axis_names) = assignment {
                if axis_names.is_empty() {
                    return Err(ShardingError::EmptyAssignmentAxisList { array_axis });
                }
                for axis_name in axis_names {
                    if grid.axis_index(axis_name).is_none() {
                        return Err(ShardingError::UnknownGridAxis { axis_name: axis_name.clone() });
                    }
                    if !used_axes.insert(axis_name.clone()) {
                        return Err(ShardingError::DuplicateAssignmentAxis { axis_name: axis_name.clone() });
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{GridAxis, GridDevice};

    fn test_grid_2x2() -> DeviceGrid {
        let axes = vec![GridAxis::new("x", 2).unwrap(), GridAxis::new("y", 2).unwrap()];
        let devices = vec![GridDevice::new(0, 0), GridDevice::new(1, 0), GridDevice::new(2, 0), GridDevice::new(3, 0)];
        DeviceGrid::new(axes, devices).unwrap()
    }

    #[test]
    fn test_partition_spec_accessors() {
        let spec = PartitionSpec::new(vec![AxisAssignment::along("x")]);
        assert_eq!(spec.rank(), 1);
        assert_eq!(spec.assignment(0), &AxisAssignment::along("x"));
        // Trailing axes beyond the explicit assignments are implicitly replicated.
        assert_eq!(spec.assignment(1), &AxisAssignment::Replicated);
        assert_eq!(spec.assignment(7), &AxisAssignment::Replicated);

        let replicated = PartitionSpec::replicated(3);
        assert_eq!(replicated.rank(), 3);
        assert!(replicated.assignments().iter().all(|a| *a == AxisAssignment::Replicated));

        assert_eq!(AxisAssignment::along_product(["x", "y"]).grid_axes(), Some(["x".to_string(), "y".to_string()].as_slice()));
        assert_eq!(AxisAssignment::replicated().grid_axes(), None);
    }

    #[test]
    fn test_partition_spec_validation() {
        let grid = test_grid_2x2();

        let valid = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::Replicated]);
        assert!(valid.validate(&grid, 2).is_ok());
        // A spec shorter than the array rank is valid.
        assert!(valid.validate(&grid, 3).is_ok());

        assert!(matches!(
            valid.validate(&grid, 1),
            Err(ShardingError::AssignmentRankExceedsShape { assignment_rank: 2, array_rank: 1 }),
        ));

        let unknown = PartitionSpec::new(vec![AxisAssignment::along("z")]);
        assert!(matches!(
            unknown.validate(&grid, 1),
            Err(ShardingError::UnknownGridAxis { axis_name }) if axis_name == "z",
        ));

        let duplicate = PartitionSpec::new(vec![AxisAssignment::along("x"), AxisAssignment::along("x")]);
        assert!(matches!(
            duplicate.validate(&grid, 2),
            Err(ShardingError::DuplicateAssignmentAxis { axis_name }) if axis_name == "x",
        ));

        let duplicate_in_product = PartitionSpec::new(vec![AxisAssignment::along_product(["x", "x"])]);
        assert!(matches!(
            duplicate_in_product.validate(&grid, 1),
            Err(ShardingError::DuplicateAssignmentAxis { axis_name }) if axis_name == "x",
        ));

        let empty = PartitionSpec::new(vec![AxisAssignment::Along(Vec::new())]);
        assert!(matches!(
            empty.validate(&grid, 1),
            Err(ShardingError::EmptyAssignmentAxisList { array_axis: 0 }),
        ));
    }
}
