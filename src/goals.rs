//! Time indexed goals

use std::ops::RangeInclusive;

use nalgebra::DVector;

use crate::error::{Result, TrajoptError};

/// Goal times closer than this are considered the same key.
pub const TIME_EPSILON: f64 = 1e-9;

/// Box target region over some state coordinates. The target itself is the box center.
#[derive(Debug, Clone, PartialEq)]
pub struct GoalRegion {
    pub lower: DVector<f64>,
    pub upper: DVector<f64>,
}

impl GoalRegion {
    pub fn new(lower: DVector<f64>, upper: DVector<f64>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(TrajoptError::dimension("goal region bounds", lower.len(), upper.len()));
        }
        if lower.iter().zip(upper.iter()).any(|(l, u)| !(l <= u) || !l.is_finite() || !u.is_finite()) {
            return Err(TrajoptError::InvalidParameter(format!(
                "goal region lower bound must not exceed upper: {:?} > {:?}",
                lower.as_slice(),
                upper.as_slice()
            )));
        }
        Ok(GoalRegion { lower, upper })
    }

    /// Region collapsed to a single point.
    pub fn point(target: DVector<f64>) -> Result<Self> {
        GoalRegion::new(target.clone(), target)
    }

    /// Region centered at `target`, extending `tolerance` to both sides along every coordinate.
    pub fn around(target: DVector<f64>, tolerance: f64) -> Result<Self> {
        let margin = DVector::from_element(target.len(), tolerance.abs());
        GoalRegion::new(&target - &margin, &target + &margin)
    }

    pub fn center(&self) -> DVector<f64> {
        (&self.lower + &self.upper) * 0.5
    }

    pub fn dim(&self) -> usize {
        self.lower.len()
    }

    pub fn contains(&self, values: &DVector<f64>, tolerance: f64) -> bool {
        values.len() == self.dim()
            && values
                .iter()
                .enumerate()
                .all(|(i, v)| *v >= self.lower[i] - tolerance && *v <= self.upper[i] + tolerance)
    }
}

/// Target region over the given state coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct Goal {
    pub indices: Vec<usize>,
    pub region: GoalRegion,
}

impl Goal {
    pub fn new(indices: Vec<usize>, region: GoalRegion) -> Result<Self> {
        if indices.len() != region.dim() {
            return Err(TrajoptError::dimension("goal indices", region.dim(), indices.len()));
        }
        Ok(Goal { indices, region })
    }

    /// Values of the goal coordinates taken from a full state vector.
    pub fn project(&self, x: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(self.indices.len(), self.indices.iter().map(|&i| x[i]))
    }
}

/// Time ordered multimap of goals. Duplicate times are allowed and entries
/// sharing the same time keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GoalSet {
    entries: Vec<(f64, Goal)>,
}

impl GoalSet {
    pub fn new() -> Self {
        GoalSet { entries: Vec::new() }
    }

    /// Inserts after all entries with the same (or earlier) time.
    pub fn insert(&mut self, time: f64, goal: Goal) {
        let at = self.entries.partition_point(|(t, _)| *t <= time + TIME_EPSILON);
        self.entries.insert(at, (time, goal));
    }

    pub fn with(mut self, time: f64, goal: Goal) -> Self {
        self.insert(time, goal);
        self
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(f64, Goal)> {
        self.entries.iter()
    }

    /// Entries with times inside the inclusive range, in time then insertion order.
    pub fn in_range(&self, range: RangeInclusive<f64>) -> &[(f64, Goal)] {
        let from = self
            .entries
            .partition_point(|(t, _)| *t < *range.start() - TIME_EPSILON);
        let to = self
            .entries
            .partition_point(|(t, _)| *t <= *range.end() + TIME_EPSILON);
        if from >= to {
            &[]
        } else {
            &self.entries[from..to]
        }
    }

    /// Goals active exactly at the given time.
    pub fn at(&self, time: f64) -> &[(f64, Goal)] {
        self.in_range(time..=time)
    }

    /// Last time of any goal, None for the empty set.
    pub fn last_time(&self) -> Option<f64> {
        self.entries.last().map(|(t, _)| *t)
    }

    /// Writes the region centers of all goals at `time` into `x`, in insertion order.
    /// Later goals overwrite earlier ones at overlapping coordinates. Returns the
    /// coordinates that were written, sorted and without duplicates.
    pub fn write_targets(&self, time: f64, x: &mut DVector<f64>) -> Vec<usize> {
        let mut written = Vec::new();
        for (_, goal) in self.at(time) {
            let center = goal.region.center();
            for (k, &index) in goal.indices.iter().enumerate() {
                x[index] = center[k];
                written.push(index);
            }
        }
        written.sort_unstable();
        written.dedup();
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point_goal(indices: Vec<usize>, values: Vec<f64>) -> Goal {
        Goal::new(indices, GoalRegion::point(DVector::from_vec(values)).expect("region"))
            .expect("goal")
    }

    #[test]
    fn test_sorted_with_stable_duplicates() {
        let goals = GoalSet::new()
            .with(5.0, point_goal(vec![0], vec![1.0]))
            .with(1.0, point_goal(vec![0], vec![2.0]))
            .with(5.0, point_goal(vec![0], vec![3.0]))
            .with(3.0, point_goal(vec![0], vec![4.0]));

        let times: Vec<f64> = goals.iter().map(|(t, _)| *t).collect();
        assert_eq!(times, vec![1.0, 3.0, 5.0, 5.0]);

        let at_five = goals.at(5.0);
        assert_eq!(at_five.len(), 2);
        assert_eq!(at_five[0].1.region.center()[0], 1.0);
        assert_eq!(at_five[1].1.region.center()[0], 3.0);
        assert_eq!(goals.last_time(), Some(5.0));
    }

    #[test]
    fn test_range_queries() {
        let goals = GoalSet::new()
            .with(0.5, point_goal(vec![0], vec![1.0]))
            .with(2.0, point_goal(vec![1], vec![2.0]))
            .with(4.0, point_goal(vec![2], vec![3.0]));
        assert_eq!(goals.in_range(0.0..=2.0).len(), 2);
        assert_eq!(goals.in_range(2.0..=4.0).len(), 2);
        assert!(goals.in_range(2.5..=3.5).is_empty());
        assert!(goals.at(1.0).is_empty());
    }

    #[test]
    fn test_later_goal_wins() {
        let goals = GoalSet::new()
            .with(10.0, point_goal(vec![0, 1, 2], vec![1.0, 2.0, 3.0]))
            .with(10.0, point_goal(vec![2, 3], vec![7.0, 8.0]));
        let mut x = DVector::zeros(6);
        let written = goals.write_targets(10.0, &mut x);
        assert_eq!(written, vec![0, 1, 2, 3]);
        assert_eq!(x.as_slice(), &[1.0, 2.0, 7.0, 8.0, 0.0, 0.0]);
    }

    #[test]
    fn test_region_validation() {
        assert!(GoalRegion::new(DVector::from_vec(vec![1.0]), DVector::from_vec(vec![0.0])).is_err());
        assert!(GoalRegion::new(DVector::zeros(2), DVector::zeros(3)).is_err());
        let region = GoalRegion::around(DVector::from_vec(vec![1.0, 2.0]), 0.5).expect("region");
        assert_eq!(region.center().as_slice(), &[1.0, 2.0]);
        assert!(region.contains(&DVector::from_vec(vec![1.4, 1.6]), 0.0));
        assert!(!region.contains(&DVector::from_vec(vec![1.6, 2.0]), 0.0));
        assert!(Goal::new(vec![0, 1, 2], region).is_err());
    }
}
