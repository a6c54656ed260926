use std::{
    fmt,
    ops::{Index, IndexMut},
};

use serde::{Deserialize, Serialize};

/// One of the three stage directions. The order is fixed and doubles as the
/// channel index: X is 0, Y is 1, Z is 2.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A value for each axis.
///
/// Move requests are `PerAxis<Option<f64>>` where `None` leaves the axis
/// alone; voltage and position triples are `PerAxis<f64>`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PerAxis<T> {
    pub x: T,
    pub y: T,
    pub z: T,
}

impl<T> PerAxis<T> {
    pub const fn new(x: T, y: T, z: T) -> Self {
        Self { x, y, z }
    }

    pub fn from_fn(mut f: impl FnMut(Axis) -> T) -> Self {
        Self {
            x: f(Axis::X),
            y: f(Axis::Y),
            z: f(Axis::Z),
        }
    }

    pub fn map<U>(self, mut f: impl FnMut(T) -> U) -> PerAxis<U> {
        PerAxis {
            x: f(self.x),
            y: f(self.y),
            z: f(self.z),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Axis, &T)> {
        Axis::ALL.into_iter().map(move |axis| (axis, &self[axis]))
    }

    pub fn into_array(self) -> [T; 3] {
        [self.x, self.y, self.z]
    }
}

impl<T> PerAxis<Option<T>> {
    pub const fn none() -> Self {
        Self {
            x: None,
            y: None,
            z: None,
        }
    }

    /// Request for a single axis, leaving the other two untouched.
    pub fn only(axis: Axis, value: T) -> Self {
        Self::none().with(axis, value)
    }

    pub fn with(mut self, axis: Axis, value: T) -> Self {
        self[axis] = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_none() && self.y.is_none() && self.z.is_none()
    }

    /// Axes carrying a value, in X, Y, Z order.
    pub fn present(&self) -> impl Iterator<Item = (Axis, &T)> {
        self.iter()
            .filter_map(|(axis, value)| value.as_ref().map(|v| (axis, v)))
    }
}

impl<T> From<[T; 3]> for PerAxis<T> {
    fn from([x, y, z]: [T; 3]) -> Self {
        Self { x, y, z }
    }
}

impl<T> Index<Axis> for PerAxis<T> {
    type Output = T;

    fn index(&self, axis: Axis) -> &T {
        match axis {
            Axis::X => &self.x,
            Axis::Y => &self.y,
            Axis::Z => &self.z,
        }
    }
}

impl<T> IndexMut<Axis> for PerAxis<T> {
    fn index_mut(&mut self, axis: Axis) -> &mut T {
        match axis {
            Axis::X => &mut self.x,
            Axis::Y => &mut self.y,
            Axis::Z => &mut self.z,
        }
    }
}
