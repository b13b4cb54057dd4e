//! Region geometry: walkable grid, links between regions and pathfinding.
//!
//! Geometry is configured directly (no map files). A region is a
//! `width x height` grid with optional blocked fields. Stepping onto a
//! field that carries a [`RegionLink`] at the end of a walk either
//! teleports the player inside the same region or starts a handoff to
//! another region.

use crate::types::{Direction, Field, RegionId};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet, VecDeque};

/// How a link maps the arrival field into the target region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CoordTransform {
    /// Shift by a fixed offset.
    Translate { dx: i32, dy: i32 },
    /// Jump to a fixed field.
    Place { x: i32, y: i32 },
}

impl CoordTransform {
    pub fn apply(&self, field: Field) -> Field {
        match *self {
            CoordTransform::Translate { dx, dy } => Field::new(field.x + dx, field.y + dy),
            CoordTransform::Place { x, y } => Field::new(x, y),
        }
    }
}

/// An outgoing link on one field of a region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionLink {
    pub at: Field,
    pub target: RegionId,
    pub transform: CoordTransform,
}

/// Grid of one region.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionMap {
    pub id: RegionId,
    pub width: i32,
    pub height: i32,
    #[serde(default)]
    pub blocked: HashSet<Field>,
    #[serde(default)]
    pub links: Vec<RegionLink>,
}

impl RegionMap {
    pub fn new(id: impl Into<RegionId>, width: i32, height: i32) -> Self {
        Self {
            id: id.into(),
            width,
            height,
            blocked: HashSet::new(),
            links: Vec::new(),
        }
    }

    pub fn with_blocked(mut self, fields: impl IntoIterator<Item = Field>) -> Self {
        self.blocked.extend(fields);
        self
    }

    pub fn with_link(mut self, at: Field, target: impl Into<RegionId>, transform: CoordTransform) -> Self {
        self.links.push(RegionLink {
            at,
            target: target.into(),
            transform,
        });
        self
    }

    pub fn contains(&self, field: Field) -> bool {
        (0..self.width).contains(&field.x) && (0..self.height).contains(&field.y)
    }

    pub fn is_walkable(&self, field: Field) -> bool {
        self.contains(field) && !self.blocked.contains(&field)
    }

    pub fn link_at(&self, field: Field) -> Option<&RegionLink> {
        self.links.iter().find(|link| link.at == field)
    }

    /// Shortest 4-neighbour path from `from` to `to`.
    ///
    /// The returned waypoints exclude `from` and end with `to`; an empty path
    /// means the player already stands on the target. `None` if `to` is not
    /// reachable.
    pub fn find_path(&self, from: Field, to: Field) -> Option<Vec<Field>> {
        if from == to {
            return Some(Vec::new());
        }
        if !self.is_walkable(to) {
            return None;
        }

        let mut came_from: HashMap<Field, Field> = HashMap::new();
        let mut frontier = VecDeque::from([from]);
        came_from.insert(from, from);

        while let Some(current) = frontier.pop_front() {
            if current == to {
                let mut path = vec![to];
                let mut cursor = to;
                while let Some(&previous) = came_from.get(&cursor) {
                    if previous == from {
                        break;
                    }
                    path.push(previous);
                    cursor = previous;
                }
                path.reverse();
                return Some(path);
            }

            for direction in Direction::ALL {
                let next = current.step(direction);
                if self.is_walkable(next) && !came_from.contains_key(&next) {
                    came_from.insert(next, current);
                    frontier.push_back(next);
                }
            }
        }
        None
    }

    /// Checks the grid on its own; cross-region link targets are checked by
    /// the server configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().is_empty() {
            return Err("Region id must not be empty".to_string());
        }
        if self.width <= 0 || self.height <= 0 {
            return Err(format!(
                "Region {} has invalid size {}x{}",
                self.id, self.width, self.height
            ));
        }
        if let Some(field) = self.blocked.iter().find(|f| !self.contains(**f)) {
            return Err(format!("Region {} blocks {} outside its grid", self.id, field));
        }

        let mut seen = HashSet::new();
        for link in &self.links {
            if !self.is_walkable(link.at) {
                return Err(format!(
                    "Region {} has a link on unwalkable field {}",
                    self.id, link.at
                ));
            }
            if !seen.insert(link.at) {
                return Err(format!("Region {} has two links on {}", self.id, link.at));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn straight_path_excludes_the_start() {
        let map = RegionMap::new("meadow", 10, 10);
        let path = map.find_path(Field::new(5, 5), Field::new(8, 5)).unwrap();
        assert_eq!(path, vec![Field::new(6, 5), Field::new(7, 5), Field::new(8, 5)]);
    }

    #[test]
    fn path_goes_around_walls() {
        let map = RegionMap::new("maze", 5, 3).with_blocked([Field::new(2, 0), Field::new(2, 1)]);
        let path = map.find_path(Field::new(0, 0), Field::new(4, 0)).unwrap();

        assert_eq!(path.len(), 8);
        assert_eq!(path.last(), Some(&Field::new(4, 0)));
        assert!(path.contains(&Field::new(2, 2)));
        let mut previous = Field::new(0, 0);
        for field in &path {
            assert!(previous.direction_to(*field).is_some());
            assert!(map.is_walkable(*field));
            previous = *field;
        }
    }

    #[test]
    fn unreachable_and_blocked_targets_have_no_path() {
        let map = RegionMap::new("island", 5, 5).with_blocked([
            Field::new(3, 4),
            Field::new(4, 3),
            Field::new(1, 1),
        ]);
        assert_eq!(map.find_path(Field::new(0, 0), Field::new(4, 4)), None);
        assert_eq!(map.find_path(Field::new(0, 0), Field::new(1, 1)), None);
        assert_eq!(map.find_path(Field::new(0, 0), Field::new(9, 9)), None);
        assert_eq!(map.find_path(Field::new(2, 2), Field::new(2, 2)), Some(Vec::new()));
    }

    #[test]
    fn transforms_map_fields() {
        let shift = CoordTransform::Translate { dx: -3, dy: 2 };
        let place = CoordTransform::Place { x: 1, y: 6 };
        assert_eq!(shift.apply(Field::new(5, 5)), Field::new(2, 7));
        assert_eq!(place.apply(Field::new(5, 5)), Field::new(1, 6));
    }

    #[test]
    fn validation_rejects_broken_grids() {
        assert!(RegionMap::new("ok", 4, 4).validate().is_ok());
        assert!(RegionMap::new("flat", 0, 4).validate().is_err());
        assert!(RegionMap::new("outside", 4, 4)
            .with_blocked([Field::new(7, 7)])
            .validate()
            .is_err());
        assert!(RegionMap::new("walled", 4, 4)
            .with_blocked([Field::new(1, 1)])
            .with_link(Field::new(1, 1), "x", CoordTransform::Place { x: 0, y: 0 })
            .validate()
            .is_err());
    }
}
