//! Tick-by-tick movement along a waypoint path.
//!
//! A [`Mover`] does not own a timer. Every region runs one
//! [`Scheduler`](actor_runtime::Scheduler) and each mover books its next
//! tick there under a [`MoverKey`]. The key carries a token that changes
//! with every new walk, so a tick that was already in flight when the walk
//! was replaced is recognised as stale and ignored.

use crate::player::Player;
use crate::types::Field;
use actor_runtime::SchedulerHandle;
use std::time::{Duration, Instant};

const WALK_ANIMATION: &str = "walk";

/// Identifies one walk of one player.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MoverKey {
    pub player: String,
    pub token: u64,
}

/// Outcome of one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Advanced to the field, more waypoints follow.
    Moved(Field),
    /// Reached the last waypoint.
    Finished(Field),
    /// The mover was already stopped.
    Idle,
}

pub struct Mover {
    key: MoverKey,
    interval: Duration,
    timer: SchedulerHandle<MoverKey>,
    running: bool,
}

impl Mover {
    /// Puts `path` on the player and books the first tick.
    pub fn start(
        key: MoverKey,
        interval: Duration,
        timer: SchedulerHandle<MoverKey>,
        player: &mut Player,
        path: Vec<Field>,
    ) -> Self {
        player.path = path.into();
        player.animation = Some(WALK_ANIMATION.to_string());
        timer.schedule(key.clone(), Instant::now() + interval);
        Self {
            key,
            interval,
            timer,
            running: true,
        }
    }

    pub fn key(&self) -> &MoverKey {
        &self.key
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Cancels the pending tick and clears the walk. Idempotent.
    pub fn stop(&mut self, player: &mut Player) {
        if !self.running {
            return;
        }
        self.running = false;
        self.timer.cancel(self.key.clone());
        player.path.clear();
        player.animation = None;
    }

    /// Advances the player by one waypoint.
    pub fn tick(&mut self, player: &mut Player) -> Step {
        if !self.running {
            return Step::Idle;
        }
        let Some(next) = player.path.pop_front() else {
            self.running = false;
            player.animation = None;
            return Step::Finished(player.position);
        };

        if let Some(direction) = player.position.direction_to(next) {
            player.direction = direction;
        }
        player.position = next;

        if player.path.is_empty() {
            self.running = false;
            player.animation = None;
            Step::Finished(next)
        } else {
            self.timer
                .schedule(self.key.clone(), Instant::now() + self.interval);
            Step::Moved(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Direction, RegionId};
    use actor_runtime::Scheduler;
    use crossbeam::channel::bounded;

    #[test]
    fn walks_the_path_then_finishes() {
        let (tx, _rx) = bounded(16);
        let scheduler = Scheduler::start("mover-test", tx).unwrap();
        let mut player = Player::new("ada", RegionId::from("meadow"), Field::new(5, 5));
        let key = MoverKey {
            player: "ada".into(),
            token: 1,
        };

        let mut mover = Mover::start(
            key,
            Duration::from_secs(60),
            scheduler.handle(),
            &mut player,
            vec![Field::new(6, 5), Field::new(6, 4)],
        );
        assert_eq!(player.animation.as_deref(), Some("walk"));

        assert_eq!(mover.tick(&mut player), Step::Moved(Field::new(6, 5)));
        assert_eq!(player.direction, Direction::East);
        assert_eq!(mover.tick(&mut player), Step::Finished(Field::new(6, 4)));
        assert_eq!(player.direction, Direction::North);
        assert_eq!(player.animation, None);
        assert!(!mover.is_running());
        assert_eq!(mover.tick(&mut player), Step::Idle);
    }

    #[test]
    fn stop_clears_the_walk_once() {
        let (tx, _rx) = bounded(16);
        let scheduler = Scheduler::start("mover-stop", tx).unwrap();
        let mut player = Player::new("ada", RegionId::from("meadow"), Field::new(0, 0));
        let key = MoverKey {
            player: "ada".into(),
            token: 7,
        };

        let mut mover = Mover::start(
            key,
            Duration::from_secs(60),
            scheduler.handle(),
            &mut player,
            vec![Field::new(1, 0), Field::new(2, 0)],
        );
        mover.stop(&mut player);
        mover.stop(&mut player);

        assert!(player.path.is_empty());
        assert_eq!(player.animation, None);
        assert_eq!(mover.tick(&mut player), Step::Idle);
        assert_eq!(player.position, Field::new(0, 0));
    }
}
