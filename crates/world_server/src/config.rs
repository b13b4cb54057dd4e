use crate::butler::ButlerSettings;
use crate::map::{CoordTransform, RegionMap};
use crate::map_manager::RegionSettings;
use crate::types::{Field, RegionId};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::time::Duration;

/// Bounds of every actor mailbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailboxCapacities {
    pub region_commands: usize,
    pub region_mux: usize,
    pub timer: usize,
    pub butler_serverside: usize,
    pub butler_clientside: usize,
    pub butler_internal: usize,
}

impl Default for MailboxCapacities {
    fn default() -> Self {
        Self {
            region_commands: 256,
            region_mux: 256,
            timer: 256,
            butler_serverside: 128,
            butler_clientside: 64,
            butler_internal: 8,
        }
    }
}

impl MailboxCapacities {
    fn validate(&self) -> Result<(), String> {
        let all = [
            ("region_commands", self.region_commands),
            ("region_mux", self.region_mux),
            ("timer", self.timer),
            ("butler_serverside", self.butler_serverside),
            ("butler_clientside", self.butler_clientside),
            ("butler_internal", self.butler_internal),
        ];
        match all.iter().find(|(_, capacity)| *capacity == 0) {
            Some((name, _)) => Err(format!("Mailbox capacity {name} must be greater than 0")),
            None => Ok(()),
        }
    }
}

/// Configuration for the world server
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// The socket address to bind the server to
    pub bind_address: SocketAddr,

    /// Maximum number of concurrent connections allowed
    pub max_connections: usize,

    /// Region grids; one map manager runs per entry
    pub regions: Vec<RegionMap>,

    /// Where new players appear
    pub spawn_region: RegionId,
    pub spawn_position: Field,

    pub capacities: MailboxCapacities,

    /// Time between two steps of a walk
    pub step_interval: Duration,

    /// How long a butler waits for a region to acknowledge a registration
    pub handoff_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 7878)),
            max_connections: 1000,
            regions: default_regions(),
            spawn_region: RegionId::from("meadow"),
            spawn_position: Field::new(5, 5),
            capacities: MailboxCapacities::default(),
            step_interval: Duration::from_millis(150),
            handoff_timeout: Duration::from_secs(5),
        }
    }
}

/// The meadow and the forest, joined by a path on their shared edge. The
/// meadow's top-left corner is a shortcut back into its own centre.
pub fn default_regions() -> Vec<RegionMap> {
    let meadow = RegionMap::new("meadow", 16, 12)
        .with_blocked([Field::new(3, 8), Field::new(4, 8), Field::new(5, 8)])
        .with_link(Field::new(15, 6), "forest", CoordTransform::Place { x: 1, y: 6 })
        .with_link(Field::new(0, 0), "meadow", CoordTransform::Place { x: 7, y: 7 });

    let forest = RegionMap::new("forest", 16, 12)
        .with_blocked((2..14).step_by(3).flat_map(|x| [Field::new(x, 2), Field::new(x, 9)]))
        .with_link(Field::new(0, 6), "meadow", CoordTransform::Place { x: 14, y: 6 });

    vec![meadow, forest]
}

impl ServerConfig {
    /// Checks every region on its own and the links and spawn point between
    /// them.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.regions.is_empty() {
            return Err("At least one region must be configured".to_string());
        }
        if self.step_interval.is_zero() {
            return Err("step_interval must be greater than 0".to_string());
        }
        self.capacities.validate()?;

        let mut ids = HashSet::new();
        for region in &self.regions {
            region.validate()?;
            if !ids.insert(&region.id) {
                return Err(format!("Region {} is configured twice", region.id));
            }
        }

        for region in &self.regions {
            for link in &region.links {
                let Some(target) = self.regions.iter().find(|r| r.id == link.target) else {
                    return Err(format!(
                        "Region {} links to unknown region {}",
                        region.id, link.target
                    ));
                };
                let destination = link.transform.apply(link.at);
                if !target.is_walkable(destination) {
                    return Err(format!(
                        "Link on {} in {} leads to unwalkable {} in {}",
                        link.at, region.id, destination, target.id
                    ));
                }
            }
        }

        let spawn = self
            .regions
            .iter()
            .find(|r| r.id == self.spawn_region)
            .ok_or_else(|| format!("Spawn region {} is not configured", self.spawn_region))?;
        if !spawn.is_walkable(self.spawn_position) {
            return Err(format!(
                "Spawn position {} is not walkable in {}",
                self.spawn_position, self.spawn_region
            ));
        }
        Ok(())
    }

    pub fn region_settings(&self) -> RegionSettings {
        RegionSettings {
            command_capacity: self.capacities.region_commands,
            mux_capacity: self.capacities.region_mux,
            timer_capacity: self.capacities.timer,
            step_interval: self.step_interval,
        }
    }

    pub fn butler_settings(&self) -> ButlerSettings {
        ButlerSettings {
            serverside_capacity: self.capacities.butler_serverside,
            clientside_capacity: self.capacities.butler_clientside,
            internal_capacity: self.capacities.butler_internal,
            handoff_timeout: self.handoff_timeout,
            spawn_region: self.spawn_region.clone(),
            spawn_position: self.spawn_position,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let config = ServerConfig::default();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.regions.len(), 2);
        assert_eq!(config.butler_settings().serverside_capacity, 128);
        assert_eq!(config.region_settings().command_capacity, 256);
    }

    #[test]
    fn rejects_links_to_unknown_regions() {
        let mut config = ServerConfig::default();
        config.regions.retain(|r| r.id.as_str() == "meadow");
        let error = config.validate().unwrap_err();
        assert!(error.contains("unknown region forest"), "{error}");
    }

    #[test]
    fn rejects_duplicate_regions_and_bad_spawns() {
        let mut config = ServerConfig::default();
        config.regions.push(RegionMap::new("meadow", 4, 4));
        assert!(config.validate().unwrap_err().contains("twice"));

        let mut config = ServerConfig::default();
        config.spawn_position = Field::new(4, 8);
        assert!(config.validate().unwrap_err().contains("not walkable"));

        let mut config = ServerConfig::default();
        config.capacities.butler_internal = 0;
        assert!(config.validate().unwrap_err().contains("butler_internal"));
    }
}
