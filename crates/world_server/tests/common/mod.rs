#![allow(dead_code)]

use crossbeam::channel::{bounded, Receiver};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use world_server::messages::{ButlerRef, RegionEvent};
use world_server::wire::{self, LocalClient};
use world_server::{
    AccountStore, Butler, ButlerId, ClientEvent, ClientRequest, CoordTransform, Field, RegionMap,
    ServerConfig, World,
};

pub const WAIT: Duration = Duration::from_secs(5);

/// Default world with fast walks.
pub fn fast_config() -> ServerConfig {
    ServerConfig {
        step_interval: Duration::from_millis(10),
        ..ServerConfig::default()
    }
}

/// Two one-row regions whose ends lead into each other:
/// `west (4,0) -> east (1,0)` and `east (0,0) -> west (3,0)`.
pub fn corridor_config() -> ServerConfig {
    let west = RegionMap::new("west", 5, 1).with_link(Field::new(4, 0), "east", CoordTransform::Place { x: 1, y: 0 });
    let east = RegionMap::new("east", 5, 1).with_link(Field::new(0, 0), "west", CoordTransform::Place { x: 3, y: 0 });
    ServerConfig {
        regions: vec![west, east],
        spawn_region: "west".into(),
        spawn_position: Field::new(2, 0),
        step_interval: Duration::from_millis(5),
        ..ServerConfig::default()
    }
}

pub fn start_world(config: &ServerConfig, store: Arc<dyn AccountStore>) -> Arc<World> {
    Arc::new(World::start(config, store).unwrap())
}

/// Opens an in-process connection and consumes the welcome.
pub fn connect(world: &World) -> (Arc<Butler>, LocalClient) {
    let (connection, client) = wire::pipe("test", 16);
    let butler = world.create_butler(connection).unwrap();
    let welcome = client.recv(WAIT).unwrap();
    assert!(matches!(welcome, ClientEvent::Welcome { .. }), "{welcome:?}");
    (butler, client)
}

pub fn expect_event<F>(client: &LocalClient, what: &str, predicate: F) -> ClientEvent
where
    F: Fn(&ClientEvent) -> bool,
{
    client
        .expect(WAIT, predicate)
        .unwrap_or_else(|| panic!("timed out waiting for {what}"))
}

/// Creates `account` with one player `player`, loads it and returns the
/// region snapshot it was greeted with.
pub fn enter(client: &LocalClient, account: &str, player: &str) -> ClientEvent {
    client.send(ClientRequest::CreateAccount {
        account: account.into(),
    });
    expect_event(client, "account", |e| matches!(e, ClientEvent::AccountCreated { .. }));
    client.send(ClientRequest::Login {
        account: account.into(),
    });
    expect_event(client, "login", |e| matches!(e, ClientEvent::LoggedIn { .. }));
    client.send(ClientRequest::CreatePlayer { name: player.into() });
    expect_event(client, "player", |e| matches!(e, ClientEvent::PlayerCreated { .. }));
    client.send(ClientRequest::LoadPlayer { name: player.into() });

    // the snapshot comes from the region and may overtake the load reply
    let mut loaded = false;
    let mut snapshot = None;
    while !loaded || snapshot.is_none() {
        match client.recv(WAIT) {
            Some(ClientEvent::PlayerLoaded { .. }) => loaded = true,
            Some(event @ ClientEvent::RegionSnapshot { .. }) => snapshot = Some(event),
            Some(ClientEvent::Error { message }) => panic!("entering failed: {message}"),
            Some(_) => {}
            None => panic!("timed out entering the world"),
        }
    }
    snapshot.unwrap()
}

/// A bare butler address whose events land in the returned receiver.
pub fn probe() -> (ButlerRef, Receiver<RegionEvent>) {
    let (tx, rx) = bounded(256);
    (ButlerRef::new(ButlerId::new(), tx), rx)
}

pub fn wait_until<F: Fn() -> bool>(timeout: Duration, condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    condition()
}
