//! End-to-end match behaviour on a single instance: fortress destruction,
//! friendly fire, kill-and-revive.


use std::sync::Arc;
use std::time::Duration;

use rampart_server::bus::{MemoryBus, MessageBus};
use rampart_server::protocol::{BusMessage, Position, RoomStatus};
use rampart_server::store::{MemoryStore, SharedStore};
use rampart_server::users::{InMemoryUsers, UserStatsSink};

use test_helpers::{build_instance, connect_player, room_request, wait_for_message};

#[tokio::test(start_paused = true)]
async fn bullet_volley_destroys_fortress_and_ends_match() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let users = Arc::new(InMemoryUsers::new());
    let state = build_instance(store, bus.clone(), users.clone(), "a");

    let room = state
        .room_service
        .create_room("1", &room_request("arena", 2))
        .await
        .unwrap();
    state.room_service.join("2", &room.id).await.unwrap();
    let _rx1 = connect_player(&state, "1", &room.id);
    let _rx2 = connect_player(&state, "2", &room.id);

    let mut subscription = bus.subscribe().await.unwrap();
    state.game.start_game("1", &room.id).await.unwrap();

    // 25 shells into the enemy fortress hitbox: 25 × 20 = 500 damage.
    for _ in 0..25 {
        state
            .game
            .shoot("1", Position::new(1930.0, 416.0, 0.0))
            .await;
    }

    let game_over = wait_for_message(&mut subscription, "GAME_OVER", |m| {
        matches!(m, BusMessage::GameOver { .. })
    })
    .await;
    assert_eq!(game_over, BusMessage::GameOver { team1: true });

    let room_info = wait_for_message(&mut subscription, "ROOM_INFO", |m| {
        matches!(m, BusMessage::RoomInfo(_))
    })
    .await;
    match room_info {
        BusMessage::RoomInfo(snapshot) => {
            assert_eq!(snapshot.id, room.id);
            assert_eq!(snapshot.status, RoomStatus::Lobby);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    // Match is torn down locally and the store agrees on the lobby phase.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(state.game.match_handle(&room.id).is_none());
    assert_eq!(
        state.rooms.get_room(&room.id).await.unwrap().status,
        RoomStatus::Lobby
    );

    let winner = users.fetch("1").await.unwrap();
    assert_eq!((winner.wins, winner.losses), (1, 0));
    let loser = users.fetch("2").await.unwrap();
    assert_eq!((loser.wins, loser.losses), (0, 1));
}

#[tokio::test(start_paused = true)]
async fn friendly_fire_blocks_the_bullet_without_damage() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let users = Arc::new(InMemoryUsers::new());
    let state = build_instance(store, bus.clone(), users, "a");

    // Teams: 1 and 3 on team 1, 2 alone on team 2.
    let room = state
        .room_service
        .create_room("1", &room_request("arena", 4))
        .await
        .unwrap();
    state.room_service.join("2", &room.id).await.unwrap();
    state.room_service.join("3", &room.id).await.unwrap();
    for id in ["1", "2", "3"] {
        let _ = connect_player(&state, id, &room.id);
    }

    let mut subscription = bus.subscribe().await.unwrap();
    state.game.start_game("1", &room.id).await.unwrap();

    // Ally 3 spawns at (150, 404); shell fired straight into their hitbox.
    state
        .game
        .shoot("1", Position::new(150.0, 404.0, 0.0))
        .await;

    // Give the loop time to resolve the shot, then verify nothing happened
    // to the ally and the bullet is gone.
    tokio::time::sleep(Duration::from_secs(1)).await;

    let handle = state.game.match_handle(&room.id).unwrap();
    let game_state = handle.state.lock().await;
    assert_eq!(game_state.players["3"].health, 100);
    assert!(game_state.bullets.is_empty());
    drop(game_state);

    // No PLAYER_HIT was fanned out in the interim.
    let saw_hit = tokio::time::timeout(Duration::from_millis(500), async {
        loop {
            match subscription.next().await {
                Some(envelope) => {
                    if matches!(envelope.message, BusMessage::PlayerHit { .. }) {
                        break true;
                    }
                }
                None => break false,
            }
        }
    })
    .await
    .unwrap_or(false);
    assert!(!saw_hit, "friendly fire must not deal damage");
}

#[tokio::test(start_paused = true)]
async fn killed_player_is_revived_after_the_respawn_delay() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let users = Arc::new(InMemoryUsers::new());
    let state = build_instance(store, bus.clone(), users, "a");

    let room = state
        .room_service
        .create_room("1", &room_request("arena", 2))
        .await
        .unwrap();
    state.room_service.join("2", &room.id).await.unwrap();
    let _rx1 = connect_player(&state, "1", &room.id);
    let _rx2 = connect_player(&state, "2", &room.id);

    let mut subscription = bus.subscribe().await.unwrap();
    state.game.start_game("1", &room.id).await.unwrap();

    // Five shells into player 2's spawn point: 5 × 20 = 100 damage.
    for _ in 0..5 {
        state
            .game
            .shoot("1", Position::new(1834.0, 324.0, 0.0))
            .await;
    }

    let killed = wait_for_message(&mut subscription, "PLAYER_KILLED", |m| {
        matches!(m, BusMessage::PlayerKilled { .. })
    })
    .await;
    assert_eq!(
        killed,
        BusMessage::PlayerKilled {
            player_id: "2".into()
        }
    );

    // Dead players neither move nor shoot.
    state
        .game
        .move_player("2", Position::new(900.0, 400.0, 0.0))
        .await;
    {
        let handle = state.game.match_handle(&room.id).unwrap();
        let game_state = handle.state.lock().await;
        assert_eq!(game_state.players["2"].position.x, 1834.0);
        assert!(!game_state.players["2"].is_alive());
    }

    let revived = wait_for_message(&mut subscription, "PLAYER_REVIVED", |m| {
        matches!(m, BusMessage::PlayerRevived { .. })
    })
    .await;
    match revived {
        BusMessage::PlayerRevived {
            player_id,
            position,
        } => {
            assert_eq!(player_id, "2");
            assert_eq!(position.x, 1834.0);
            assert!((244.0..=644.0).contains(&position.y));
        }
        other => panic!("unexpected message: {other:?}"),
    }

    let handle = state.game.match_handle(&room.id).unwrap();
    let game_state = handle.state.lock().await;
    assert_eq!(game_state.players["2"].health, 100);
}

#[tokio::test(start_paused = true)]
async fn replicated_move_is_idempotent() {
    let store: Arc<dyn SharedStore> = Arc::new(MemoryStore::new());
    let bus: Arc<dyn MessageBus> = Arc::new(MemoryBus::new());
    let users = Arc::new(InMemoryUsers::new());
    let state = build_instance(store, bus, users, "a");

    let room = state
        .room_service
        .create_room("1", &room_request("arena", 2))
        .await
        .unwrap();
    state.room_service.join("2", &room.id).await.unwrap();
    let _rx1 = connect_player(&state, "1", &room.id);
    let _rx2 = connect_player(&state, "2", &room.id);
    state.game.start_game("1", &room.id).await.unwrap();

    let position = Position::new(640.0, 416.0, 0.7);
    state.game.apply_replica_move(&room.id, "1", position).await;
    let snapshot_once = {
        let handle = state.game.match_handle(&room.id).unwrap();
        let game_state = handle.state.lock().await;
        game_state.players["1"].clone()
    };

    state.game.apply_replica_move(&room.id, "1", position).await;
    let snapshot_twice = {
        let handle = state.game.match_handle(&room.id).unwrap();
        let game_state = handle.state.lock().await;
        game_state.players["1"].clone()
    };

    assert_eq!(snapshot_once, snapshot_twice);
}
