//! The authoritative tick loop and its collision, damage, and respawn rules.

use std::collections::HashMap;
use std::f64::consts::FRAC_PI_2;
use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::MissedTickBehavior;

use crate::grid::CollisionGrid;
use crate::protocol::{BusMessage, Envelope, PlayerId, Position};

use super::state::{
    Bullet, Fortress, MatchHandle, PlayerState, BULLET_DAMAGE, BULLET_WIDTH, FORTRESS_AABB,
    PLAYER_AABB, PLAYER_HEALTH, RESPAWN_BASE_Y, RESPAWN_ROWS, SPAWN_ROW_SPACING, TEAM1_SPAWN_X,
    TEAM2_SPAWN_X,
};
use super::GameService;

/// Fixed simulation step: 25 ms, ~40 Hz.
pub const TICK_INTERVAL: Duration = Duration::from_millis(25);
/// Physics delta matching the tick interval, in seconds.
pub const FIXED_DELTA: f64 = 0.025;
/// Dead players return after this long.
pub const RESPAWN_DELAY: Duration = Duration::from_secs(6);

/// What a bullet hit this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Impact {
    /// Still flying.
    None,
    /// Wall, out-of-map, or a friendly hitbox: the bullet dies harmlessly.
    Blocked,
    /// An enemy tank.
    Player(PlayerId),
    /// An enemy fortress, by index into the fortress list.
    Fortress(usize),
}

pub(super) enum TickResult {
    Continue,
    GameOver,
}

pub(super) fn spawn_tick_loop(service: Arc<GameService>, handle: Arc<MatchHandle>) {
    tokio::spawn(run_tick_loop(service, handle));
}

/// Drive one match at the fixed tick rate until it ends or the lease is lost.
/// Only the lease holder may run this; every damage event it emits is in tick
/// order, which is the total order clients observe.
async fn run_tick_loop(service: Arc<GameService>, handle: Arc<MatchHandle>) {
    let room_id = handle.room_id.clone();
    let mut ticker = tokio::time::interval(TICK_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if handle.is_over() {
            break;
        }

        if matches!(advance_tick(&service, &handle).await, TickResult::GameOver) {
            service.finish_game(&handle).await;
            break;
        }

        match service.elector.renew(&room_id).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(%room_id, "leader lease lost; stopping authoritative work");
                let successor_watch = service.clone();
                let contested_room = room_id.clone();
                tokio::spawn(async move {
                    successor_watch.contend_for_leadership(contested_room).await;
                });
                break;
            }
            Err(err) => {
                // Transient store trouble; keep ticking. A persistent outage
                // eventually fails the renewal read and hands off the match.
                tracing::warn!(%room_id, error = %err, "lease renewal errored");
            }
        }
    }
}

/// One simulation step under the match lock: advance bullets, resolve
/// impacts, emit events, checkpoint. Event publication happens inside the
/// lock — it is a non-blocking enqueue — so clients observe damage in tick
/// order.
async fn advance_tick(service: &Arc<GameService>, handle: &Arc<MatchHandle>) -> TickResult {
    let mut guard = handle.state.lock().await;
    let game_state = &mut *guard;

    for bullet in game_state.bullets.values_mut() {
        bullet.position.x += bullet.position.angle.cos() * bullet.speed * FIXED_DELTA;
        bullet.position.y += bullet.position.angle.sin() * bullet.speed * FIXED_DELTA;
    }

    let users = game_state.participant_ids_except("");
    let bullet_ids: Vec<String> = game_state.bullets.keys().cloned().collect();
    let mut game_over = false;

    for bullet_id in bullet_ids {
        let Some(bullet) = game_state.bullets.get(&bullet_id).cloned() else {
            continue;
        };
        let impact = check_bullet_collision(
            &service.grid,
            &bullet,
            &game_state.players,
            &game_state.fortresses,
        );
        match impact {
            Impact::None => {}
            Impact::Blocked => {
                game_state.bullets.remove(&bullet_id);
            }
            Impact::Player(player_id) => {
                game_state.bullets.remove(&bullet_id);
                let Some(player) = game_state.players.get_mut(&player_id) else {
                    continue;
                };
                player.health -= BULLET_DAMAGE;
                if player.is_alive() {
                    service
                        .publish(Envelope::targeted(
                            BusMessage::PlayerHit {
                                player_id: player_id.clone(),
                                health: player.health,
                            },
                            users.clone(),
                        ))
                        .await;
                } else {
                    let team1 = player.team1;
                    service
                        .publish(Envelope::targeted(
                            BusMessage::PlayerKilled {
                                player_id: player_id.clone(),
                            },
                            users.clone(),
                        ))
                        .await;
                    spawn_respawn(service.clone(), Arc::downgrade(handle), player_id, team1);
                }
            }
            Impact::Fortress(index) => {
                game_state.bullets.remove(&bullet_id);
                let fortress = &mut game_state.fortresses[index];
                fortress.health -= BULLET_DAMAGE;
                if fortress.health <= 0 {
                    service
                        .publish(Envelope::targeted(
                            BusMessage::GameOver {
                                team1: !fortress.team1,
                            },
                            users.clone(),
                        ))
                        .await;
                    // Flipped while the match lock is still held: no move or
                    // shoot can observe the lock free before seeing the flag.
                    handle.mark_over();
                    game_over = true;
                    break;
                }
                service
                    .publish(Envelope::targeted(
                        BusMessage::FortressHit {
                            team1: fortress.team1,
                            health: fortress.health,
                        },
                        users.clone(),
                    ))
                    .await;
            }
        }
    }

    if game_over {
        return TickResult::GameOver;
    }

    if let Err(err) = game_state.checkpoint(service.store.as_ref()).await {
        // Log and keep ticking; a persistent store failure will surface as a
        // failed lease renewal and hand the match off.
        tracing::warn!(room_id = %game_state.room_id, error = %err, "checkpoint failed");
    }

    TickResult::Continue
}

/// Test a bullet against walls, tanks, and fortresses, in that order. Three
/// sample points are used: the bullet center and two offsets of half the
/// bullet width, perpendicular to the heading. Any sample landing on a
/// blocking tile (or a friendly hitbox) destroys the bullet without damage.
pub fn check_bullet_collision(
    grid: &CollisionGrid,
    bullet: &Bullet,
    players: &HashMap<PlayerId, PlayerState>,
    fortresses: &[Fortress],
) -> Impact {
    let Position { x, y, angle } = bullet.position;
    let perpendicular = angle + FRAC_PI_2;
    let (dx, dy) = (
        perpendicular.cos() * BULLET_WIDTH / 2.0,
        perpendicular.sin() * BULLET_WIDTH / 2.0,
    );
    let samples = [(x, y), (x + dx, y + dy), (x - dx, y - dy)];

    // A bullet whose owner has vanished is stale; let it die on the spot.
    let Some(owner_team1) = players.get(&bullet.owner_id).map(|p| p.team1) else {
        return Impact::Blocked;
    };

    if samples.iter().any(|&(sx, sy)| grid.blocks(sx, sy)) {
        return Impact::Blocked;
    }

    for player in players.values() {
        if player.id == bullet.owner_id || !player.is_alive() {
            continue;
        }
        if samples
            .iter()
            .any(|&(sx, sy)| rect_contains(sx, sy, player.position, PLAYER_AABB))
        {
            if player.team1 == owner_team1 {
                return Impact::Blocked;
            }
            return Impact::Player(player.id.clone());
        }
    }

    for (index, fortress) in fortresses.iter().enumerate() {
        if samples
            .iter()
            .any(|&(sx, sy)| rect_contains(sx, sy, fortress.position, FORTRESS_AABB))
        {
            if fortress.team1 == owner_team1 {
                return Impact::Blocked;
            }
            return Impact::Fortress(index);
        }
    }

    Impact::None
}

fn rect_contains(x: f64, y: f64, center: Position, (width, height): (f64, f64)) -> bool {
    x >= center.x - width / 2.0
        && x <= center.x + width / 2.0
        && y >= center.y - height / 2.0
        && y <= center.y + height / 2.0
}

/// Revive a dead player after the respawn delay. The timer holds only a weak
/// reference; if the match ended in the meantime the task is a no-op.
fn spawn_respawn(
    service: Arc<GameService>,
    handle: Weak<MatchHandle>,
    player_id: PlayerId,
    team1: bool,
) {
    tokio::spawn(async move {
        tokio::time::sleep(RESPAWN_DELAY).await;
        let Some(handle) = handle.upgrade() else {
            return;
        };
        if handle.is_over() {
            return;
        }

        let position = respawn_position(team1);
        let users = {
            let mut game_state = handle.state.lock().await;
            let Some(player) = game_state.players.get_mut(&player_id) else {
                return;
            };
            player.health = PLAYER_HEALTH;
            player.position = position;
            game_state.participant_ids_except("")
        };

        service
            .publish(Envelope::targeted(
                BusMessage::PlayerRevived {
                    player_id: player_id.clone(),
                    position,
                },
                users,
            ))
            .await;
        tracing::debug!(%player_id, "player revived");
    });
}

/// Random row in the team's spawn corridor, clamped to the corridor bounds.
pub fn respawn_position(team1: bool) -> Position {
    let (x, angle) = if team1 {
        (TEAM1_SPAWN_X, 0.0)
    } else {
        (TEAM2_SPAWN_X, std::f64::consts::PI)
    };
    let max_y = RESPAWN_BASE_Y + SPAWN_ROW_SPACING * f64::from(RESPAWN_ROWS - 1);
    let y = (RESPAWN_BASE_Y + SPAWN_ROW_SPACING * f64::from(fastrand::u32(0..RESPAWN_ROWS)))
        .clamp(RESPAWN_BASE_Y, max_y);
    Position::new(x, y, angle)
}
