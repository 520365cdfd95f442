use tokio::sync::mpsc;
use tokio::time::{Duration, timeout};
use uuid::Uuid;

use super::*;
use crate::message::Notice;
use crate::state::test_helpers::user;

async fn assert_channel_has_message(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(Duration::from_millis(200), rx.recv())
        .await
        .expect("message receive timed out")
        .expect("channel closed")
}

fn assert_channel_empty(rx: &mut mpsc::Receiver<ServerMessage>) {
    assert!(rx.try_recv().is_err(), "expected channel to remain empty");
}

fn cleared() -> ServerMessage {
    Notice::CanvasCleared { user_id: "a".into(), user_name: "A".into() }.into()
}

#[tokio::test]
async fn broadcast_sends_to_all_except_excluded_connection() {
    let mut rooms = RoomRegistry::new();
    let (a, b, c) = (Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4());
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    let (tx_c, mut rx_c) = mpsc::channel(8);
    rooms.join("r1", a, user("a"), tx_a);
    rooms.join("r1", b, user("b"), tx_b);
    rooms.join("r1", c, user("c"), tx_c);

    let tally = broadcast(&rooms, "r1", &cleared(), Some(b));

    assert_eq!(tally, Delivery { delivered: 2, skipped: 0, failed: 0 });
    assert_eq!(assert_channel_has_message(&mut rx_a).await, cleared());
    assert_eq!(assert_channel_has_message(&mut rx_c).await, cleared());
    assert_channel_empty(&mut rx_b);
}

#[tokio::test]
async fn broadcast_without_exclusion_reaches_everyone() {
    let mut rooms = RoomRegistry::new();
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    rooms.join("r1", Uuid::new_v4(), user("a"), tx_a);
    rooms.join("r1", Uuid::new_v4(), user("b"), tx_b);

    let tally = broadcast(&rooms, "r1", &cleared(), None);

    assert_eq!(tally.delivered, 2);
    assert_channel_has_message(&mut rx_a).await;
    assert_channel_has_message(&mut rx_b).await;
}

#[tokio::test]
async fn broadcast_stays_inside_the_room() {
    let mut rooms = RoomRegistry::new();
    let (tx_a, mut rx_a) = mpsc::channel(8);
    let (tx_b, mut rx_b) = mpsc::channel(8);
    rooms.join("r1", Uuid::new_v4(), user("a"), tx_a);
    rooms.join("r2", Uuid::new_v4(), user("b"), tx_b);

    broadcast(&rooms, "r1", &cleared(), None);

    assert_channel_has_message(&mut rx_a).await;
    assert_channel_empty(&mut rx_b);
}

#[tokio::test]
async fn closed_connection_is_skipped_without_blocking_others() {
    let mut rooms = RoomRegistry::new();
    let (tx_dead, rx_dead) = mpsc::channel(8);
    let (tx_live, mut rx_live) = mpsc::channel(8);
    rooms.join("r1", Uuid::new_v4(), user("dead"), tx_dead);
    rooms.join("r1", Uuid::new_v4(), user("live"), tx_live);
    drop(rx_dead);

    let tally = broadcast(&rooms, "r1", &cleared(), None);

    assert_eq!(tally, Delivery { delivered: 1, skipped: 1, failed: 0 });
    assert_channel_has_message(&mut rx_live).await;
}

#[tokio::test]
async fn full_queue_counts_as_failure_and_others_still_receive() {
    let mut rooms = RoomRegistry::new();
    let (tx_slow, mut rx_slow) = mpsc::channel(1);
    let (tx_fast, mut rx_fast) = mpsc::channel(8);
    rooms.join("r1", Uuid::new_v4(), user("slow"), tx_slow);
    rooms.join("r1", Uuid::new_v4(), user("fast"), tx_fast);

    let first = broadcast(&rooms, "r1", &cleared(), None);
    let second = broadcast(&rooms, "r1", &cleared(), None);

    assert_eq!(first.delivered, 2);
    assert_eq!(second, Delivery { delivered: 1, skipped: 0, failed: 1 });
    assert_channel_has_message(&mut rx_fast).await;
    assert_channel_has_message(&mut rx_fast).await;
    assert_channel_has_message(&mut rx_slow).await;
    assert_channel_empty(&mut rx_slow);
}

#[test]
fn broadcast_to_missing_room_is_noop() {
    let rooms = RoomRegistry::new();
    assert_eq!(broadcast(&rooms, "ghost", &cleared(), None), Delivery::default());
}
