// Core domain types shared between the relay and its clients.

use serde::{Deserialize, Serialize};

/// Prefix shared by every seat identifier (`A1`, `A2`, ...).
pub const SEAT_ROW: char = 'A';

/// Room metadata as resolved from the room store when a session is created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RoomDescriptor {
    pub id: String,
    pub name: String,
    pub theme: String,
    pub owner_id: String,
    pub max_seats: usize,
}

/// Seat identifier for a 1-based position, e.g. `seat_id(3) == "A3"`.
pub fn seat_id(position: usize) -> String {
    format!("{SEAT_ROW}{position}")
}

/// All seat identifiers for a room of the given capacity, in position order.
pub fn seat_ids(capacity: usize) -> Vec<String> {
    (1..=capacity).map(seat_id).collect()
}

/// Parses a seat identifier back into its 1-based position.
///
/// Returns `None` for anything that is not `A` followed by a positive
/// decimal without leading zeros.
pub fn seat_position(seat_id: &str) -> Option<usize> {
    let digits = seat_id.strip_prefix(SEAT_ROW)?;
    if digits.is_empty() || digits.starts_with('0') || !digits.bytes().all(|b| b.is_ascii_digit())
    {
        return None;
    }
    digits.parse::<usize>().ok()
}
