use watchroom_common::{
    protocol::ws::{RoomErrorCode, SeatInfo},
    types::{seat_id, seat_position},
};

/// Fixed-size seat row for one room. Index `n` holds seat `A{n+1}`.
#[derive(Debug, Clone)]
pub struct SeatMap {
    occupants: Vec<Option<String>>,
}

/// Result of a successful seat selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeatChange {
    pub seat_id: String,
    /// Seat the user held before, if it differs from the selected one.
    pub vacated: Option<String>,
}

impl SeatMap {
    pub fn new(capacity: usize) -> Self {
        Self { occupants: vec![None; capacity] }
    }

    pub fn capacity(&self) -> usize {
        self.occupants.len()
    }

    pub fn occupied_count(&self) -> usize {
        self.occupants.iter().filter(|occupant| occupant.is_some()).count()
    }

    pub fn seat_of(&self, user_id: &str) -> Option<String> {
        self.occupants
            .iter()
            .position(|occupant| occupant.as_deref() == Some(user_id))
            .map(|index| seat_id(index + 1))
    }

    pub fn occupant(&self, seat_id: &str) -> Option<&str> {
        let index = self.index_of(seat_id)?;
        self.occupants[index].as_deref()
    }

    /// Seats `user_id` at `seat_id`, moving them out of any other seat.
    pub fn assign(&mut self, seat_id: &str, user_id: &str) -> Result<SeatChange, RoomErrorCode> {
        let index = self.index_of(seat_id).ok_or(RoomErrorCode::InvalidSeat)?;

        if let Some(holder) = self.occupants[index].as_deref() {
            if holder != user_id {
                return Err(RoomErrorCode::SeatOccupied);
            }
        }

        let vacated = self.seat_of(user_id).filter(|current| current != seat_id);
        if let Some(previous) = vacated.as_deref() {
            self.vacate(previous);
        }
        self.occupants[index] = Some(user_id.to_string());

        Ok(SeatChange { seat_id: seat_id.to_string(), vacated })
    }

    /// Frees whatever seat `user_id` holds and returns its id.
    pub fn release_user(&mut self, user_id: &str) -> Option<String> {
        let seat = self.seat_of(user_id)?;
        self.vacate(&seat);
        Some(seat)
    }

    pub fn snapshot(&self) -> Vec<SeatInfo> {
        self.occupants
            .iter()
            .enumerate()
            .map(|(index, occupant)| SeatInfo {
                id: seat_id(index + 1),
                position: index,
                user_id: occupant.clone(),
            })
            .collect()
    }

    fn vacate(&mut self, seat_id: &str) {
        if let Some(index) = self.index_of(seat_id) {
            self.occupants[index] = None;
        }
    }

    fn index_of(&self, seat_id: &str) -> Option<usize> {
        let position = seat_position(seat_id)?;
        (position <= self.capacity()).then(|| position - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::{SeatChange, SeatMap};
    use watchroom_common::protocol::ws::RoomErrorCode;

    #[test]
    fn snapshot_lists_every_seat_in_order() {
        let mut seats = SeatMap::new(4);
        seats.assign("A3", "user-a").expect("seat should be free");

        let snapshot = seats.snapshot();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot[0].id, "A1");
        assert_eq!(snapshot[0].position, 0);
        assert_eq!(snapshot[2].position, 2);
        assert_eq!(snapshot[2].id, "A3");
        assert_eq!(snapshot[2].user_id.as_deref(), Some("user-a"));
        assert!(snapshot.iter().filter(|seat| seat.id != "A3").all(|seat| seat.user_id.is_none()));
    }

    #[test]
    fn unknown_and_out_of_range_seats_are_invalid() {
        let mut seats = SeatMap::new(2);
        for bad in ["A3", "A0", "B1", "", "A", "A01"] {
            assert_eq!(seats.assign(bad, "user-a"), Err(RoomErrorCode::InvalidSeat), "{bad}");
        }
        assert_eq!(seats.occupied_count(), 0);
    }

    #[test]
    fn seat_held_by_another_user_is_rejected() {
        let mut seats = SeatMap::new(2);
        seats.assign("A1", "user-a").expect("seat should be free");

        assert_eq!(seats.assign("A1", "user-b"), Err(RoomErrorCode::SeatOccupied));
        assert_eq!(seats.occupant("A1"), Some("user-a"));
        assert_eq!(seats.seat_of("user-b"), None);
    }

    #[test]
    fn moving_vacates_the_previous_seat() {
        let mut seats = SeatMap::new(3);
        seats.assign("A1", "user-a").expect("seat should be free");

        let change = seats.assign("A3", "user-a").expect("move should succeed");
        assert_eq!(
            change,
            SeatChange { seat_id: "A3".to_string(), vacated: Some("A1".to_string()) }
        );
        assert_eq!(seats.occupant("A1"), None);
        assert_eq!(seats.seat_of("user-a").as_deref(), Some("A3"));
        assert_eq!(seats.occupied_count(), 1);
    }

    #[test]
    fn reselecting_own_seat_reports_no_vacancy() {
        let mut seats = SeatMap::new(2);
        seats.assign("A2", "user-a").expect("seat should be free");

        let change = seats.assign("A2", "user-a").expect("reselect should succeed");
        assert_eq!(change.vacated, None);
        assert_eq!(seats.occupant("A2"), Some("user-a"));
    }

    #[test]
    fn release_user_frees_their_seat_once() {
        let mut seats = SeatMap::new(2);
        seats.assign("A2", "user-a").expect("seat should be free");

        assert_eq!(seats.release_user("user-a").as_deref(), Some("A2"));
        assert_eq!(seats.release_user("user-a"), None);
        assert_eq!(seats.occupied_count(), 0);
    }

    #[test]
    fn zero_capacity_room_has_no_seats() {
        let mut seats = SeatMap::new(0);
        assert!(seats.snapshot().is_empty());
        assert_eq!(seats.assign("A1", "user-a"), Err(RoomErrorCode::InvalidSeat));
    }
}
