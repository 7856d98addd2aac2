use crate::calendar::Calendar;
use crate::data::{DayIndex, DomainInput, Hour, Rating, Room, RoomKind, Tutor};
use crate::error::DataError;
use chrono::NaiveDate;
use log::{debug, info};
use std::collections::HashMap;

pub type TutorId = usize;
pub type RoomId = usize;

/// Immutable view of tutors, rooms and bookings for one planning run.
///
/// Tutors are sorted by last name and rooms by name; their positions are
/// the ids used by the model. Bookings per slot are computed once on construction.
#[derive(Debug, Clone)]
pub struct DomainSnapshot {
    calendar: Calendar,
    tutors: Vec<Tutor>,
    rooms: Vec<Room>,
    tutor_index: HashMap<String, TutorId>,
    room_index: HashMap<String, RoomId>,
    booked_by_slot: HashMap<(DayIndex, Hour), Vec<RoomId>>,
}

impl DomainSnapshot {
    pub fn new(input: DomainInput) -> Result<Self, DataError> {
        let calendar = Calendar::try_from(input.calendar)?;

        let mut tutors = input.tutors;
        tutors.sort_by(|a, b| a.last_name.cmp(&b.last_name));
        let mut tutor_index = HashMap::new();
        for (id, tutor) in tutors.iter().enumerate() {
            if tutor_index.insert(tutor.last_name.clone(), id).is_some() {
                return Err(DataError::DuplicateTutor(tutor.last_name.clone()));
            }
        }

        let mut rooms = input.rooms;
        rooms.sort_by(|a, b| a.name.cmp(&b.name));
        let mut room_index = HashMap::new();
        for (id, room) in rooms.iter().enumerate() {
            if room_index.insert(room.name.clone(), id).is_some() {
                return Err(DataError::DuplicateRoom(room.name.clone()));
            }
        }

        let mut booked_by_slot: HashMap<(DayIndex, Hour), Vec<RoomId>> = HashMap::new();
        for (day, hour) in calendar.slots() {
            let Some(date) = calendar.date(day) else {
                continue;
            };
            let booked = rooms
                .iter()
                .enumerate()
                .filter(|(_, room)| room.is_booked(date, hour))
                .map(|(id, _)| id)
                .collect();
            booked_by_slot.insert((day, hour), booked);
        }

        info!(
            "Domain snapshot with {} tutors and {} rooms over {} slots",
            tutors.len(),
            rooms.len(),
            booked_by_slot.len()
        );
        debug!("Tutors: {:?}", tutors.iter().map(|t| &t.last_name).collect::<Vec<_>>());

        Ok(DomainSnapshot {
            calendar,
            tutors,
            rooms,
            tutor_index,
            room_index,
            booked_by_slot,
        })
    }

    pub fn calendar(&self) -> &Calendar {
        &self.calendar
    }

    pub fn tutors(&self) -> &[Tutor] {
        &self.tutors
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn tutor(&self, id: TutorId) -> &Tutor {
        &self.tutors[id]
    }

    pub fn room(&self, id: RoomId) -> &Room {
        &self.rooms[id]
    }

    pub fn tutor_id(&self, last_name: &str) -> Option<TutorId> {
        self.tutor_index.get(last_name).copied()
    }

    pub fn room_id(&self, name: &str) -> Option<RoomId> {
        self.room_index.get(name).copied()
    }

    pub fn tutor_by_name(&self, last_name: &str) -> Result<&Tutor, DataError> {
        self.tutor_id(last_name)
            .map(|id| &self.tutors[id])
            .ok_or_else(|| DataError::UnknownTutor(last_name.to_string()))
    }

    pub fn room_by_name(&self, name: &str) -> Result<&Room, DataError> {
        self.room_id(name)
            .map(|id| &self.rooms[id])
            .ok_or_else(|| DataError::UnknownRoom(name.to_string()))
    }

    /// Case-insensitive lookup by last name.
    pub fn find_tutor(&self, name: &str) -> Option<&Tutor> {
        let needle = name.to_lowercase();
        self.tutors
            .iter()
            .find(|tutor| tutor.last_name.to_lowercase() == needle)
    }

    /// Case-insensitive lookup by room name.
    pub fn find_room(&self, name: &str) -> Option<&Room> {
        let needle = name.to_lowercase();
        self.rooms.iter().find(|room| room.name.to_lowercase() == needle)
    }

    pub fn rooms_of_kind(&self, kind: RoomKind) -> impl Iterator<Item = (RoomId, &Room)> {
        self.rooms
            .iter()
            .enumerate()
            .filter(move |(_, room)| room.kind == kind)
    }

    pub fn rating(&self, tutor: TutorId, day: DayIndex, hour: Hour) -> Option<Rating> {
        let date = self.calendar.date(day)?;
        self.tutors[tutor].rating(date, hour)
    }

    /// Rating used as an objective coefficient; an unset slot weighs nothing.
    pub fn rating_weight(&self, tutor: TutorId, day: DayIndex, hour: Hour) -> f64 {
        f64::from(self.rating(tutor, day, hour).unwrap_or(0))
    }

    pub fn is_available(&self, tutor: TutorId, day: DayIndex, hour: Hour) -> bool {
        self.calendar
            .date(day)
            .is_some_and(|date| self.tutors[tutor].is_available(date, hour))
    }

    pub fn booked_rooms(&self, day: DayIndex, hour: Hour) -> &[RoomId] {
        self.booked_by_slot
            .get(&(day, hour))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_booked(&self, room: RoomId, day: DayIndex, hour: Hour) -> bool {
        self.booked_rooms(day, hour).contains(&room)
    }

    pub fn tutorial_rooms_booked(&self, day: DayIndex, hour: Hour) -> usize {
        self.booked_rooms(day, hour)
            .iter()
            .filter(|id| self.rooms[**id].kind == RoomKind::Tutorial)
            .count()
    }

    /// Names of the pool rooms booked in a slot.
    pub fn pool_rooms_booked(&self, day: DayIndex, hour: Hour) -> Vec<&str> {
        self.booked_rooms(day, hour)
            .iter()
            .map(|id| &self.rooms[*id])
            .filter(|room| room.kind.is_pool())
            .map(|room| room.name.as_str())
            .collect()
    }

    pub fn date_index(&self, date: NaiveDate) -> Result<DayIndex, DataError> {
        self.calendar
            .day_index(date)
            .ok_or(DataError::DateOutsideCalendar(date))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::calendar::CalendarInput;

    /// Tutors A, B and C with ratings on 2016-10-18 and 2016-10-19; tutorial
    /// rooms MAR 0.001/0.003/0.011 and exercise rooms TEL 106li/106re.
    pub(crate) fn fixture_input() -> DomainInput {
        serde_json::from_str(
            r#"{
            "calendar": {
                "days": ["2016-10-17","2016-10-18","2016-10-19","2016-10-20","2016-10-21",
                         "2016-10-24","2016-10-25","2016-10-26","2016-10-27","2016-10-28"],
                "hours": [10,11,12,13,14,15,16,17]
            },
            "tutors": [
                {"lastName":"C","firstName":"Carl","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":2,"12":2,"14":2,"16":2},
                                 "2016-10-19":{"10":1,"12":1,"14":null,"16":3}}},
                {"lastName":"A","firstName":"Anna","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":3,"12":null,"14":0,"16":2},
                                 "2016-10-19":{"10":3,"12":3,"14":3,"16":3}}},
                {"lastName":"B","firstName":"Ben","monthlyWorkHours":40,
                 "maxHoursWithoutBreak":4,"maxTutorialsWithoutBreak":2,
                 "availability":{"2016-10-18":{"10":1,"12":2,"14":3,"16":null},
                                 "2016-10-19":{"10":2,"12":2,"14":2,"16":2}}}
            ],
            "rooms": [
                {"name":"MAR 0.001","type":"tutorial","capacity":30,
                 "booked":{"2016-10-18":[10,12],"2016-10-19":[10]}},
                {"name":"MAR 0.003","type":"tutorial","capacity":40,
                 "booked":{"2016-10-18":[10,14]}},
                {"name":"MAR 0.011","type":"tutorial","capacity":25,
                 "booked":{"2016-10-18":[10]}},
                {"name":"TEL 106li","type":"exercise","capacity":60,
                 "booked":{"2016-10-18":[10,12,14,16],"2016-10-19":[10,12]}},
                {"name":"TEL 106re","type":"exercise","capacity":60,
                 "booked":{"2016-10-18":[10,12,14,16]}}
            ]
        }"#,
        )
        .unwrap()
    }

    pub(crate) fn fixture() -> DomainSnapshot {
        DomainSnapshot::new(fixture_input()).unwrap()
    }

    #[test]
    fn test_tutors_sorted_and_indexed() {
        let snapshot = fixture();
        let names: Vec<_> = snapshot.tutors().iter().map(|t| t.last_name.as_str()).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(snapshot.tutor_id("C"), Some(2));
        assert_eq!(snapshot.find_tutor("b").map(|t| t.last_name.as_str()), Some("B"));
        assert!(matches!(
            snapshot.tutor_by_name("Z"),
            Err(DataError::UnknownTutor(_))
        ));
        assert_eq!(snapshot.find_room("tel 106LI").map(|r| r.capacity), Some(60));
    }

    #[test]
    fn test_booking_counts_per_slot() {
        let snapshot = fixture();
        // day 2 is 2016-10-18
        assert_eq!(snapshot.tutorial_rooms_booked(2, 10), 3);
        assert_eq!(snapshot.tutorial_rooms_booked(2, 11), 3);
        assert_eq!(snapshot.tutorial_rooms_booked(2, 12), 1);
        assert_eq!(snapshot.tutorial_rooms_booked(1, 10), 0);
        assert_eq!(snapshot.pool_rooms_booked(3, 12), vec!["TEL 106li"]);
        assert_eq!(snapshot.rating(0, 2, 15), Some(0));
        assert!(!snapshot.is_available(0, 2, 15));
        assert_eq!(snapshot.rating_weight(0, 2, 12), 0.0);
    }

    #[test]
    fn test_rejects_duplicate_tutor() {
        let mut input = fixture_input();
        let copy = input.tutors[0].clone();
        input.tutors.push(copy);
        assert!(matches!(
            DomainSnapshot::new(input),
            Err(DataError::DuplicateTutor(name)) if name == "C"
        ));
    }

    #[test]
    fn test_rejects_invalid_calendar() {
        let mut input = fixture_input();
        input.calendar = CalendarInput {
            days: input.calendar.days[..9].to_vec(),
            hours: input.calendar.hours.clone(),
        };
        assert!(matches!(
            DomainSnapshot::new(input),
            Err(DataError::CalendarLength { .. })
        ));
    }
}
