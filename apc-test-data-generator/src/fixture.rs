//! The fixed passenger counting fixture: one morning trip of route 3 in Kuopio.
//!
//! Every passenger who boards during the trip also alights during it, for
//! every passenger class. The downstream aggregation relies on that.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Facts shared by every record of one trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TripContext {
    pub feed_publisher_id: String,
    pub trip_id: String,
    pub start_date: String,
    pub start_time: String,
    pub route_id: String,
    pub direction_id: u8,
    pub counting_vendor_name: String,
    pub timezone_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PassengerClass {
    Adult,
    Child,
    Pram,
    Bike,
    Wheelchair,
    Other,
}

impl PassengerClass {
    pub const ALL: [PassengerClass; 6] = [
        PassengerClass::Adult,
        PassengerClass::Child,
        PassengerClass::Pram,
        PassengerClass::Bike,
        PassengerClass::Wheelchair,
        PassengerClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PassengerClass::Adult => "adult",
            PassengerClass::Child => "child",
            PassengerClass::Pram => "pram",
            PassengerClass::Bike => "bike",
            PassengerClass::Wheelchair => "wheelchair",
            PassengerClass::Other => "other",
        }
    }
}

/// Boarding and alighting counts of one passenger class through one door.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DoorClassCount {
    pub door_number: u32,
    pub count_class: PassengerClass,
    #[serde(rename = "in")]
    pub boarding: u32,
    #[serde(rename = "out")]
    pub alighting: u32,
}

impl DoorClassCount {
    pub fn net(&self) -> i64 {
        i64::from(self.boarding) - i64::from(self.alighting)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopRecord {
    pub stop_id: String,
    pub stop_sequence: u32,
    pub door_class_counts: Vec<DoorClassCount>,
}

/// One published unit: the trip facts merged with one stop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TripRecord {
    #[serde(flatten)]
    pub trip: TripContext,
    #[serde(flatten)]
    pub stop: StopRecord,
}

// A morning trip.
fn trip_context() -> TripContext {
    TripContext {
        feed_publisher_id: "fi:kuopio".to_string(),
        trip_id: "Talvikausi_Ma-Pe_3_0_074500_075400_0".to_string(),
        start_date: "2022-03-10".to_string(),
        start_time: "07:45:00".to_string(),
        route_id: "3".to_string(),
        direction_id: 0,
        counting_vendor_name: "Fake Vendor".to_string(),
        timezone_name: "Europe/Helsinki".to_string(),
    }
}

fn count(
    door_number: u32,
    count_class: PassengerClass,
    boarding: u32,
    alighting: u32,
) -> DoorClassCount {
    DoorClassCount {
        door_number,
        count_class,
        boarding,
        alighting,
    }
}

fn stop(stop_id: &str, stop_sequence: u32, door_class_counts: Vec<DoorClassCount>) -> StopRecord {
    StopRecord {
        stop_id: stop_id.to_string(),
        stop_sequence,
        door_class_counts,
    }
}

fn stops() -> Vec<StopRecord> {
    use PassengerClass::{Adult, Child, Pram};

    vec![
        // Several adults and children embark. One adult has a pram.
        stop(
            "201827",
            1,
            vec![
                count(1, Adult, 7, 0),
                count(1, Child, 8, 0),
                count(2, Adult, 1, 0),
                count(2, Pram, 1, 0),
            ],
        ),
        // Some adults embark and disembark.
        stop("201839", 2, vec![count(1, Adult, 3, 0), count(2, Adult, 0, 1)]),
        // More passengers embark. The parent with the pram disembarks.
        stop(
            "201855",
            3,
            vec![
                count(1, Adult, 1, 0),
                count(1, Child, 2, 0),
                count(2, Adult, 0, 1),
                count(2, Pram, 0, 1),
                count(3, Adult, 0, 1),
            ],
        ),
        // The children disembark on the same stop to go to school. One of them
        // uses the front door.
        stop(
            "201504",
            4,
            vec![
                count(1, Child, 0, 1),
                count(2, Adult, 0, 1),
                count(2, Child, 0, 3),
                count(3, Child, 0, 6),
            ],
        ),
        // Many of the adults disembark on the same stop.
        stop(
            "201625",
            5,
            vec![
                count(1, Adult, 1, 0),
                count(2, Adult, 0, 5),
                count(3, Adult, 0, 1),
            ],
        ),
        // No one embarks or disembarks.
        stop("201285", 6, vec![]),
        stop("315008", 7, vec![count(2, Adult, 0, 1), count(3, Adult, 0, 1)]),
        // The bus becomes empty on the final stop.
        stop("315110", 8, vec![count(3, Adult, 0, 1)]),
    ]
}

/// Build the fixture. Every call returns fresh, independently owned records.
pub fn generate() -> Vec<TripRecord> {
    let trip = trip_context();
    stops()
        .into_iter()
        .map(|stop| TripRecord {
            trip: trip.clone(),
            stop,
        })
        .collect()
}

/// Net passengers (boarded minus alighted) per class over `records`. Every class
/// has an entry, zero when it never appears.
pub fn net_passengers_by_class(records: &[TripRecord]) -> BTreeMap<PassengerClass, i64> {
    let totals: BTreeMap<PassengerClass, i64> =
        PassengerClass::ALL.iter().map(|class| (*class, 0)).collect();

    records
        .iter()
        .flat_map(|record| record.stop.door_class_counts.iter())
        .fold(totals, |mut totals, count| {
            *totals.entry(count.count_class).or_default() += count.net();
            totals
        })
}

/// Passengers on board, all classes together, after each stop of `records`.
pub fn onboard_after_each_stop(records: &[TripRecord]) -> Vec<i64> {
    records
        .iter()
        .scan(0i64, |onboard, record| {
            *onboard += record
                .stop
                .door_class_counts
                .iter()
                .map(DoorClassCount::net)
                .sum::<i64>();
            Some(*onboard)
        })
        .collect()
}
