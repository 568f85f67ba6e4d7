//! Police districts and their geocoding bias points.

use anyhow::Result;

/// A reference coordinate used to disambiguate place lookups.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BiasPoint {
    pub lat: f64,
    pub lng: f64,
}

impl BiasPoint {
    /// Places API `locationbias` parameter value.
    pub fn to_param(&self) -> String {
        format!("point:{},{}", self.lat, self.lng)
    }
}

pub const DISTRICTS: &[(&str, BiasPoint)] = &[
    ("Sør-Øst Politidistrikt", BiasPoint { lat: 59.2736681, lng: 10.40305903 }),
    ("Oslo Politidistrikt", BiasPoint { lat: 59.9138688, lng: 10.75224541 }),
    ("Øst Politidistrikt", BiasPoint { lat: 59.7155459, lng: 10.83161895 }),
    ("Sør-Vest Politidistrikt", BiasPoint { lat: 58.9636489, lng: 5.735737659 }),
    ("Agder Politidistrikt", BiasPoint { lat: 58.1471410, lng: 7.998652932 }),
    ("Innlandet Politidistrikt", BiasPoint { lat: 60.7960557, lng: 11.09422286 }),
    ("Nordland Politidistrikt", BiasPoint { lat: 67.2886571, lng: 14.39942244 }),
    ("Finnmark Politidistrikt", BiasPoint { lat: 69.7306470, lng: 30.02526065 }),
    ("Trøndelag Politidistrikt", BiasPoint { lat: 63.4397447, lng: 10.39951882 }),
    ("Møre og Romsdal Politidistrikt", BiasPoint { lat: 62.4767951, lng: 6.143121702 }),
    ("Vest Politidistrikt", BiasPoint { lat: 60.3929948, lng: 5.329137019 }),
    ("Troms Politidistrikt", BiasPoint { lat: 69.6598271, lng: 18.96782164 }),
];

/// Look up the bias point for a district name (exact match after trimming).
pub fn bias_point(district: &str) -> Option<BiasPoint> {
    let district = district.trim();
    DISTRICTS
        .iter()
        .find(|(name, _)| *name == district)
        .map(|(_, point)| *point)
}

pub fn list_districts() -> Result<()> {
    println!("{:<34} {:>12} {:>12}", "DISTRICT", "LAT", "LNG");
    for (name, point) in DISTRICTS {
        println!("{:<34} {:>12.6} {:>12.6}", name, point.lat, point.lng);
    }
    Ok(())
}
