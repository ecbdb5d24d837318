//! Time-varying source records for the dispersion model.
//!
//! HYSPLIT reads hourly emission blocks from an `EMITIMES` file: a two-line
//! legend, then for each hour a header `YYYY MM DD HH 0001 <count>` followed
//! by one record per release point. The plume layers of every source become
//! separate release points, each with its share of the source's emission
//! rate. A zero-rate sulfate record follows every SO₂ record so the second
//! species listed in the run's CONTROL file has a release point too.

use std::{fmt, io::Write, str::FromStr};

use super::profile::EmissionLayers;
use crate::{config::SourceConfig, error::PlumeError};

/// Tonnes/day to mg/hour.
pub fn mg_per_hour(tonnes_per_day: f64) -> f64 {
    tonnes_per_day * 1e9 / 24.
}

const EMITIMES_LEGEND: &str = "YYYY MM DD HH DURATION(hhhh) #RECORDS\n\
    YYYY MM DD HH MM DURATION(hhmm) LAT LON HGT(m) RATE(/h) AREA(m2) HEAT(w)\n";

/// An hourly forecast time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    /// Year
    pub year: u16,
    /// Month, 1-12
    pub month: u8,
    /// Day of month
    pub day: u8,
    /// Hour, 0-23
    pub hour: u8,
}

impl FromStr for Timestamp {
    type Err = PlumeError;

    /// Parse `YYYYMMDDHH`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        const BAD: PlumeError = PlumeError::InvalidInput("timestamps must be YYYYMMDDHH");

        if s.len() != 10 || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(BAD);
        }
        let year: u16 = s[0..4].parse().or(Err(BAD))?;
        let month: u8 = s[4..6].parse().or(Err(BAD))?;
        let day: u8 = s[6..8].parse().or(Err(BAD))?;
        let hour: u8 = s[8..10].parse().or(Err(BAD))?;
        if !(1..=12).contains(&month) || hour > 23 {
            return Err(BAD);
        }
        if day == 0 || day > days_in_month(year, month) {
            return Err(PlumeError::InvalidInput("day is outside the month"));
        }

        Ok(Self {
            year,
            month,
            day,
            hour,
        })
    }
}

fn days_in_month(year: u16, month: u8) -> u8 {
    match month {
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

impl fmt::Display for Timestamp {
    /// The `YYYY MM DD HH` form used in EMITIMES files.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:04} {:02} {:02} {:02}",
            self.year, self.month, self.day, self.hour
        )
    }
}

/// One source's emission for one hour.
#[derive(Debug, Clone, Copy)]
pub struct SourceEmission<'a> {
    /// Source location and options
    pub source: &'a SourceConfig,
    /// Total SO₂ emission rate in tonnes/day
    pub so2_tonnes_per_day: f64,
    /// Vent area for the hour in m²
    pub area: f64,
    /// Vertical distribution of the emission
    pub layers: &'a EmissionLayers,
}

/// A single release point for one hour.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmissionRecord {
    /// Start of the release
    pub time: Timestamp,
    /// Latitude in degrees
    pub lat: f64,
    /// Longitude in degrees
    pub lon: f64,
    /// Release height in m AGL
    pub height: f64,
    /// Emission rate in mg/hour
    pub rate: f64,
    /// Source area in m²
    pub area: f64,
    /// Heat release in W
    pub heat: f64,
}

impl fmt::Display for EmissionRecord {
    /// One hour-long EMITIMES record. Heights and rates are truncated to
    /// whole numbers.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} 00 0100 {} {} {} {} {} {}",
            self.time,
            self.lat,
            self.lon,
            self.height.trunc(),
            self.rate.trunc(),
            self.area,
            self.heat.trunc()
        )
    }
}

/// SO₂ and sulfate records for every layer of every source in one hour.
pub fn hourly_records(time: Timestamp, emissions: &[SourceEmission<'_>]) -> Vec<EmissionRecord> {
    let mut records = Vec::new();
    for emission in emissions {
        let total_rate = mg_per_hour(emission.so2_tonnes_per_day);
        for (height, fraction) in emission.layers.iter() {
            let so2 = EmissionRecord {
                time,
                lat: emission.source.lat,
                lon: emission.source.lon,
                height,
                rate: total_rate * fraction,
                area: emission.area,
                heat: 0.,
            };
            records.push(so2);
            records.push(EmissionRecord { rate: 0., ..so2 });
        }
    }
    records
}

/// Write a complete EMITIMES file, one block per hour.
pub fn write_emitimes<W: Write>(
    out: &mut W,
    hours: &[(Timestamp, Vec<SourceEmission<'_>>)],
) -> std::io::Result<()> {
    out.write_all(EMITIMES_LEGEND.as_bytes())?;
    for (time, emissions) in hours {
        let records = hourly_records(*time, emissions);
        writeln!(out, "{time} 0001 {}", records.len())?;
        for record in &records {
            writeln!(out, "{record}")?;
        }
    }
    Ok(())
}

/// Release point lines for the CONTROL file, `lat lon height rate area`.
pub fn control_lines(emissions: &[SourceEmission<'_>]) -> Vec<String> {
    emissions
        .iter()
        .flat_map(|emission| {
            let total_rate = mg_per_hour(emission.so2_tonnes_per_day);
            emission.layers.iter().map(move |(height, fraction)| {
                format!(
                    "{} {} {} {} {}",
                    emission.source.lat,
                    emission.source.lon,
                    height.trunc(),
                    (total_rate * fraction).trunc(),
                    emission.area
                )
            })
        })
        .collect()
}
