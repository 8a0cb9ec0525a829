// ctio_environment - Environment instruments for the CTIO observatory
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use serde::{Serialize, Serializer};
use std::error;
use std::f64::consts::PI;
use std::fmt;
use std::str::FromStr;

/// A physical quantity an instrument may be able to report.
///
/// Instruments advertise the set of quantities they provide and callers ask for
/// readings by quantity rather than by concrete instrument type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantity {
    Temperature,
    Humidity,
    WindSpeed,
    WindDirection,
    Pressure,
    DewPoint,
    SkyTransparency,
    Seeing,
    Flux,
    Airmass,
}

impl Quantity {
    pub const ALL: [Quantity; 10] = [
        Quantity::Temperature,
        Quantity::Humidity,
        Quantity::WindSpeed,
        Quantity::WindDirection,
        Quantity::Pressure,
        Quantity::DewPoint,
        Quantity::SkyTransparency,
        Quantity::Seeing,
        Quantity::Flux,
        Quantity::Airmass,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Temperature => "temperature",
            Self::Humidity => "humidity",
            Self::WindSpeed => "wind_speed",
            Self::WindDirection => "wind_direction",
            Self::Pressure => "pressure",
            Self::DewPoint => "dew_point",
            Self::SkyTransparency => "sky_transparency",
            Self::Seeing => "seeing",
            Self::Flux => "flux",
            Self::Airmass => "airmass",
        }
    }

    /// Units this quantity may be requested in. The first entry is the default.
    pub fn accepted_units(self) -> &'static [Unit] {
        match self {
            Self::Temperature | Self::DewPoint => &[Unit::Celsius, Unit::Fahrenheit, Unit::Kelvin],
            Self::Humidity | Self::SkyTransparency => &[Unit::Percent, Unit::Dimensionless],
            Self::WindSpeed => &[
                Unit::MetersPerSecond,
                Unit::KilometersPerHour,
                Unit::MilesPerHour,
                Unit::FeetPerSecond,
            ],
            Self::WindDirection => &[Unit::Degree, Unit::Radian],
            Self::Pressure => &[Unit::Pascal, Unit::Hectopascal, Unit::Bar, Unit::MillimeterOfMercury],
            Self::Seeing => &[Unit::Arcsecond, Unit::Arcminute, Unit::Degree, Unit::Radian],
            Self::Flux => &[Unit::Count],
            Self::Airmass => &[Unit::Dimensionless],
        }
    }

    pub fn default_unit(self) -> Unit {
        self.accepted_units()[0]
    }

    pub fn accepts(self, unit: Unit) -> bool {
        self.accepted_units().contains(&unit)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Quantity {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|q| q.name() == s)
            .ok_or_else(|| ParseError::Quantity(s.to_owned()))
    }
}

/// Physical units understood by the instruments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Unit {
    Celsius,
    Fahrenheit,
    Kelvin,
    Percent,
    Dimensionless,
    MetersPerSecond,
    KilometersPerHour,
    MilesPerHour,
    FeetPerSecond,
    Degree,
    Radian,
    Arcminute,
    Arcsecond,
    Pascal,
    Hectopascal,
    Bar,
    MillimeterOfMercury,
    Count,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Dimension {
    Temperature,
    Ratio,
    Speed,
    Angle,
    Pressure,
    Count,
}

impl Unit {
    pub const ALL: [Unit; 18] = [
        Unit::Celsius,
        Unit::Fahrenheit,
        Unit::Kelvin,
        Unit::Percent,
        Unit::Dimensionless,
        Unit::MetersPerSecond,
        Unit::KilometersPerHour,
        Unit::MilesPerHour,
        Unit::FeetPerSecond,
        Unit::Degree,
        Unit::Radian,
        Unit::Arcminute,
        Unit::Arcsecond,
        Unit::Pascal,
        Unit::Hectopascal,
        Unit::Bar,
        Unit::MillimeterOfMercury,
        Unit::Count,
    ];

    pub fn symbol(self) -> &'static str {
        match self {
            Self::Celsius => "degC",
            Self::Fahrenheit => "degF",
            Self::Kelvin => "K",
            Self::Percent => "%",
            Self::Dimensionless => "dimensionless",
            Self::MetersPerSecond => "m/s",
            Self::KilometersPerHour => "km/h",
            Self::MilesPerHour => "mph",
            Self::FeetPerSecond => "ft/s",
            Self::Degree => "deg",
            Self::Radian => "rad",
            Self::Arcminute => "arcmin",
            Self::Arcsecond => "arcsec",
            Self::Pascal => "Pa",
            Self::Hectopascal => "hPa",
            Self::Bar => "bar",
            Self::MillimeterOfMercury => "mmHg",
            Self::Count => "count",
        }
    }

    fn dimension(self) -> Dimension {
        match self {
            Self::Celsius | Self::Fahrenheit | Self::Kelvin => Dimension::Temperature,
            Self::Percent | Self::Dimensionless => Dimension::Ratio,
            Self::MetersPerSecond | Self::KilometersPerHour | Self::MilesPerHour | Self::FeetPerSecond => {
                Dimension::Speed
            }
            Self::Degree | Self::Radian | Self::Arcminute | Self::Arcsecond => Dimension::Angle,
            Self::Pascal | Self::Hectopascal | Self::Bar | Self::MillimeterOfMercury => Dimension::Pressure,
            Self::Count => Dimension::Count,
        }
    }

    /// Scale and offset such that `base = value * scale + offset`, where `base` is
    /// kelvin, a plain ratio, m/s, radians, pascals or counts.
    fn to_base(self) -> (f64, f64) {
        match self {
            Self::Celsius => (1.0, 273.15),
            Self::Fahrenheit => (5.0 / 9.0, 273.15 - 32.0 * 5.0 / 9.0),
            Self::Kelvin => (1.0, 0.0),
            Self::Percent => (0.01, 0.0),
            Self::Dimensionless => (1.0, 0.0),
            Self::MetersPerSecond => (1.0, 0.0),
            Self::KilometersPerHour => (1.0 / 3.6, 0.0),
            Self::MilesPerHour => (0.44704, 0.0),
            Self::FeetPerSecond => (0.3048, 0.0),
            Self::Degree => (PI / 180.0, 0.0),
            Self::Radian => (1.0, 0.0),
            Self::Arcminute => (PI / 10_800.0, 0.0),
            Self::Arcsecond => (PI / 648_000.0, 0.0),
            Self::Pascal => (1.0, 0.0),
            Self::Hectopascal => (100.0, 0.0),
            Self::Bar => (100_000.0, 0.0),
            Self::MillimeterOfMercury => (133.322_387_415, 0.0),
            Self::Count => (1.0, 0.0),
        }
    }

    /// Convert `value` expressed in this unit to `to`.
    ///
    /// Returns `None` if the two units do not measure the same dimension.
    pub fn convert(self, value: f64, to: Unit) -> Option<f64> {
        if self == to {
            return Some(value);
        }

        if self.dimension() != to.dimension() {
            return None;
        }

        let (scale, offset) = self.to_base();
        let base = value * scale + offset;
        let (scale, offset) = to.to_base();
        Some((base - offset) / scale)
    }
}

impl fmt::Display for Unit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.symbol())
    }
}

impl FromStr for Unit {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if let Some(u) = Self::ALL.iter().copied().find(|u| u.symbol() == s) {
            return Ok(u);
        }

        // Symbols as they show up in scraped pages and query strings
        match s {
            "°C" | "C" | "deg_C" => Ok(Self::Celsius),
            "°F" | "F" | "deg_F" => Ok(Self::Fahrenheit),
            "pct" => Ok(Self::Percent),
            "" => Ok(Self::Dimensionless),
            "°" | "degree" | "degrees" => Ok(Self::Degree),
            "\"" => Ok(Self::Arcsecond),
            "'" => Ok(Self::Arcminute),
            "mbar" | "mb" => Ok(Self::Hectopascal),
            "kph" | "km/hr" => Ok(Self::KilometersPerHour),
            "ms-1" | "m s-1" => Ok(Self::MetersPerSecond),
            "counts" | "ct" => Ok(Self::Count),
            _ => Err(ParseError::Unit(s.to_owned())),
        }
    }
}

impl Serialize for Unit {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    Quantity(String),
    Unit(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Quantity(s) => write!(f, "unknown quantity {}", s),
            Self::Unit(s) => write!(f, "unknown unit {}", s),
        }
    }
}

impl error::Error for ParseError {}

const BUCK_B: f64 = 18.678;
const BUCK_C: f64 = 257.14;
const BUCK_D: f64 = 235.5;

/// Dew point in celsius from temperature (celsius) and relative humidity (0-100)
/// using the Arden Buck approximation.
///
/// Returns `None` when humidity isn't positive, where the dew point is undefined.
pub fn dew_point(temperature: f64, humidity: f64) -> Option<f64> {
    if humidity.is_nan() || humidity <= 0.0 {
        return None;
    }

    let gamma =
        ((humidity / 100.0) * ((BUCK_B - temperature / BUCK_D) * (temperature / (BUCK_C + temperature))).exp()).ln();
    Some(BUCK_C * gamma / (BUCK_B - gamma)).filter(|v| v.is_finite())
}
