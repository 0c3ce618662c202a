//! The fixed set of metrics and where each one is stored.

use crate::error::QueryError;
use crate::units::Scale;

/// A measurement/field pair (Flux) or table/column pair (SQL).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SeriesRef {
    pub measurement: &'static str,
    pub field: &'static str,
}

impl SeriesRef {
    pub const fn new(measurement: &'static str, field: &'static str) -> Self {
        Self { measurement, field }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementKind {
    /// Monotonically increasing meter reading; usage is the delta.
    CumulativeCounter,
    /// Per-interval amount that can be summed per bucket.
    InstantaneousSummable,
    /// Sparse ticks, each worth a fixed raw amount.
    EventCount,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetricSpec {
    pub series: SeriesRef,
    pub scale: Scale,
    pub kind: MeasurementKind,
    pub interpolate: bool,
    /// Raw units represented by one sample; only used by event counts.
    pub raw_per_event: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemperatureLocation {
    Inside,
    Outside,
}

/// One labeled temperature sensor. Temperatures are point readings queried
/// per sensor, never as a usage [`Metric`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sensor {
    pub name: &'static str,
    pub series: SeriesRef,
}

const INSIDE_SENSORS: [Sensor; 3] = [
    Sensor {
        name: "huiskamer",
        series: SeriesRef::new("temperatures", "huiskamer"),
    },
    Sensor {
        name: "tuinkamer",
        series: SeriesRef::new("temperatures", "tuinkamer"),
    },
    Sensor {
        name: "zolder",
        series: SeriesRef::new("temperatures", "zolder"),
    },
];

const OUTSIDE_SENSORS: [Sensor; 1] = [Sensor {
    name: "buiten",
    series: SeriesRef::new("weather", "temperature"),
}];

impl TemperatureLocation {
    pub fn parse(raw: &str) -> Result<Self, QueryError> {
        match raw {
            "inside" => Ok(Self::Inside),
            "outside" => Ok(Self::Outside),
            other => Err(QueryError::invalid_parameter(
                "location",
                format!("unknown location {other:?}"),
            )),
        }
    }

    pub fn sensors(self) -> &'static [Sensor] {
        match self {
            Self::Inside => &INSIDE_SENSORS,
            Self::Outside => &OUTSIDE_SENSORS,
        }
    }
}

/// Temperatures are stored in tenths of a degree.
pub const TEMPERATURE_SCALE: Scale = Scale::Tenths;

/// Live grid draw in watts.
pub const POWER_CURRENT: SeriesRef = SeriesRef::new("power", "current_w");
/// Live solar output in watts.
pub const POWER_GENERATION: SeriesRef = SeriesRef::new("generation", "power_w");
/// Live power channels are raw watts shown as kW.
pub const POWER_SCALE: Scale = Scale::Thousandths;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Metric {
    Gas,
    PowerImport,
    PowerExport,
    SolarGeneration,
    Water,
}

impl Metric {
    /// Usage metric named by the `{field}` path segment.
    pub fn from_path_field(field: &str) -> Result<Self, QueryError> {
        match field {
            "gas" => Ok(Self::Gas),
            "stroom" => Ok(Self::PowerImport),
            "back_delivery" => Ok(Self::PowerExport),
            "generation" => Ok(Self::SolarGeneration),
            "water" => Ok(Self::Water),
            other => Err(QueryError::invalid_parameter(
                "field",
                format!("unknown field {other:?}"),
            )),
        }
    }

    pub fn spec(self) -> MetricSpec {
        match self {
            Self::Gas => MetricSpec {
                series: SeriesRef::new("gas", "cumulative_total_dm3"),
                scale: Scale::Thousandths,
                kind: MeasurementKind::CumulativeCounter,
                interpolate: true,
                raw_per_event: 1.0,
            },
            Self::PowerImport => MetricSpec {
                series: SeriesRef::new("power", "cumulative_from_network_wh"),
                scale: Scale::Thousandths,
                kind: MeasurementKind::CumulativeCounter,
                interpolate: false,
                raw_per_event: 1.0,
            },
            Self::PowerExport => MetricSpec {
                series: SeriesRef::new("power", "cumulative_to_network_wh"),
                scale: Scale::Thousandths,
                kind: MeasurementKind::CumulativeCounter,
                interpolate: false,
                raw_per_event: 1.0,
            },
            Self::SolarGeneration => MetricSpec {
                series: SeriesRef::new("generation", "generation_wh"),
                scale: Scale::Unit,
                kind: MeasurementKind::InstantaneousSummable,
                interpolate: false,
                raw_per_event: 1.0,
            },
            Self::Water => MetricSpec {
                series: SeriesRef::new("water", "usage_dl"),
                scale: Scale::Tenths,
                kind: MeasurementKind::EventCount,
                interpolate: false,
                raw_per_event: 10.0,
            },
        }
    }
}
