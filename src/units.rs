//! Raw storage units to display units.
//!
//! Meters report integers in the smallest unit they can resolve (dm³, Wh,
//! deciliters, tenths of a degree). Everything the API returns is scaled
//! here, after any arithmetic on the raw values, so deltas stay exact.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scale {
    /// Stored value is already in display units.
    Unit,
    /// Stored in tenths (dl → l, 0.1 °C → °C).
    Tenths,
    /// Stored in thousandths (dm³ → m³, Wh → kWh, W → kW).
    Thousandths,
}

impl Scale {
    pub fn divisor(self) -> f64 {
        match self {
            Self::Unit => 1.0,
            Self::Tenths => 10.0,
            Self::Thousandths => 1000.0,
        }
    }

    pub fn to_display(self, raw: f64) -> f64 {
        raw / self.divisor()
    }
}

/// Raw amount represented by `count` events of `raw_per_event` each.
pub fn events_to_raw(count: f64, raw_per_event: f64) -> f64 {
    count * raw_per_event
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thousandths_convert_counter_values() {
        assert_eq!(Scale::Thousandths.to_display(1234.0), 1.234);
    }

    #[test]
    fn tenths_convert_deciliters_to_liters() {
        assert_eq!(Scale::Tenths.to_display(57.0), 5.7);
    }

    #[test]
    fn unit_scale_is_identity() {
        assert_eq!(Scale::Unit.to_display(42.0), 42.0);
    }

    #[test]
    fn event_counts_scale_to_raw_units() {
        let raw = events_to_raw(3.0, 10.0);
        assert_eq!(Scale::Tenths.to_display(raw), 3.0);
    }
}
