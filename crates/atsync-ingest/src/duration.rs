//! `H:MM:SS` elapsed-time cells to whole seconds
//!
//! Attendance exports carry durations such as `"08:30:00"` or `"37:05:10"`
//! (hours are elapsed, not wall-clock, so they may exceed 23). Anything that
//! is not exactly three colon-separated integers counts as zero seconds: a
//! single bad cell must never abort the file it sits in.

use crate::table::Cell;

/// Seconds represented by a cell; non-text cells are worth zero.
pub fn cell_to_seconds(cell: &Cell) -> i64 {
    match cell {
        Cell::Text(text) => to_seconds(text),
        Cell::Number { .. } | Cell::Missing => 0,
    }
}

/// Seconds represented by `H:MM:SS`, or zero when the text is malformed.
pub fn to_seconds(text: &str) -> i64 {
    parse_hms(text).unwrap_or(0)
}

/// Strict form of [`to_seconds`]: `None` for anything that is not three
/// integer components. Each component keeps its own sign.
pub fn parse_hms(text: &str) -> Option<i64> {
    let mut parts = text.split(':');
    let hours = component(parts.next()?)?;
    let minutes = component(parts.next()?)?;
    let seconds = component(parts.next()?)?;
    if parts.next().is_some() {
        return None;
    }

    hours
        .checked_mul(3600)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)
}

fn component(raw: &str) -> Option<i64> {
    raw.trim().parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_well_formed_durations() {
        assert_eq!(to_seconds("00:00:00"), 0);
        assert_eq!(to_seconds("01:00:00"), 3600);
        assert_eq!(to_seconds("00:30:00"), 1800);
        assert_eq!(to_seconds("8:05:09"), 8 * 3600 + 5 * 60 + 9);
        assert_eq!(to_seconds("37:00:01"), 37 * 3600 + 1);
        assert_eq!(to_seconds(" 01:02:03 "), 3723);
    }

    #[test]
    fn test_signed_components() {
        assert_eq!(to_seconds("-01:00:00"), -3600);
        assert_eq!(to_seconds("-01:30:00"), -3600 + 1800);
    }

    #[test]
    fn test_malformed_durations_degrade_to_zero() {
        for bad in [
            "",
            "08:30",
            "1:2:3:4",
            "ab:cd:ef",
            "08:30:xx",
            "08::00",
            "8h30m",
            "1.5:00:00",
            "99999999999999999:00:00",
        ] {
            assert_eq!(to_seconds(bad), 0, "input {:?}", bad);
            assert_eq!(parse_hms(bad), None, "input {:?}", bad);
        }
    }

    #[test]
    fn test_non_text_cells_are_zero() {
        assert_eq!(cell_to_seconds(&Cell::Missing), 0);
        assert_eq!(cell_to_seconds(&Cell::infer("3600")), 0);
        assert_eq!(cell_to_seconds(&Cell::Text("00:01:00".into())), 60);
    }

    proptest! {
        #[test]
        fn prop_round_trips_valid_triples(h in 0i64..10_000, m in 0i64..60, s in 0i64..60) {
            let text = format!("{}:{:02}:{:02}", h, m, s);
            prop_assert_eq!(to_seconds(&text), h * 3600 + m * 60 + s);
        }

        #[test]
        fn prop_wrong_segment_count_is_zero(parts in proptest::collection::vec(0u32..100, 0..8)) {
            prop_assume!(parts.len() != 3);
            let text = parts.iter().map(|p| p.to_string()).collect::<Vec<_>>().join(":");
            prop_assert_eq!(to_seconds(&text), 0);
        }
    }
}
