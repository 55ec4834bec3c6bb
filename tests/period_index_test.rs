use chrono::Duration;
use meteoset::config::ConfigError;
use meteoset::period::{PeriodIndex, PeriodName, PeriodSpec, parse_stamp};

fn spec(start: &str, end: &str, obs_step_secs: i64) -> PeriodSpec {
    PeriodSpec {
        name: PeriodName::Train,
        start: parse_stamp(start).unwrap(),
        end: parse_stamp(end).unwrap(),
        obs_step_secs,
    }
}

#[test]
fn test_length_matches_closed_formula() {
    // One day at hourly cadence: floor(82800 / 3600) + 1 = 24.
    let index = PeriodIndex::build(&spec("2022020100", "2022020123", 3600)).unwrap();
    assert_eq!(index.len(), 24);

    // Step that does not divide the span evenly.
    let index = PeriodIndex::build(&spec("2022020100", "2022020123", 7200)).unwrap();
    assert_eq!(index.len(), 82800 / 7200 + 1);

    // Degenerate single-timestamp period.
    let index = PeriodIndex::build(&spec("2022020100", "2022020100", 3600)).unwrap();
    assert_eq!(index.len(), 1);
}

#[test]
fn test_consecutive_timestamps_differ_by_obs_step() {
    let index = PeriodIndex::build(&spec("2022020100", "2022020400", 10800)).unwrap();
    let stamps = index.timestamps();
    assert!(stamps.len() > 2);
    for pair in stamps.windows(2) {
        assert_eq!(pair[1] - pair[0], Duration::seconds(10800));
    }
}

#[test]
fn test_sequence_is_strictly_increasing_and_bounded() {
    let s = spec("2022020100", "2022020523", 3600);
    let index = PeriodIndex::build(&s).unwrap();
    let stamps = index.timestamps();
    assert_eq!(stamps[0], s.start);
    assert!(*stamps.last().unwrap() <= s.end);
    for pair in stamps.windows(2) {
        assert!(pair[0] < pair[1]);
    }
}

#[test]
fn test_rebuild_is_deterministic() {
    let s = spec("2022020100", "2022030100", 21600);
    let a = PeriodIndex::build(&s).unwrap();
    let b = PeriodIndex::build(&s).unwrap();
    assert_eq!(a.timestamps(), b.timestamps());
}

#[test]
fn test_invalid_specs_are_rejected() {
    let err = PeriodIndex::build(&spec("2022020100", "2022020123", 0)).unwrap_err();
    assert!(matches!(err, ConfigError::Period { .. }));

    let err = PeriodIndex::build(&spec("2022020100", "2022020123", -3600)).unwrap_err();
    assert!(matches!(err, ConfigError::Period { .. }));

    let err = PeriodIndex::build(&spec("2022020200", "2022020100", 3600)).unwrap_err();
    assert!(matches!(err, ConfigError::Period { .. }));
}

#[test]
fn test_parse_stamp_formats() {
    assert_eq!(
        parse_stamp("20220201").unwrap(),
        parse_stamp("2022020100").unwrap()
    );
    assert!(parse_stamp("2022").is_err());
    assert!(parse_stamp("not-a-date1").is_err());
    assert!(matches!(
        parse_stamp("2022139900").unwrap_err(),
        ConfigError::BadDate(_)
    ));
}

#[test]
fn test_position_indexing() {
    let index = PeriodIndex::build(&spec("2022020100", "2022020105", 3600)).unwrap();
    assert_eq!(index.get(0), Some(parse_stamp("2022020100").unwrap()));
    assert_eq!(index.get(5), Some(parse_stamp("2022020105").unwrap()));
    assert_eq!(index.get(6), None);
}
