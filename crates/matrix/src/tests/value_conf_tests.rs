use crate::*;

// -------------------- Construction --------------------

#[test]
fn default_bounds() {
    let conf = ValueConf::default();
    assert_eq!(conf.min_score(), DEFAULT_MIN_SCORE);
    assert_eq!(conf.max_score(), DEFAULT_MAX_SCORE);
}

#[test]
fn rejects_empty_or_inverted_range() {
    assert!(matches!(ValueConf::new(1.0, 1.0), Err(MatrixError::InvalidArgument(_))));
    assert!(matches!(ValueConf::new(2.0, -2.0), Err(MatrixError::InvalidArgument(_))));
    assert!(ValueConf::new(f32::NAN, 1.0).is_err());
    assert!(ValueConf::new(0.0, f32::INFINITY).is_err());
}

#[test]
fn from_range_widens_single_value() {
    let conf = ValueConf::from_range(3.0, 3.0).unwrap();
    assert_eq!(conf.min_score(), 2.0);
    assert_eq!(conf.max_score(), 4.0);

    let conf = ValueConf::from_range(-0.5, 7.0).unwrap();
    assert_eq!(conf.min_score(), -0.5);
    assert_eq!(conf.max_score(), 7.0);
}

// -------------------- Packing --------------------

#[test]
fn bounds_pack_to_extreme_codes() {
    let conf = ValueConf::default();
    assert_eq!(conf.pack(conf.min_score()), i16::MIN);
    assert_eq!(conf.pack(conf.max_score()), i16::MAX);
}

#[test]
fn out_of_range_scores_are_clamped() {
    let conf = ValueConf::default();
    assert_eq!(conf.pack(100.0), i16::MAX);
    assert_eq!(conf.pack(-100.0), i16::MIN);
    assert_eq!(conf.pack(f32::INFINITY), i16::MAX);
    assert_eq!(conf.pack(f32::NAN), i16::MIN);
}

#[test]
fn round_trip_within_half_step() {
    let conf = ValueConf::default();
    let half_step = conf.step() / 2.0 + 1e-6;
    for i in 0..=2000 {
        let s = -1.2 + 2.4 * (i as f32) / 2000.0;
        let clamped = s.clamp(conf.min_score(), conf.max_score());
        let back = conf.unpack(conf.pack(s));
        assert!(back >= conf.min_score() && back <= conf.max_score());
        assert!(
            (back - clamped).abs() <= half_step,
            "{s} came back as {back}"
        );
    }
}

#[test]
fn pack_is_monotonic() {
    let conf = ValueConf::new(-3.0, 10.0).unwrap();
    let mut last = i16::MIN;
    for i in 0..=5000 {
        let s = -4.0 + 15.0 * (i as f32) / 5000.0;
        let code = conf.pack(s);
        assert!(code >= last, "pack({s}) = {code} < {last}");
        last = code;
    }
}

#[test]
fn every_code_unpacks_inside_bounds() {
    let conf = ValueConf::new(0.0, 1.0).unwrap();
    for code in i16::MIN..=i16::MAX {
        let v = conf.unpack(code);
        assert!((0.0..=1.0).contains(&v), "code {code} unpacked to {v}");
    }
}

// -------------------- Comparison --------------------

#[test]
fn almost_equals_tolerates_float_noise() {
    let a = ValueConf::default();
    let b = ValueConf::new(-1.1001, 1.1).unwrap();
    let c = ValueConf::new(-1.0, 1.0).unwrap();
    assert!(a.almost_equals(&b));
    assert!(b.almost_equals(&a));
    assert!(!a.almost_equals(&c));
}
