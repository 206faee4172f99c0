use crate::{
    arrhythmia::{ArrhythmiaMethod, Category, ClassifierSettings, RuleSettings, ShapeSettings},
    detectors::beats::{detect_beats, DetectionConfig},
    error::EngineError,
    review::{AnnotationValue, Session},
    signal::{Beat, BeatId},
    simulate::{synthetic_ecg, SyntheticEcg},
};

fn ten_hz_record_with_premature_beat() -> (crate::simulate::SyntheticRecording, DetectionConfig) {
    let ecg = synthetic_ecg(&SyntheticEcg {
        fs: 10.0,
        duration_s: 60.0,
        heart_rate_bpm: 60.0,
        first_beat_s: 1.0,
        premature_after: vec![29],
        premature_offset_s: 0.3,
        noise_amplitude: 0.0,
        ..SyntheticEcg::default()
    });
    let cfg = DetectionConfig {
        ecg_filter: false,
        abs_thresh: Some(0.5),
        ..DetectionConfig::default()
    };
    (ecg, cfg)
}

#[test]
fn premature_beat_in_ten_hz_record_is_the_only_one_flagged() {
    let (ecg, cfg) = ten_hz_record_with_premature_beat();
    let detection = detect_beats(&ecg.signal, &cfg).unwrap();
    assert_eq!(detection.peaks.len(), ecg.beat_times.len());

    let mut session = Session::new(detection.beats.clone());
    let settings = ClassifierSettings {
        rules: RuleSettings {
            premature_beat_multiple_rr: 0.7,
            ..RuleSettings::default()
        },
        ..ClassifierSettings::default()
    };
    let result = session.classify(None, &settings).unwrap();
    let prem = result.flags(Category::PremBeat).unwrap();
    let flagged: Vec<f64> = detection
        .beats
        .iter()
        .zip(prem)
        .filter_map(|(b, f)| f.then_some(b.timestamp))
        .collect();
    assert_eq!(flagged.len(), 1);
    assert!((flagged[0] - 30.3).abs() < 1e-6);
}

#[test]
fn bradycardia_threshold_matches_rr_equivalent() {
    let beats = vec![
        Beat::new(BeatId(0), 10, 1.0, 1.0, 1.0),
        Beat::new(BeatId(1), 11, 1.1, 0.1, 1.0),
    ];
    let mut session = Session::new(beats);
    let result = session
        .classify(None, &ClassifierSettings::default())
        .unwrap();
    assert_eq!(
        result.flags(Category::BradycardiaAbsolute).unwrap(),
        &[true, false]
    );
}

#[test]
fn shape_stage_refuses_too_few_epochs() {
    let (ecg, cfg) = ten_hz_record_with_premature_beat();
    let detection = detect_beats(&ecg.signal, &cfg).unwrap();
    let settings = ClassifierSettings {
        arr_methods: ArrhythmiaMethod::Unsupervised,
        shape: ShapeSettings {
            window_size: 6,
            min_samples: detection.beats.len() + 1,
            ..ShapeSettings::default()
        },
        ..ClassifierSettings::default()
    };
    let mut session = Session::new(detection.beats.clone());
    let err = session
        .classify(Some(&detection.conditioned), &settings)
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { .. }));
    assert!(session.view().is_empty());
}

#[test]
fn cursor_stops_at_last_arrhythmia() {
    let (ecg, cfg) = ten_hz_record_with_premature_beat();
    let detection = detect_beats(&ecg.signal, &cfg).unwrap();
    let mut session = Session::new(detection.beats);
    let settings = ClassifierSettings {
        rules: RuleSettings {
            bradycardia_absolute_hr: 55.0,
            skipped_beat_multiple_rr: 10.0,
            premature_beat_multiple_rr: 0.7,
            ..RuleSettings::default()
        },
        ..ClassifierSettings::default()
    };
    session.classify(None, &settings).unwrap();
    let len = session.view().len();
    assert_eq!(len, 1);
    for _ in 0..5 {
        session.next();
    }
    assert_eq!(session.cursor(), len - 1);

    let id = session.current().unwrap();
    session.confirm();
    session.confirm();
    assert_eq!(
        session.annotation(id).unwrap().annot_any_arrhythmia,
        AnnotationValue::Confirmed
    );
    assert_eq!(session.cursor(), len - 1);
}
