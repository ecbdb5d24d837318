use super::*;
use crate::config::{GasComposition, IntensityMethod, PlumeRiseModel, RunConfig};
use approx::assert_abs_diff_eq;

/// Well mixed to 690 m, a 1 K inversion at the BL top, stable above.
fn inversion_input(intensity: f64) -> HourlyInput {
    let height = vec![10., 300., 690., 710., 1500., 3000., 8000.];
    let theta = height
        .iter()
        .map(|&z| {
            if z < 700. {
                300.
            } else {
                301. + 0.005 * (z - 710.)
            }
        })
        .collect();
    HourlyInput {
        zi: 700.,
        height,
        theta,
        wind: vec![4.; 7],
        intensity,
    }
}

fn case(tag: &str, timestamp: &str, input: HourlyInput) -> PlumeCase {
    PlumeCase {
        tag: tag.into(),
        timestamp: timestamp.into(),
        input,
    }
}

fn run(input: HourlyInput) -> PlumeRise {
    let config = PlumeConfig::default();
    run_case(
        &case("src1", "2021102912", input),
        &config,
        &BrentSolver::new(config.solver),
    )
    .unwrap()
}

/// Properties every plume-rise record must have.
fn check_record(rise: &PlumeRise) {
    assert!(rise.zcl().is_finite());
    assert!(rise.zcl() >= 0.);
    if rise.intensity() > 0. {
        assert!(rise.zcl() >= rise.zs(), "{} < {}", rise.zcl(), rise.zs());
    }
    assert_eq!(rise.penetrative(), rise.zcl() >= rise.zi() + rise.dz() / 2.);

    assert!(rise.profile().iter().all(|&c| c >= 0.));
    assert_abs_diff_eq!(rise.profile().iter().sum::<f64>(), 1., epsilon = 1e-6);

    assert_eq!(rise.layers().len(), NUM_LAYERS);
    assert!(rise.layers().fractions.iter().all(|&f| f >= 0.));
    assert_abs_diff_eq!(rise.layers().fractions.iter().sum::<f64>(), 1., epsilon = 1e-6);
    assert!(rise.layers().heights.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn strong_plume_penetrates() {
    let rise = run(inversion_input(5000.));
    check_record(&rise);
    assert!(matches!(
        rise.outcome(),
        SolveOutcome::Converged { .. } | SolveOutcome::Bracketed { .. }
    ));
    assert!(rise.penetrative());
    assert!(rise.zcl() > rise.zi());
    assert_abs_diff_eq!(rise.layers().heights[3], rise.zcl());
}

#[test]
fn weak_plume_is_trapped() {
    let rise = run(inversion_input(10.));
    check_record(&rise);
    assert!(!rise.penetrative());
    assert!((rise.zcl() - rise.zi()).abs() < 20., "zCL = {}", rise.zcl());
    // the inversion is a jump the relation cannot balance
    match rise.outcome() {
        SolveOutcome::Bracketed { residual, .. } => assert!(residual.abs() > 100.),
        other => panic!("{other:?}"),
    }
}

#[test]
fn inactive_vent_sits_at_bl_top() {
    let rise = run(inversion_input(0.));
    check_record(&rise);
    assert_eq!(rise.outcome(), SolveOutcome::Inactive);
    assert_eq!(rise.zcl(), rise.zi());
    assert!(!rise.penetrative());
    assert_eq!(rise.wf(), 0.);
}

#[test]
fn records_hold_across_conditions() {
    for zi in [150., 300., 700., 1500., 3000.] {
        for intensity in [-5., 0., 1., 10., 100., 1000., 5000., 50000.] {
            let rise = run(HourlyInput {
                zi,
                ..inversion_input(intensity)
            });
            check_record(&rise);
        }
    }
}

#[test]
fn penetration_grows_with_intensity() {
    let weak = run(inversion_input(10.));
    let strong = run(inversion_input(5000.));
    assert!(strong.zcl() > weak.zcl());
    // more of the mass is aloft
    assert!(strong.layers().fractions[4] > weak.layers().fractions[4]);
}

#[test]
fn same_inputs_same_record() {
    for intensity in [0., 10., 5000.] {
        assert_eq!(run(inversion_input(intensity)), run(inversion_input(intensity)));
    }
}

#[test]
fn batch_keeps_order_and_isolates_errors() {
    let mut broken = inversion_input(100.);
    broken.wind.pop();
    let cases = vec![
        case("src1", "2021102912", inversion_input(5000.)),
        case("src1", "2021102913", broken),
        case("src2", "2021102912", inversion_input(10.)),
        case("src2", "2021102913", HourlyInput {
            zi: -1.,
            ..inversion_input(10.)
        }),
    ];
    let results = run_batch(&cases, &PlumeConfig::default());
    assert_eq!(results.len(), 4);

    let first = results[0].as_ref().unwrap();
    assert_eq!((first.tag(), first.timestamp()), ("src1", "2021102912"));
    assert!(first.penetrative());
    assert_eq!(
        results[1].as_ref().unwrap_err(),
        &PlumeError::InconsistentInputs
    );
    let third = results[2].as_ref().unwrap();
    assert_eq!(third.tag(), "src2");
    assert!(!third.penetrative());
    assert!(results[3].is_err());
}

#[test]
fn batch_rejects_bad_config_per_case() {
    let config = PlumeConfig {
        bl_frac: 1.5,
        ..PlumeConfig::default()
    };
    let cases = vec![case("src1", "2021102912", inversion_input(10.))];
    let results = run_batch(&cases, &config);
    assert!(matches!(results[0], Err(PlumeError::InvalidConfig(_))));
}

#[test]
fn reads_pipeline_json() {
    let json = r#"{
        "src2": {
            "2021102913": {"PBLH": 700, "Z": [10, 300, 1500], "T": [300, 300, 305], "WSPD": [3, 4, 5], "I": 10}
        },
        "src1": {
            "2021102913": {"PBLH": 650, "Z": [10, 300, 1500], "T": [300, 300, 305], "U": [3, 4, 5], "I": 0},
            "2021102912": {"PBLH": 700, "Z": [10, 300, 1500], "T": [300, 300, 305], "U": [3, 4, 5], "I": 100}
        }
    }"#;
    let cases = cases_from_json(json).unwrap();
    let keys: Vec<_> = cases
        .iter()
        .map(|c| (c.tag.as_str(), c.timestamp.as_str()))
        .collect();
    assert_eq!(
        keys,
        [
            ("src1", "2021102912"),
            ("src1", "2021102913"),
            ("src2", "2021102913")
        ]
    );
    assert_eq!(cases[1].input.zi, 650.);
    assert_eq!(cases[2].input.wind, vec![3., 4., 5.]);

    let results = run_batch(&cases, &PlumeConfig::default());
    assert!(results.iter().all(|r| r.is_ok()));
}

#[test]
fn rejects_bad_pipeline_json() {
    let bad_time = r#"{"src1": {"2021-10-29": {"PBLH": 700, "Z": [10, 300], "T": [300, 301], "U": [3, 4], "I": 10}}}"#;
    assert!(cases_from_json(bad_time).is_err());

    let missing_field = r#"{"src1": {"2021102912": {"PBLH": 700, "Z": [10, 300], "T": [300, 301], "I": 10}}}"#;
    assert!(matches!(
        cases_from_json(missing_field),
        Err(PlumeError::InvalidConfig(_))
    ));
}

#[test]
fn model_selection() {
    let static_source = SourceConfig {
        tag: "fissure".into(),
        lat: 19.46,
        lon: -154.91,
        pr_model: PlumeRiseModel::StaticArea,
        method: None,
        height: Some(150.),
        gas_fractions: None,
    };
    let layers = emission_layers(&static_source, None).unwrap();
    assert_eq!(layers, EmissionLayers::single(150.));

    let dynamic_source = SourceConfig {
        tag: "src1".into(),
        pr_model: PlumeRiseModel::Cwipp,
        method: Some(IntensityMethod::HeatTransfer),
        height: None,
        ..static_source
    };
    assert!(emission_layers(&dynamic_source, None).is_err());
    let rise = run(inversion_input(5000.));
    let layers = emission_layers(&dynamic_source, Some(&rise)).unwrap();
    assert_eq!(&layers, rise.layers());
}

#[test]
fn layers_to_emission_records() {
    let source = SourceConfig {
        tag: "src1".into(),
        lat: 19.4,
        lon: -155.28,
        pr_model: PlumeRiseModel::Cwipp,
        method: Some(IntensityMethod::MassFlux),
        height: None,
        gas_fractions: None,
    };
    let rise = run(inversion_input(5000.));
    let layers = emission_layers(&source, Some(&rise)).unwrap();
    let emission = SourceEmission {
        source: &source,
        so2_tonnes_per_day: 1200.,
        area: 1000.,
        layers: &layers,
    };
    let records = hourly_records("2021102912".parse().unwrap(), &[emission]);
    assert_eq!(records.len(), 2 * NUM_LAYERS);

    // truncation loses less than a mg/h per record
    let truncated: f64 = records.iter().map(|r| r.rate.trunc()).sum();
    let total = mg_per_hour(1200.);
    assert!(truncated <= total + 1e-3);
    assert!(total - truncated < records.len() as f64);
}

#[test]
fn outputs_nest_by_source_and_time() {
    let rise = run(inversion_input(5000.));
    let json = outputs_to_json(&[rise.clone()]).unwrap();
    let value: serde_json::Value = serde_json::from_str(&json).unwrap();
    let record = &value["src1"]["2021102912"];
    assert_eq!(record["penetrative"], serde_json::Value::Bool(true));
    assert_eq!(record["layers"]["heights"].as_array().map(Vec::len), Some(5));
    assert_abs_diff_eq!(record["zcl"].as_f64().unwrap(), rise.zcl(), epsilon = 1e-9);
}

fn source(tag: &str, pr_model: PlumeRiseModel, method: Option<IntensityMethod>) -> SourceConfig {
    SourceConfig {
        tag: tag.into(),
        lat: 19.4,
        lon: -155.28,
        pr_model,
        method,
        height: method.map_or(Some(150.), |_| None),
        gas_fractions: None,
    }
}

fn source_hours(num_hours: usize, so2: Option<f64>) -> Vec<SourceHour> {
    (0..num_hours)
        .map(|hour| {
            let input = inversion_input(0.);
            SourceHour {
                timestamp: format!("20211029{hour:02}"),
                met: HourlyMet {
                    zi: input.zi,
                    height: input.height,
                    theta: input.theta,
                    wind: input.wind,
                    wind_10m: 2. + hour as f64,
                },
                vent: VentHour {
                    temperature: 1000. + 10. * hour as f64,
                    area: 2000.,
                    so2_tonnes_per_day: so2,
                },
            }
        })
        .collect()
}

fn two_method_run() -> RunConfig {
    RunConfig {
        plume: PlumeConfig::default(),
        sources: vec![
            source("vent_hc", PlumeRiseModel::Cwipp, Some(IntensityMethod::HeatTransfer)),
            source("fissure", PlumeRiseModel::StaticArea, None),
            source("vent_mass", PlumeRiseModel::Cwipp, Some(IntensityMethod::MassFlux)),
        ],
        spinup: 1,
        run_hours: 4,
    }
}

#[test]
fn intensity_follows_each_source_method() {
    let run = two_method_run();
    let mut hours = BTreeMap::new();
    hours.insert("vent_hc".to_string(), source_hours(4, None));
    hours.insert("vent_mass".to_string(), source_hours(4, Some(3000.)));

    let cases = prepare_cases(&run, &hours).unwrap();
    // three post-spin-up hours for each dynamic source, none for the static one
    assert_eq!(cases.len(), 6);
    assert!(cases[..3].iter().all(|c| c.tag == "vent_hc"));
    assert!(cases[3..].iter().all(|c| c.tag == "vent_mass"));
    assert_eq!(cases[0].timestamp, "2021102901");
    assert_eq!(cases[5].timestamp, "2021102903");

    for (case, hour) in cases[..3].iter().zip(&hours["vent_hc"][1..]) {
        let vent = VentState {
            temperature: hour.vent.temperature,
            area: hour.vent.area,
        };
        let expected = heat_transfer(&vent, hour.met.wind_10m).unwrap();
        assert_abs_diff_eq!(case.input.intensity, expected, epsilon = 1e-9);
        assert!(case.input.intensity > 0.);
    }
    for (case, hour) in cases[3..].iter().zip(&hours["vent_mass"][1..]) {
        let vent = VentState {
            temperature: hour.vent.temperature,
            area: hour.vent.area,
        };
        // the lowest sounding level is the surface temperature
        let expected = mass_flux(&vent, 300., 3000., &GasComposition::default()).unwrap();
        assert_abs_diff_eq!(case.input.intensity, expected, epsilon = 1e-9);
        assert!(case.input.intensity > 0.);
    }
    assert_ne!(cases[0].input.intensity, cases[3].input.intensity);

    let results = run_batch(&cases, &run.plume);
    assert_eq!(results.len(), 6);
    for (case, result) in cases.iter().zip(&results) {
        let rise = result.as_ref().unwrap();
        assert_eq!(rise.tag(), case.tag);
        assert_eq!(rise.timestamp(), case.timestamp);
        assert_abs_diff_eq!(rise.intensity(), case.input.intensity);
        check_record(rise);
    }
}

#[test]
fn case_preparation_errors() {
    let run = two_method_run();

    // mass flux without an emission rate
    let mut hours = BTreeMap::new();
    hours.insert("vent_hc".to_string(), source_hours(4, None));
    hours.insert("vent_mass".to_string(), source_hours(4, None));
    assert!(matches!(
        prepare_cases(&run, &hours),
        Err(PlumeError::InvalidInput(_))
    ));

    // a source with no inputs, or too few hours
    hours.insert("vent_mass".to_string(), source_hours(4, Some(3000.)));
    let mut missing = hours.clone();
    missing.remove("vent_hc");
    assert!(matches!(
        prepare_cases(&run, &missing),
        Err(PlumeError::InvalidConfig(_))
    ));
    hours.insert("vent_hc".to_string(), source_hours(3, None));
    assert!(matches!(
        prepare_cases(&run, &hours),
        Err(PlumeError::InvalidConfig(_))
    ));

    // a bad timestamp inside the forecast window
    let mut series = source_hours(4, None);
    series[2].timestamp = "2021023102".into();
    hours.insert("vent_hc".to_string(), series);
    assert!(prepare_cases(&run, &hours).is_err());

    // spin-up hours are not read
    let mut series = source_hours(4, None);
    series[0].timestamp = "garbage".into();
    hours.insert("vent_hc".to_string(), series);
    assert_eq!(prepare_cases(&run, &hours).unwrap().len(), 6);
}

#[test]
fn reads_source_hours_json() {
    let json = r#"{
        "vent_mass": [
            {"timestamp": "2021102900",
             "met": {"PBLH": 700, "Z": [10, 300, 1500], "T": [299, 300, 305], "U": [3, 4, 5], "U10": 2.5},
             "vent": {"temperature": 1100, "area": 1500, "so2": 2000}},
            {"timestamp": "2021102901",
             "met": {"PBLH": 650, "Z": [10, 300, 1500], "T": [299, 300, 305], "WSPD": [3, 4, 5], "U10": 3},
             "vent": {"temperature": 1100, "area": 1500, "so2": 2500}}
        ]
    }"#;
    let hours = source_hours_from_json(json).unwrap();
    let series = &hours["vent_mass"];
    assert_eq!(series.len(), 2);
    assert_eq!(series[1].met.wind_10m, 3.);
    assert_eq!(series[1].vent.so2_tonnes_per_day, Some(2500.));

    let source = source("vent_mass", PlumeRiseModel::Cwipp, Some(IntensityMethod::MassFlux));
    let intensity = source_intensity(&source, &series[0].met, &series[0].vent).unwrap();
    let vent = VentState {
        temperature: 1100.,
        area: 1500.,
    };
    let expected = mass_flux(&vent, 299., 2000., &GasComposition::default()).unwrap();
    assert_abs_diff_eq!(intensity, expected, epsilon = 1e-9);

    let no_rate = r#"{"v": [{"timestamp": "2021102900",
        "met": {"PBLH": 700, "Z": [10], "T": [300], "U": [3], "U10": 2},
        "vent": {"temperature": 1100, "area": 1500}}]}"#;
    let hours = source_hours_from_json(no_rate).unwrap();
    assert_eq!(hours["v"][0].vent.so2_tonnes_per_day, None);
}
