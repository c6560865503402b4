use approx::assert_relative_eq;
use racedyn::core::ai_driver::{AiDriver, AiState, DriveEnv};
use racedyn::core::car::CarSpec;
use racedyn::core::driver::{DriverPars, DriverProfile};
use racedyn::core::race::RaceSession;
use racedyn::core::race_state::{ClassStatus, SessionPhase};
use racedyn::core::tire::TireCompound;
use racedyn::core::track::{generate_oval, oval_track_pars, TrackPath, Weather};
use racedyn::core::vehicle::{TrackContext, VehicleDynamics, VehicleState, FIXED_TIMESTEP};
use racedyn::post::race_result::RaceEventKind;
use racedyn::pre::read_sim_pars::{load_track, read_sim_pars, SimPars};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::sync::Arc;

fn input_path(rel: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("..").join("input").join(rel)
}

fn sample_pars(participants: Vec<u32>, tot_no_laps: u32) -> (SimPars, Arc<TrackPath>) {
    let mut sim_pars = read_sim_pars(&input_path("parameters/oval.json")).expect("sample parameters");
    let track = load_track(&sim_pars.track_pars, &input_path("tracks/oval.csv")).expect("sample track");

    sim_pars.race_pars.participants = participants;
    sim_pars.race_pars.tot_no_laps = tot_no_laps;
    for car_pars in sim_pars.car_pars_all.values_mut() {
        car_pars.reliability = 1.0;
    }
    (sim_pars, Arc::new(track))
}

fn session(sim_pars: &SimPars, track: &Arc<TrackPath>) -> RaceSession {
    RaceSession::new(
        &sim_pars.race_pars,
        Arc::clone(track),
        &sim_pars.driver_pars_all,
        &sim_pars.car_pars_all,
    )
    .expect("valid session")
}

fn ideal_driver(consistency: f64) -> DriverProfile {
    DriverProfile::new(&DriverPars {
        initials: "TST".to_owned(),
        name: "Test Driver".to_owned(),
        skill: 1.0,
        aggression: 0.5,
        consistency,
        wet_skill: 1.0,
        reaction_time: 0.0,
    })
    .expect("valid profile")
}

fn test_oval() -> TrackPath {
    let pars = oval_track_pars("StraightTest", 400.0, 90.0);
    TrackPath::new(&pars, &generate_oval(400.0, 90.0, 5.0, 7.0)).expect("valid oval")
}

#[test]
fn sample_race_loads_with_all_cars_on_the_grid() {
    let (sim_pars, track) = sample_pars(vec![1, 2, 3, 4, 5, 6], 10);
    let session = session(&sim_pars, &track);

    assert_eq!(session.cars().len(), 6);
    assert_eq!(session.race_state().phase, SessionPhase::Countdown);
    assert!(track.pit_lane().is_some());
    assert_relative_eq!(track.length, 1365.49, epsilon = 0.5);
    assert_eq!(session.race_state().order, vec![1, 2, 3, 4, 5, 6]);
}

fn run_to_finish(session: &mut RaceSession, max_ticks: u32) {
    let mut ticks = 0;
    while !session.is_finished() && ticks < max_ticks {
        session.simulate_timestep();
        ticks += 1;
    }
}

#[test]
fn identical_seeds_reproduce_the_race() {
    let (mut sim_pars, track) = sample_pars(vec![1, 2, 3], 2);
    sim_pars.race_pars.weather_change_interval = Some(20.0);
    let mut a = session(&sim_pars, &track);
    let mut b = session(&sim_pars, &track);

    for _ in 0..1800 {
        a.simulate_timestep();
        b.simulate_timestep();
    }

    for (car_a, car_b) in a.cars().iter().zip(b.cars().iter()) {
        assert_eq!(car_a.state.position, car_b.state.position);
        assert_eq!(car_a.state.velocity, car_b.state.velocity);
        assert_eq!(car_a.last_controls, car_b.last_controls);
    }
    assert_eq!(a.race_state().order, b.race_state().order);
    assert_eq!(a.events().len(), b.events().len());

    // lap and sector times are bit-identical as well
    run_to_finish(&mut a, 60 * 300);
    run_to_finish(&mut b, 60 * 300);
    assert!(a.is_finished() && b.is_finished());
    assert_eq!(a.weather(), b.weather());
    assert!(a.race_state().timings.iter().any(|t| t.lap_times.len() == 2));
    for (t_a, t_b) in a.race_state().timings.iter().zip(b.race_state().timings.iter()) {
        assert_eq!(t_a.lap_times, t_b.lap_times);
        assert_eq!(t_a.sector_times, t_b.sector_times);
        assert_eq!(t_a.race_times, t_b.race_times);
    }
}

#[test]
fn sample_race_finishes_without_retirements() {
    let (sim_pars, track) = sample_pars(vec![1, 2, 3, 4, 5, 6], 3);
    let mut session = session(&sim_pars, &track);
    run_to_finish(&mut session, 60 * 400);
    assert!(session.is_finished());

    let result = session.get_race_result();
    assert!(!result.aborted);
    assert!(session.race_state().dnf_list.is_empty(), "retired: {:?}", session.race_state().dnf_list);
    assert_eq!(result.classification.len(), 6);
    for entry in result.classification.iter() {
        assert_eq!(entry.status, ClassStatus::Finished, "car {}: {:?}", entry.car_no, entry.dnf_reason);
        assert_eq!(entry.laps, 3);
    }
}

#[test]
fn pit_stop_cycle_fits_fresh_tires() {
    let (mut sim_pars, track) = sample_pars(vec![1, 2], 5);
    if let Some(car_pars) = sim_pars.car_pars_all.get_mut(&1) {
        car_pars.strategy.stint_compounds = vec![TireCompound::Medium, TireCompound::Soft];
    }
    let mut session = session(&sim_pars, &track);

    // call the car in once it is between pit exit and pit entry
    let mut ticks = 0;
    loop {
        session.simulate_timestep();
        ticks += 1;
        assert!(ticks < 60 * 60, "car 1 never reached the back straight");
        let s = session.car(1).expect("car 1").sh.get_s_track();
        if session.race_state().phase == SessionPhase::Racing && (300.0..1100.0).contains(&s) {
            break;
        }
    }
    assert!(session.request_pit(1));
    assert!(!session.request_pit(1));

    let mut standstill_ticks = 0;
    let mut age_at_stop = 0.0;
    let mut released = false;
    for _ in 0..(60 * 120) {
        session.simulate_timestep();
        let car = session.car(1).expect("car 1");
        if car.sh.pit_standstill_act {
            standstill_ticks += 1;
            assert_eq!(car.state.speed(), 0.0);
            age_at_stop = car.state.tires.age;
        } else if standstill_ticks > 0 && !released {
            released = true;
            assert_eq!(car.state.tires.compound, TireCompound::Soft);
            assert_eq!(car.state.tires.wear, 1.0);
            assert!(car.state.tires.age < 0.1);
        }
        if released && car.ai().map(|ai| ai.state()) == Some(AiState::Racing) {
            break;
        }
    }

    assert!(released);
    assert!((149..=152).contains(&standstill_ticks), "standstill ticks {}", standstill_ticks);
    assert!(age_at_stop > 10.0);
    assert_eq!(session.race_state().timing(1).expect("timing").pit_stops, 1);
    assert_eq!(session.race_state().timing(2).expect("timing").pit_stops, 0);
    assert!(session
        .events()
        .iter()
        .any(|ev| ev.kind == RaceEventKind::PitStop && ev.cars == vec![1]));
    assert!(session.car(1).expect("car 1").is_running());
}

#[test]
fn speed_stays_below_power_drag_bound_and_order_is_strict() {
    let (sim_pars, track) = sample_pars(vec![1, 2, 3, 4], 2);
    let mut session = session(&sim_pars, &track);

    for _ in 0..2400 {
        session.simulate_timestep();

        for car in session.cars().iter() {
            assert!(car.state.speed() <= car.spec.max_speed_bound() + 1e-9);
        }

        let race_state = session.race_state();
        let mut order = race_state.order.clone();
        order.sort_unstable();
        order.dedup();
        assert_eq!(order.len(), race_state.order.len());

        let mut positions: Vec<u32> = race_state
            .timings
            .iter()
            .filter(|timing| !timing.is_retired())
            .map(|timing| timing.position)
            .collect();
        positions.sort_unstable();
        let expected: Vec<u32> = (1..=positions.len() as u32).collect();
        assert_eq!(positions, expected);
    }
}

#[test]
fn one_lap_race_is_classified() {
    let (mut sim_pars, track) = sample_pars(vec![1, 2], 1);
    sim_pars.race_pars.finish_mode = Default::default();
    let mut session = session(&sim_pars, &track);

    let mut ticks = 0;
    while !session.is_finished() && ticks < 60 * 240 {
        session.simulate_timestep();
        ticks += 1;
    }
    assert!(session.is_finished());

    let result = session.get_race_result();
    assert!(!result.aborted);
    let winner = result.winner().expect("a classified winner");
    let winner_idx = result
        .car_driver_pairs
        .iter()
        .position(|pair| pair.car_no == winner)
        .expect("winner in the result");
    assert!(result.laptimes[winner_idx][1] > 0.0);
    assert_eq!(result.classification[0].laps, 1);
    assert_eq!(result.classification.len(), 2);
    assert_eq!(result.classification[0].status, ClassStatus::Finished);
    assert_ne!(result.classification[1].status, ClassStatus::Dnf);
}

#[test]
fn side_by_side_identical_cars_keep_equal_speed() {
    let (sim_pars, _) = sample_pars(vec![1, 2], 1);
    let track = test_oval();
    let spec = CarSpec::new(&sim_pars.car_pars_all[&1]).expect("valid car");
    let dynamics = VehicleDynamics::new(&spec);
    let profile = ideal_driver(1.0);

    // both cars next to each other at the start of the bottom straight
    let s0 = track.length - 180.0;
    let heading = track.heading_at(s0);
    let mut states = [
        VehicleState::new(track.point_at(s0, 3.0), heading, &spec),
        VehicleState::new(track.point_at(s0, -3.0), heading, &spec),
    ];
    let mut drivers = [AiDriver::new(&profile, FIXED_TIMESTEP), AiDriver::new(&profile, FIXED_TIMESTEP)];
    let mut rngs = [ChaCha8Rng::seed_from_u64(1), ChaCha8Rng::seed_from_u64(2)];

    for _ in 0..150 {
        for k in 0..2 {
            let env = DriveEnv {
                dt: FIXED_TIMESTEP,
                wet: false,
                car_no: k as u32 + 1,
            };
            let controls = drivers[k].decide(&states[k], &profile, &spec, Some(&track), &[], &env, &mut rngs[k]);
            let loc = track.locate(states[k].position, None).expect("on track");
            let ctx = TrackContext::new(track.surface_at(&loc), Weather::Dry.grip_multiplier());
            dynamics
                .step(&mut states[k], &controls, &ctx, FIXED_TIMESTEP)
                .expect("stable step");
        }
    }

    assert!(states[0].speed() > 10.0);
    assert_relative_eq!(states[0].speed(), states[1].speed(), epsilon = 0.05);
}

#[test]
fn inconsistent_driver_jitters_but_stays_on_track() {
    let (sim_pars, _) = sample_pars(vec![1], 1);
    let track = test_oval();
    let spec = CarSpec::new(&sim_pars.car_pars_all[&1]).expect("valid car");
    let dynamics = VehicleDynamics::new(&spec);
    let profile = ideal_driver(0.0);

    let s0 = track.length - 180.0;
    let mut state = VehicleState::new(track.point_at(s0, 0.0), track.heading_at(s0), &spec);
    let mut driver = AiDriver::new(&profile, FIXED_TIMESTEP);
    let mut rng = ChaCha8Rng::seed_from_u64(99);
    let env = DriveEnv {
        dt: FIXED_TIMESTEP,
        wet: false,
        car_no: 1,
    };

    let mut max_abs_steering: f64 = 0.0;
    let mut steering_changes = 0;
    let mut last_steering = 0.0;
    for _ in 0..240 {
        let controls = driver.decide(&state, &profile, &spec, Some(&track), &[], &env, &mut rng);
        if (controls.steering - last_steering).abs() > 1e-6 {
            steering_changes += 1;
        }
        last_steering = controls.steering;
        max_abs_steering = max_abs_steering.max(controls.steering.abs());

        let loc = track.locate(state.position, None).expect("on track");
        assert!(loc.is_within_limits());
        let ctx = TrackContext::new(track.surface_at(&loc), Weather::Dry.grip_multiplier());
        dynamics.step(&mut state, &controls, &ctx, FIXED_TIMESTEP).expect("stable step");
    }

    assert!(steering_changes > 100);
    assert!(max_abs_steering > 0.0 && max_abs_steering < 0.5);
    assert!(state.speed() > 10.0);
}
