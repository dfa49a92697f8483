//! Flight simulation executable entry point.
//!
//! # Architecture
//!
//! The executable flies a single coverage mission:
//!
//!     - Initialise the session and logger
//!     - Load the flight, navigation, search area and simulation parameters
//!     - Build the waypoint list, either:
//!         - from a waypoint file given as the only argument, or
//!         - by executing a lawnmower pattern over the configured search area
//!     - Step the simulation until navigation completes or the time limit is reached
//!     - Save a summary of the mission into the session directory
//!
//! Telemetry is archived every logic tick into `arch/sim/telemetry.csv`, and the flight
//! controller's status reports into `arch/flt_ctrl/status_report.csv`.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use serde::Serialize;
use std::env;

// Internal
use flt_lib::{
    events::{NavEvent, PatternEvent},
    flt_ctrl::VehicleController,
    geo::LocalPosition,
    nav::{NavParams, Navigator, WaypointList},
    pattern::{GeneratedPattern, LawnmowerPattern, SearchAreaConfig},
    sim::{SimParams, Simulation},
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    module::State,
    session::Session,
};

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// Summary of the mission saved at the end of the run.
#[derive(Serialize)]
struct MissionSummary {
    completed: bool,
    duration_s: f64,
    final_position: LocalPosition,
    num_targets_reached: usize,
    pattern: Option<GeneratedPattern>,
    nav_events: Vec<NavEvent>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    // ---- EARLY INITIALISATION ----

    // Initialise session
    let session = Session::new("flt_exec", "sessions").wrap_err("Failed to create the session")?;

    // Initialise logger
    logger_init(LevelFilter::Info, &session).wrap_err("Failed to initialise logging")?;

    // Log information on this execution.
    info!("Flight Simulation Executable\n");
    info!("Running on: {}", host::get_host_info());
    info!("Session directory: {:?}\n", session.session_root);

    // ---- LOAD PARAMETERS ----

    let sim_params: SimParams =
        util::params::load("sim.toml").wrap_err("Could not load sim params")?;
    let nav_params: NavParams =
        util::params::load("nav.toml").wrap_err("Could not load nav params")?;
    let search_area: SearchAreaConfig =
        util::params::load("search_area.toml").wrap_err("Could not load search area params")?;

    info!("Exec parameters loaded");

    // ---- INITIALISE MODULES ----

    let mut vehicle = VehicleController::default();
    vehicle
        .init("flt_ctrl.toml", &session)
        .wrap_err("Failed to initialise FltCtrl")?;
    info!("FltCtrl init complete");

    let mut navigator = Navigator::new(nav_params, vehicle);
    let nav_rx = navigator.subscribe();

    let mut sim =
        Simulation::new(sim_params, navigator).wrap_err("Failed to initialise the simulation")?;
    sim.init_archive(&session)
        .wrap_err("Failed to initialise the telemetry archive")?;
    info!("Simulation init complete");

    // ---- LOAD WAYPOINTS ----

    // Collect all arguments
    let args: Vec<String> = env::args().collect();
    debug!("CLI arguments: {:?}", args);

    let pattern = if args.len() == 2 {
        info!("Loading waypoints from \"{}\"", &args[1]);

        let list: WaypointList =
            util::params::load_from_path(&args[1]).wrap_err("Failed to load the waypoint file")?;

        let nav = sim.navigator_mut();
        nav.queue_mut().load(list);
        nav.process_queue()
            .wrap_err("Failed to start navigating the waypoint list")?;

        None
    } else {
        let mut lawnmower = LawnmowerPattern::new(search_area);
        let pattern_rx = lawnmower.subscribe();

        let generated = lawnmower
            .execute(sim.navigator_mut())
            .wrap_err("Failed to execute the lawnmower pattern")?;

        for event in pattern_rx.try_iter() {
            if let PatternEvent::CoverageCalculated(c) = event {
                info!("Expected coverage: {:.1} %", c);
            }
        }

        Some(generated)
    };

    // ---- MAIN LOOP ----

    info!("Begining main loop\n");

    let completed = sim
        .run(|record| {
            if record.tilt_limited {
                debug!("Tilt limited at {:.2} s", record.time_s);
            }
        })
        .wrap_err("Error while running the simulation")?;

    if completed {
        info!("Mission completed in {:.2} s", sim.time_s());
    } else {
        warn!(
            "Mission did not complete within {:.0} s",
            sim.params().max_duration_s
        );
    }

    // ---- SAVE SUMMARY ----

    let nav_events: Vec<NavEvent> = nav_rx.try_iter().collect();
    let summary = MissionSummary {
        completed,
        duration_s: sim.time_s(),
        final_position: sim.navigator().vehicle().position(),
        num_targets_reached: nav_events
            .iter()
            .filter(|e| matches!(e, NavEvent::TargetReached(_)))
            .count(),
        pattern,
        nav_events,
    };

    session
        .save("mission_summary.json", &summary)
        .wrap_err("Failed to save the mission summary")?;

    info!("End of execution");

    Ok(())
}
