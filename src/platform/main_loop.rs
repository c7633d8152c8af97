use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    path::Path,
    time::{Duration, Instant},
};

use clap::{App, AppSettings, Arg, ArgMatches, SubCommand};
use log::{error, info, warn};

use crate::{
    floating_type_mod::FT, simulation_parameters::SimulationParams, vec2f, write_statistics, FluidSimulation2d, V2,
};

use super::vtk_exporter::VtkExporter;

const CARGO_PKG_AUTHORS: &str = env!("CARGO_PKG_AUTHORS");
const CARGO_PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const CARGO_PKG_DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// The reference block of 21 x 21 particles.
const DEFAULT_PARTICLE_COUNT: &str = "441";

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

pub fn start() {
    let matches = App::new("Double Density SPH")
        .version(CARGO_PKG_VERSION)
        .author(CARGO_PKG_AUTHORS)
        .about(CARGO_PKG_DESCRIPTION)
        .setting(AppSettings::SubcommandRequiredElseHelp)
        .arg(
            Arg::with_name("v")
                .short("v")
                .multiple(true)
                .global(true)
                .help("Sets the level of verbosity"),
        )
        .subcommand(
            SubCommand::with_name("run")
                .about("Run simulation headless with given config")
                .arg(
                    Arg::with_name("SIMULATION_CONFIG")
                        .help("Sets the simulation paramaters (defaults are used if missing)")
                        .required(false)
                        .index(1),
                )
                .arg(
                    Arg::with_name("OVERWRITE_CONFIG_FILE")
                        .long("overwrite-config-file")
                        .short("c")
                        .required(false)
                        .takes_value(true)
                        .help("Overwrite individual entries of the config"),
                )
                .arg(
                    Arg::with_name("PARTICLES")
                        .long("particles")
                        .short("n")
                        .takes_value(true)
                        .default_value(DEFAULT_PARTICLE_COUNT)
                        .help("Number of fluid particles"),
                )
                .arg(
                    Arg::with_name("STEPS")
                        .long("steps")
                        .short("s")
                        .takes_value(true)
                        .default_value("1000")
                        .help("Stop simulation after the given number of steps"),
                )
                .arg(
                    Arg::with_name("ATTRACTOR")
                        .long("attractor")
                        .takes_value(true)
                        .allow_hyphen_values(true)
                        .help("Activate the attractor at X,Y"),
                )
                .arg(
                    Arg::with_name("VTK_OUTPUT")
                        .long("vtk-output")
                        .takes_value(true)
                        .help("Directory for VTK snapshots"),
                )
                .arg(
                    Arg::with_name("EXPORT_EVERY")
                        .long("export-every")
                        .takes_value(true)
                        .default_value("1")
                        .help("Write a VTK snapshot every K steps"),
                )
                .arg(
                    Arg::with_name("STATISTICS_ENABLED")
                        .help("Track performance of individual steps")
                        .short("p")
                        .long("statistics-enabled")
                        .takes_value(false),
                )
                .arg(
                    Arg::with_name("STATISTICS_PATH")
                        .long("statistics-path")
                        .short("w")
                        .required(false)
                        .takes_value(true)
                        .help("Where to write statistics to"),
                ),
        )
        .subcommand(
            SubCommand::with_name("bench")
                .about("Measure the step time for 2^A..=2^B particles")
                .arg(
                    Arg::with_name("STEPS")
                        .long("steps")
                        .short("s")
                        .takes_value(true)
                        .default_value("3000"),
                )
                .arg(
                    Arg::with_name("MIN_EXPONENT")
                        .long("min-exponent")
                        .takes_value(true)
                        .default_value("10"),
                )
                .arg(
                    Arg::with_name("MAX_EXPONENT")
                        .long("max-exponent")
                        .takes_value(true)
                        .default_value("13"),
                ),
        )
        .subcommand(SubCommand::with_name("print-config").about("Print the default simulation config as YAML"))
        .get_matches();

    init_logging(matches.occurrences_of("v"));

    let result = if let Some(run_matches) = matches.subcommand_matches("run") {
        run_main(run_matches)
    } else if let Some(bench_matches) = matches.subcommand_matches("bench") {
        bench_main(bench_matches)
    } else if matches.subcommand_matches("print-config").is_some() {
        SimulationParams::default()
            .to_yaml_string()
            .map(|yaml| print!("{}", yaml))
            .map_err(|e| e.to_string())
    } else {
        unreachable!()
    };

    if let Err(e) = result {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn parse_value<T: std::str::FromStr>(matches: &ArgMatches, name: &str) -> Result<T, String>
where
    T::Err: std::fmt::Display,
{
    let value = matches
        .value_of(name)
        .ok_or_else(|| format!("missing value for {}", name))?;
    value
        .parse::<T>()
        .map_err(|e| format!("invalid value '{}' for {}: {}", value, name, e))
}

fn parse_point(s: &str) -> Result<V2, String> {
    let coords: Vec<&str> = s.split(',').collect();
    if coords.len() != 2 {
        return Err(format!("expected a point as X,Y but got '{}'", s));
    }
    let x = coords[0].trim().parse::<FT>().map_err(|e| format!("invalid x in '{}': {}", s, e))?;
    let y = coords[1].trim().parse::<FT>().map_err(|e| format!("invalid y in '{}': {}", s, e))?;
    Ok(vec2f(x, y))
}

fn load_simulation_params(run_matches: &ArgMatches) -> Result<SimulationParams, String> {
    let overwrite_path = run_matches.value_of("OVERWRITE_CONFIG_FILE").map(Path::new);

    let simulation_params = match run_matches.value_of("SIMULATION_CONFIG") {
        Some(parameter_file) => SimulationParams::load(Path::new(parameter_file), overwrite_path)
            .map_err(|e| format!("failed to load {}: {}", parameter_file, e))?,
        None => {
            if overwrite_path.is_some() {
                warn!("overwrite config is ignored without a simulation config");
            }
            SimulationParams::default()
        }
    };
    info!("{:?}", simulation_params);
    Ok(simulation_params)
}

fn run_main(run_matches: &ArgMatches) -> Result<(), String> {
    let simulation_params = load_simulation_params(run_matches)?;

    let num_particles: usize = parse_value(run_matches, "PARTICLES")?;
    let max_steps: usize = parse_value(run_matches, "STEPS")?;
    let export_every: usize = parse_value(run_matches, "EXPORT_EVERY")?;
    if export_every == 0 {
        return Err("--export-every must be at least 1".into());
    }
    let attractor = run_matches.value_of("ATTRACTOR").map(parse_point).transpose()?;
    let counters_enabled = run_matches.is_present("STATISTICS_ENABLED");
    let statistics_path_opt = run_matches.value_of("STATISTICS_PATH");

    let mut vtk_exporter = match run_matches.value_of("VTK_OUTPUT") {
        Some(folder) => Some(VtkExporter::new(folder, "fluid")?),
        None => None,
    };

    let mut fluid_simulation =
        FluidSimulation2d::initialize(simulation_params, num_particles).map_err(|e| e.to_string())?;
    fluid_simulation.enable_counters(counters_enabled);

    if let Some(attractor) = attractor {
        fluid_simulation.set_attractor(attractor, true);
    }

    let mut total_duration: Duration = Duration::from_nanos(0);

    for frame_number in 0..max_steps {
        // perform the main loop
        let a = Instant::now();
        let simulation_failed = catch_unwind(AssertUnwindSafe(|| {
            fluid_simulation.step();
        }))
        .is_err();
        let b = Instant::now();

        if simulation_failed {
            return Err(format!("simulation failed in step {}", frame_number));
        }

        total_duration += b - a;

        if let Some(vtk_exporter) = &mut vtk_exporter {
            if frame_number % export_every == 0 {
                vtk_exporter.add_snapshot(&fluid_simulation)?;
            }
        }

        info!(
            "{:05}: {} fluid particles {}msec ({}msec AVG)",
            frame_number,
            fluid_simulation.num_particles(),
            (b - a).as_secs_f32() * 1000.,
            (total_duration / (frame_number as u32 + 1)).as_secs_f32() * 1000.
        );
    }

    println!("{}", fluid_simulation.statistics());

    if counters_enabled {
        let s = write_statistics(&fluid_simulation).map_err(|e| e.to_string())?;
        print!("{}", s);
        if let Some(statistics_path) = statistics_path_opt {
            std::fs::write(statistics_path, s).map_err(|e| format!("failed to write {}: {}", statistics_path, e))?;
        }
    }

    fluid_simulation.shutdown();
    Ok(())
}

fn bench_main(bench_matches: &ArgMatches) -> Result<(), String> {
    let steps: usize = parse_value(bench_matches, "STEPS")?;
    let min_exponent: u32 = parse_value(bench_matches, "MIN_EXPONENT")?;
    let max_exponent: u32 = parse_value(bench_matches, "MAX_EXPONENT")?;
    if min_exponent > max_exponent || max_exponent > 31 {
        return Err(format!("invalid exponent range {}..={}", min_exponent, max_exponent));
    }

    for exponent in min_exponent..=max_exponent {
        let num_particles = 1usize << exponent;
        let mut fluid_simulation = FluidSimulation2d::initialize(SimulationParams::default(), num_particles)
            .map_err(|e| e.to_string())?;

        let start = Instant::now();
        for _ in 0..steps {
            fluid_simulation.step();
        }
        let elapsed = start.elapsed();

        let per_step_us = if steps > 0 {
            elapsed.as_secs_f64() * 1.0e6 / steps as f64
        } else {
            0.
        };
        println!(
            "{} particles: {} steps in {:.1}ms ({:.1}us per step)",
            num_particles,
            steps,
            elapsed.as_secs_f64() * 1000.,
            per_step_us
        );

        fluid_simulation.shutdown();
    }

    Ok(())
}

#[test]
fn points_are_parsed_from_the_command_line() {
    assert_eq!(parse_point("1.5,-2").unwrap(), vec2f(1.5, -2.));
    assert_eq!(parse_point(" 0 , 20 ").unwrap(), vec2f(0., 20.));
    assert!(parse_point("1").is_err());
    assert!(parse_point("a,b").is_err());
    assert!(parse_point("1,2,3").is_err());
}
