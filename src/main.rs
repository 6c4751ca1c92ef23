//! Command line planner: plans a free flyer with double integrator dynamics through
//! a scene read from YAML and prints the SCP iteration history.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Parser;
use nalgebra::DVector;

use rs_scp_trajopt::clarabel_solver::ClarabelSolver;
use rs_scp_trajopt::dynamics::{DoubleIntegrator, DynamicsModel};
use rs_scp_trajopt::environment::Environment;
use rs_scp_trajopt::goals::{Goal, GoalRegion, GoalSet};
use rs_scp_trajopt::params::ScpParam;
use rs_scp_trajopt::planner::TrajectoryOptimizer;
use rs_scp_trajopt::problem::{ProblemDefinition, TrajectoryOptimizationProblem};
use rs_scp_trajopt::robot::FreeFlyer;
use rs_scp_trajopt::scp_problem::ScpProblem;
use rs_scp_trajopt::utils::{dump_iterations, dump_trajectory, parse_vector};

/// SCP trajectory optimizer for a spherical free flyer.
#[derive(Parser)]
#[command(version, about)]
struct Cli {
    /// YAML file with keep-in zones, keep-out zones and obstacles.
    scene: PathBuf,

    /// YAML file with SCP parameters. Defaults are used if not given.
    #[arg(short, long)]
    params: Option<PathBuf>,

    /// Start position "x,y,z" or full state "x,y,z,vx,vy,vz".
    #[arg(long, allow_hyphen_values = true)]
    start: String,

    /// Goal position or full state, reached at the final time.
    #[arg(long, allow_hyphen_values = true)]
    goal: String,

    /// Number of time steps.
    #[arg(short = 'n', long, default_value_t = 21)]
    steps: usize,

    /// Final time (guess if the final time is free).
    #[arg(long, default_value_t = 10.0)]
    tf: f64,

    /// Radius of the robot.
    #[arg(short, long, default_value_t = 0.2)]
    radius: f64,

    /// Maximal absolute acceleration along every axis.
    #[arg(long)]
    max_acceleration: Option<f64>,

    /// Maximal absolute velocity along every axis.
    #[arg(long)]
    max_velocity: Option<f64>,

    /// Print the planned trajectory.
    #[arg(short, long)]
    dump: bool,
}

fn full_state(text: &str, what: &str) -> Result<DVector<f64>> {
    let values = parse_vector(text).map_err(anyhow::Error::msg).with_context(|| format!("invalid {}", what))?;
    match values.len() {
        3 => Ok(DVector::from_iterator(6, values.iter().copied().chain([0.0; 3]))),
        6 => Ok(values),
        n => bail!("{} must have 3 or 6 values, got {}", what, n),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let environment = Environment::from_yaml_file(&cli.scene)
        .with_context(|| format!("reading scene {}", cli.scene.display()))?;
    let param = match &cli.params {
        Some(path) => ScpParam::from_yaml_file(path)
            .with_context(|| format!("reading parameters {}", path.display()))?,
        None => ScpParam::default(),
    };

    let start = full_state(&cli.start, "start")?;
    let goal = full_state(&cli.goal, "goal")?;
    let model = DoubleIntegrator {
        max_velocity: cli.max_velocity,
    };
    let robot = match cli.max_acceleration {
        Some(limit) => FreeFlyer::new(cli.radius, vec![limit; model.u_dim()]),
        None => FreeFlyer::unlimited(cli.radius),
    };
    let goals = GoalSet::new().with(
        cli.tf,
        Goal::new((0..model.x_dim()).collect(), GoalRegion::point(goal)?)?,
    );

    let definition = ProblemDefinition::new(Arc::new(robot), Arc::new(model), environment, start, goals)?;
    let problem =
        TrajectoryOptimizationProblem::discretize(definition, cli.steps, cli.tf, param.fixed_final_time)?;
    let problem = ScpProblem::new(problem, param)?;

    let optimizer = TrajectoryOptimizer::new(ClarabelSolver::default());
    let solution = optimizer.solve(&problem);

    dump_iterations(&solution.scp);
    if let Some(shooting) = &solution.shooting {
        println!(
            "Shooting: {} after {} iterations, residual {:.3e}",
            shooting.status,
            shooting.iterations,
            shooting.residual_history.last().copied().unwrap_or(f64::NAN)
        );
    }
    println!(
        "{} trajectory returned, total time {:.3} s",
        if solution.refined { "Shooting" } else { "SCP" },
        solution.total_time.as_secs_f64()
    );
    if cli.dump {
        dump_trajectory(&solution.trajectory);
    }
    if !solution.successful() {
        bail!("planning failed: {}", solution.scp.status());
    }
    Ok(())
}
