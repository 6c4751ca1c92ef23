//! Helper functions

use crate::solution::{IterationRecord, ScpSolution};
use crate::trajectory::Trajectory;
use nalgebra::DVector;

fn format_row(values: impl Iterator<Item = f64>) -> String {
    let mut row_str = String::new();
    for value in values {
        row_str.push_str(&format!("{:8.3} ", value));
    }
    row_str.trim_end().to_string()
}

/// Format a state or control vector as a single line
pub fn format_vector(v: &DVector<f64>) -> String {
    format!("[{}]", format_row(v.iter().copied()))
}

/// Print states and controls, one line per time step.
#[allow(dead_code)]
pub fn dump_trajectory(trajectory: &Trajectory) {
    println!(
        "{} steps, tf = {:.4}, dt = {:.4}",
        trajectory.steps(),
        trajectory.tf,
        trajectory.dt()
    );
    for k in 0..trajectory.steps() {
        println!(
            "{:4} t={:8.3} x={} u={}",
            k,
            trajectory.time_at(k),
            format_vector(&trajectory.state(k)),
            format_vector(&trajectory.control(k))
        );
    }
}

/// Single line summary of an iteration record
pub fn format_record(record: &IterationRecord) -> String {
    format!(
        "{:3} {:10} {:>12.5e} {:>12.5e} {:>12.5e} {:>10.3e} {:>9.3e} {:>8.1e} {:>8.3}s",
        record.iteration,
        format!("{:?}", record.status),
        record.j_true,
        record.j_candidate,
        record.j_model,
        record.violation,
        record.trust_radius,
        record.penalty,
        record.elapsed.as_secs_f64()
    )
}

/// Print the iteration history of an SCP run.
pub fn dump_iterations(solution: &ScpSolution) {
    if solution.records().is_empty() {
        println!("No iterations");
    }
    println!(
        "{:>3} {:10} {:>12} {:>12} {:>12} {:>10} {:>9} {:>8} {:>9}",
        "it", "status", "merit", "candidate", "model", "violation", "radius", "penalty", "time"
    );
    for record in solution.records() {
        println!("{}", format_record(record));
    }
    println!(
        "{} after {} iterations ({} accepted), merit {:.6e}, violation {:.3e}",
        solution.status(),
        solution.iterations(),
        solution.accepted_count(),
        solution.merit(),
        solution.violation()
    );
}

/// Parse a comma separated list of numbers, as given on the command line
pub fn parse_vector(text: &str) -> Result<DVector<f64>, String> {
    let values = text
        .split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f64>()
                .map_err(|e| format!("'{}' is not a number: {}", s, e))
        })
        .collect::<Result<Vec<f64>, String>>()?;
    if values.is_empty() {
        return Err("empty vector".to_string());
    }
    Ok(DVector::from_vec(values))
}
