//! Diameter increment from stem biomass growth.
//!
//! Stem mass follows `mass = k * d^2 * h` with `k = volume_factor * density`
//! and height growing by `hd * delta_d`. Given a target stem mass increase the
//! solver finds `delta_d` (metres).

/// Residual accepted by the fallback search (kg).
pub const RESIDUAL_TOLERANCE: f64 = 1.0;
/// Step width at which the fallback search gives up (m).
pub const STEP_FLOOR: f64 = 0.00001;
const START_INCREMENT: f64 = 0.02;
const START_STEP: f64 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StemGrowth {
    /// Current diameter (m).
    pub diameter: f64,
    /// Current height (m).
    pub height: f64,
    /// Last year's diameter increment (m), the linearization point.
    pub previous_increment: f64,
    /// Net stem biomass to add (kg).
    pub net_stem_mass: f64,
    /// Height/diameter ratio applied to the increment.
    pub hd_growth: f64,
    /// `volume_factor * wood_density`.
    pub mass_factor: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SolveStatus {
    /// First-order estimate was within tolerance.
    Direct,
    /// Fallback search reached a residual below the tolerance.
    Converged { iterations: u32 },
    /// Fallback search hit the step floor; the increment is the best found.
    BestEffort { iterations: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiameterSolution {
    /// Diameter increment (m), never negative.
    pub increment: f64,
    /// Remaining stem mass error of the raw increment (kg).
    pub residual: f64,
    pub status: SolveStatus,
}

impl DiameterSolution {
    pub fn is_best_effort(&self) -> bool {
        matches!(self.status, SolveStatus::BestEffort { .. })
    }
}

impl StemGrowth {
    fn stem_mass(&self) -> f64 {
        self.mass_factor * self.diameter * self.diameter * self.height
    }

    /// Stem mass error after applying `increment`.
    pub fn residual(&self, increment: f64) -> f64 {
        let d = self.diameter + increment;
        self.mass_factor * d * d * (self.height + increment * self.hd_growth)
            - (self.stem_mass() + self.net_stem_mass)
    }
}

pub fn solve_diameter_increment(input: &StemGrowth) -> DiameterSolution {
    let stem_mass = input.stem_mass();
    let d = input.diameter;
    let linear_at = d + input.previous_increment;
    let factor = 1.0
        / (input.mass_factor * linear_at * linear_at * (2.0 * input.height / d + input.hd_growth));
    let estimate = factor * input.net_stem_mass;
    let estimate_residual = input.residual(estimate);
    let tolerance = RESIDUAL_TOLERANCE.min(stem_mass);

    let mut increment = factor * (input.net_stem_mass - estimate_residual);
    let mut residual = estimate_residual;
    let mut status = SolveStatus::Direct;

    if estimate_residual.abs() > tolerance {
        residual = input.residual(increment);
        if residual.abs() > tolerance {
            (increment, residual, status) = fallback_search(input);
        }
    }

    DiameterSolution {
        increment: increment.max(0.0),
        residual,
        status,
    }
}

/// Step search starting at 2 cm; the step halves once the target was overshot.
fn fallback_search(input: &StemGrowth) -> (f64, f64, SolveStatus) {
    let mut increment = START_INCREMENT;
    let mut step = START_STEP;
    let mut overshot = false;
    let mut iterations = 0;
    loop {
        iterations += 1;
        let residual = input.residual(increment);
        if residual.abs() < RESIDUAL_TOLERANCE {
            return (increment, residual, SolveStatus::Converged { iterations });
        }
        if residual > 0.0 {
            increment -= step;
            overshot = true;
        } else {
            increment += step;
        }
        if overshot {
            step /= 2.0;
        }
        if step <= STEP_FLOOR {
            let residual = input.residual(increment);
            return (increment, residual, SolveStatus::BestEffort { iterations });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stem(net: f64, previous_increment: f64) -> StemGrowth {
        StemGrowth {
            diameter: 0.2,
            height: 18.0,
            previous_increment,
            net_stem_mass: net,
            hd_growth: 60.0,
            mass_factor: 0.5 * std::f64::consts::FRAC_PI_4 * 370.0,
        }
    }

    #[test]
    fn small_growth_is_solved_directly() {
        let solution = solve_diameter_increment(&stem(1.6, 0.001));
        assert_eq!(solution.status, SolveStatus::Direct);
        assert!(solution.increment > 0.001 && solution.increment < 0.0015);
        let input = stem(1.6, 0.001);
        assert!(input.residual(solution.increment).abs() < 1e-3);
    }

    #[test]
    fn poor_linearization_falls_back_to_search() {
        let input = stem(50.0, 0.001);
        let solution = solve_diameter_increment(&input);
        assert!(matches!(solution.status, SolveStatus::Converged { .. }));
        assert!(solution.residual.abs() < RESIDUAL_TOLERANCE);
        assert!((input.residual(solution.increment)).abs() < RESIDUAL_TOLERANCE);
    }

    #[test]
    fn increments_are_never_negative() {
        let solution = solve_diameter_increment(&stem(0.0, 0.001));
        assert!(solution.increment >= 0.0);
        assert!(solution.increment < 1e-6);
    }

    #[test]
    fn unreachable_target_returns_best_effort() {
        // a negative target cannot be reached with a non-negative increment
        let input = StemGrowth {
            diameter: 0.01,
            height: 1.5,
            previous_increment: 0.001,
            net_stem_mass: -5.0,
            hd_growth: 100.0,
            mass_factor: 145.0,
        };
        let solution = solve_diameter_increment(&input);
        assert!(solution.is_best_effort());
        assert!(solution.increment < 1e-4);
        assert!(solution.residual > RESIDUAL_TOLERANCE);
    }
}
