use crate::registry::ExecutionUnit;
use crate::utils::errors::WorkloadError;
use std::f64::consts::PI;

const SOLAR_MASS: f64 = 4.0 * PI * PI;
const DAYS_PER_YEAR: f64 = 365.24;

#[derive(Clone, Copy)]
struct Body {
    position: [f64; 3],
    velocity: [f64; 3],
    mass: f64,
}

impl Body {
    fn new(position: [f64; 3], velocity: [f64; 3], mass: f64) -> Self {
        Self {
            position,
            velocity: [
                velocity[0] * DAYS_PER_YEAR,
                velocity[1] * DAYS_PER_YEAR,
                velocity[2] * DAYS_PER_YEAR,
            ],
            mass: mass * SOLAR_MASS,
        }
    }
}

fn jovian_system() -> [Body; 5] {
    [
        // sun
        Body::new([0.0; 3], [0.0; 3], 1.0),
        // jupiter
        Body::new(
            [4.841_431_442_464_72e0, -1.160_320_044_027_428_4e0, -1.036_220_444_711_231_1e-1],
            [1.660_076_642_744_037e-3, 7.699_011_184_197_404e-3, -6.904_600_169_720_63e-5],
            9.547_919_384_243_266e-4,
        ),
        // saturn
        Body::new(
            [8.343_366_718_244_58e0, 4.124_798_564_124_305e0, -4.035_234_171_143_214e-1],
            [-2.767_425_107_268_624e-3, 4.998_528_012_349_172e-3, 2.304_172_975_737_639_3e-5],
            2.858_859_806_661_308e-4,
        ),
        // uranus
        Body::new(
            [1.289_436_956_213_913_1e1, -1.511_115_140_169_863_1e1, -2.233_075_788_926_557_3e-1],
            [2.964_601_375_647_616e-3, 2.378_471_739_594_809_5e-3, -2.965_895_685_402_375_6e-5],
            4.366_244_043_351_563e-5,
        ),
        // neptune
        Body::new(
            [1.537_969_711_485_091_65e1, -2.591_931_460_998_796_4e1, 1.792_587_729_503_711_8e-1],
            [2.680_677_724_903_893_2e-3, 1.628_241_700_382_423e-3, -9.515_922_545_197_159e-5],
            5.151_389_020_466_114_5e-5,
        ),
    ]
}

/// Simulates the Jovian planets for a number of steps.
pub struct NBodySystem {
    bodies: [Body; 5],
}

impl NBodySystem {
    pub fn new() -> Self {
        let mut bodies = jovian_system();
        let mut momentum = [0.0; 3];
        for body in &bodies {
            for (m, v) in momentum.iter_mut().zip(body.velocity) {
                *m += v * body.mass;
            }
        }
        for (v, m) in bodies[0].velocity.iter_mut().zip(momentum) {
            *v = -m / SOLAR_MASS;
        }
        Self { bodies }
    }

    pub fn advance(&mut self, dt: f64) {
        let n = self.bodies.len();
        for i in 0..n {
            let (left, right) = self.bodies.split_at_mut(i + 1);
            let a = &mut left[i];
            for b in right.iter_mut() {
                let d = [
                    a.position[0] - b.position[0],
                    a.position[1] - b.position[1],
                    a.position[2] - b.position[2],
                ];
                let distance2 = d[0] * d[0] + d[1] * d[1] + d[2] * d[2];
                let magnitude = dt / (distance2 * distance2.sqrt());
                for k in 0..3 {
                    a.velocity[k] -= d[k] * b.mass * magnitude;
                    b.velocity[k] += d[k] * a.mass * magnitude;
                }
            }
        }
        for body in &mut self.bodies {
            for k in 0..3 {
                body.position[k] += dt * body.velocity[k];
            }
        }
    }

    pub fn energy(&self) -> f64 {
        let mut e = 0.0;
        for (i, a) in self.bodies.iter().enumerate() {
            e += 0.5 * a.mass * a.velocity.iter().map(|v| v * v).sum::<f64>();
            for b in &self.bodies[i + 1..] {
                let distance2: f64 = (0..3).map(|k| (a.position[k] - b.position[k]).powi(2)).sum();
                e -= a.mass * b.mass / distance2.sqrt();
            }
        }
        e
    }
}

impl Default for NBodySystem {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
pub struct NBody;

impl ExecutionUnit for NBody {
    fn name(&self) -> &str {
        "nbody"
    }

    fn description(&self) -> &str {
        "Double-precision N-body simulation"
    }

    fn effective_size(&self, _requested: usize) -> usize {
        1_000_000
    }

    fn execute(&mut self, steps: usize) -> Result<u64, WorkloadError> {
        let mut system = NBodySystem::new();
        for _ in 0..steps {
            system.advance(0.01);
        }
        Ok((system.energy() * -1e9) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_energies() {
        let mut system = NBodySystem::new();
        assert!((system.energy() - -0.169075164).abs() < 1e-9);
        for _ in 0..1000 {
            system.advance(0.01);
        }
        assert!((system.energy() - -0.169087605).abs() < 1e-9);
    }

    #[test]
    fn test_zero_steps() {
        assert_eq!(NBody.execute(0).unwrap(), 169_075_163);
    }
}
