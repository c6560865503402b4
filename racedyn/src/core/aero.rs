use glam::DVec2;
use serde::Deserialize;

/// * `air_density` - (kg/m^3) Air density
/// * `c_drag` - () Drag coefficient
/// * `c_lift` - () Downforce coefficient (positive pushes the car down)
/// * `frontal_area` - (m^2) Reference area
#[derive(Debug, Deserialize, Clone)]
pub struct AeroSpec {
    #[serde(default = "default_air_density")]
    pub air_density: f64,
    pub c_drag: f64,
    pub c_lift: f64,
    pub frontal_area: f64,
}

fn default_air_density() -> f64 {
    1.225
}

#[derive(Debug, Clone)]
pub struct AerodynamicsModel {
    k_drag: f64,
    k_down: f64,
}

impl AerodynamicsModel {
    pub fn new(spec: &AeroSpec) -> AerodynamicsModel {
        AerodynamicsModel {
            k_drag: 0.5 * spec.air_density * spec.c_drag * spec.frontal_area,
            k_down: 0.5 * spec.air_density * spec.c_lift * spec.frontal_area,
        }
    }

    /// k_drag returns 0.5 * rho * c_d * A (N*s^2/m^2).
    pub fn k_drag(&self) -> f64 {
        self.k_drag
    }

    /// drag_force returns the quadratic drag force (N) acting against the velocity.
    pub fn drag_force(&self, velocity: DVec2) -> DVec2 {
        -self.k_drag * velocity.length() * velocity
    }

    /// downforce returns the vertical aerodynamic load (N) at the given speed.
    pub fn downforce(&self, speed: f64) -> f64 {
        self.k_down * speed * speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn drag_opposes_motion_quadratically() {
        let aero = AerodynamicsModel::new(&AeroSpec {
            air_density: 1.225,
            c_drag: 1.0,
            c_lift: 2.5,
            frontal_area: 1.4,
        });
        let f10 = aero.drag_force(DVec2::new(10.0, 0.0));
        let f20 = aero.drag_force(DVec2::new(20.0, 0.0));
        assert!(f10.x < 0.0);
        assert_relative_eq!(f20.x / f10.x, 4.0, epsilon = 1e-12);
        assert_relative_eq!(aero.downforce(10.0), 0.5 * 1.225 * 2.5 * 1.4 * 100.0, epsilon = 1e-9);
    }
}
