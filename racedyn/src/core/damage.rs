use glam::DVec2;
use serde::Serialize;

/// Shares of the heavy impact threshold from which a contact damages the car by one or two
/// levels.
const MINOR_IMPACT_SHARE: f64 = 0.2;
const MAJOR_IMPACT_SHARE: f64 = 0.5;
/// |cos| of the angle between impulse and car axis above which a hit counts as frontal or rear.
const AXIAL_IMPACT_COS: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum DamageLevel {
    None,
    Minor,
    Moderate,
    Severe,
}

impl Default for DamageLevel {
    fn default() -> Self {
        DamageLevel::None
    }
}

impl DamageLevel {
    pub fn performance_multiplier(&self) -> f64 {
        match self {
            DamageLevel::None => 1.0,
            DamageLevel::Minor => 0.95,
            DamageLevel::Moderate => 0.85,
            DamageLevel::Severe => 0.65,
        }
    }

    fn worsen(self, steps: u8) -> DamageLevel {
        (0..steps).fold(self, |level, _| match level {
            DamageLevel::None => DamageLevel::Minor,
            DamageLevel::Minor => DamageLevel::Moderate,
            DamageLevel::Moderate | DamageLevel::Severe => DamageLevel::Severe,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ImpactZone {
    Front,
    Rear,
    Side,
}

impl ImpactZone {
    /// from_impulse classifies a hit by the velocity change it caused: a car pushed backwards was
    /// hit at the front.
    pub fn from_impulse(forward: DVec2, dv: DVec2) -> ImpactZone {
        let dv_len = dv.length();
        if dv_len <= f64::EPSILON {
            return ImpactZone::Side;
        }
        let cos = forward.dot(dv) / dv_len;
        if cos <= -AXIAL_IMPACT_COS {
            ImpactZone::Front
        } else if cos >= AXIAL_IMPACT_COS {
            ImpactZone::Rear
        } else {
            ImpactZone::Side
        }
    }
}

/// Damage of the parts that scale the performance of a car.
/// * `front_wing`, `rear_wing` - Downforce
/// * `suspension` - Mechanical grip
/// * `engine` - Power
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct CarDamage {
    pub front_wing: DamageLevel,
    pub rear_wing: DamageLevel,
    pub suspension: DamageLevel,
    pub engine: DamageLevel,
}

impl CarDamage {
    /// apply_impact damages the parts in the hit zone. severity is the velocity change of the
    /// contact relative to the heavy impact threshold. Returns true if anything got worse.
    pub fn apply_impact(&mut self, zone: ImpactZone, severity: f64) -> bool {
        if !(severity >= MINOR_IMPACT_SHARE) {
            return false;
        }
        let steps = if severity < MAJOR_IMPACT_SHARE { 1 } else { 2 };

        let before = *self;
        match zone {
            ImpactZone::Front => {
                self.front_wing = self.front_wing.worsen(steps);
                self.suspension = self.suspension.worsen(steps);
            }
            ImpactZone::Rear => {
                self.rear_wing = self.rear_wing.worsen(steps);
                self.engine = self.engine.worsen(steps);
            }
            ImpactZone::Side => self.suspension = self.suspension.worsen(steps),
        }
        *self != before
    }

    /// repair_wings replaces both wings, done during a pit stop.
    pub fn repair_wings(&mut self) {
        self.front_wing = DamageLevel::None;
        self.rear_wing = DamageLevel::None;
    }

    pub fn grip_multiplier(&self) -> f64 {
        self.suspension.performance_multiplier()
    }

    pub fn downforce_multiplier(&self) -> f64 {
        0.5 * (self.front_wing.performance_multiplier() + self.rear_wing.performance_multiplier())
    }

    pub fn power_multiplier(&self) -> f64 {
        self.engine.performance_multiplier()
    }

    pub fn is_damaged(&self) -> bool {
        *self != CarDamage::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn light_contacts_leave_the_car_intact() {
        let mut damage = CarDamage::default();
        assert!(!damage.apply_impact(ImpactZone::Front, 0.1));
        assert!(!damage.apply_impact(ImpactZone::Front, f64::NAN));
        assert!(!damage.is_damaged());
        assert_relative_eq!(damage.grip_multiplier(), 1.0);
    }

    #[test]
    fn frontal_hit_costs_downforce_and_grip() {
        let mut damage = CarDamage::default();
        assert!(damage.apply_impact(ImpactZone::Front, 0.3));
        assert_eq!(damage.front_wing, DamageLevel::Minor);
        assert_eq!(damage.suspension, DamageLevel::Minor);
        assert_eq!(damage.engine, DamageLevel::None);

        assert!(damage.apply_impact(ImpactZone::Front, 0.8));
        assert_eq!(damage.front_wing, DamageLevel::Severe);
        assert_relative_eq!(damage.downforce_multiplier(), 0.825, epsilon = 1e-12);
        assert_relative_eq!(damage.grip_multiplier(), 0.65);

        // nothing gets worse than severe
        assert!(!damage.apply_impact(ImpactZone::Side, 0.9));
    }

    #[test]
    fn pit_stop_replaces_the_wings_only() {
        let mut damage = CarDamage::default();
        damage.apply_impact(ImpactZone::Rear, 0.6);
        assert_relative_eq!(damage.power_multiplier(), 0.85);
        damage.repair_wings();
        assert_eq!(damage.rear_wing, DamageLevel::None);
        assert_eq!(damage.engine, DamageLevel::Moderate);
        assert!(damage.is_damaged());
    }

    #[test]
    fn impact_zone_follows_the_impulse_direction() {
        let fwd = DVec2::X;
        assert_eq!(ImpactZone::from_impulse(fwd, DVec2::new(-3.0, 0.5)), ImpactZone::Front);
        assert_eq!(ImpactZone::from_impulse(fwd, DVec2::new(4.0, 0.0)), ImpactZone::Rear);
        assert_eq!(ImpactZone::from_impulse(fwd, DVec2::new(0.2, -2.0)), ImpactZone::Side);
        assert_eq!(ImpactZone::from_impulse(fwd, DVec2::ZERO), ImpactZone::Side);
    }
}
